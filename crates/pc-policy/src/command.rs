//! Control-plane commands
//!
//! Commands arrive as JSON documents:
//!
//! ```json
//! {"op": 1, "data": {"rules": [{"id": "r1", "action": 2, "apps": [1001, 2], "blacklist": ["tcp;;443;;;"]}]}}
//! ```
//!
//! | op | command |
//! |----|---------|
//! | 0 | set base config |
//! | 1 | add rules |
//! | 2 | add groups |
//! | 3 | clean rules |
//! | 4 | clean groups |
//! | 5 | set rules |
//! | 6 | set groups |
//!
//! A document is decoded and validated completely before anything is
//! applied, so a rejected command leaves the store untouched.

use pc_common::{
    truncate_str, Action, MacAddr, PcError, PcResult, BLIST_ID, GROUP_ID_SIZE,
    MAX_SRC_DEVNAME_SIZE, RULE_ID_SIZE,
};
use pc_dpi::parse_feature;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::engine::BaseConfig;
use crate::group::Group;
use crate::rule::Rule;
use crate::store::PolicyStore;

/// Name given to inline blacklist signatures
pub const BLACKLIST_NAME: &str = "blacklist";

const OP_SET_BASE: u32 = 0;
const OP_ADD_RULE: u32 = 1;
const OP_ADD_GROUP: u32 = 2;
const OP_CLEAN_RULE: u32 = 3;
const OP_CLEAN_GROUP: u32 = 4;
const OP_SET_RULE: u32 = 5;
const OP_SET_GROUP: u32 = 6;

/// Rule definition carried by add/set rule commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub id: String,
    pub action: Action,
    pub apps: Vec<u32>,
    /// Feature strings of inline blacklist signatures
    pub blacklist: Vec<String>,
}

impl RuleSpec {
    /// Build the rule, compiling the blacklist. Feature strings that do
    /// not parse are logged and left out.
    pub fn into_rule(self) -> Rule {
        let mut blacklist = Vec::with_capacity(self.blacklist.len());
        for feature in &self.blacklist {
            match parse_feature(BLIST_ID, BLACKLIST_NAME, feature) {
                Ok(sig) => blacklist.push(sig),
                Err(e) => {
                    tracing::warn!(rule = %self.id, feature = %feature, error = %e, "Skipping blacklist entry");
                }
            }
        }
        Rule::new(self.id, self.action)
            .with_apps(self.apps)
            .with_blacklist(blacklist)
    }
}

/// Group definition carried by add/set group commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub id: String,
    /// Rule to bind; `None` leaves the group unbound
    pub rule: Option<String>,
    pub macs: Vec<MacAddr>,
}

impl GroupSpec {
    pub fn into_group(self) -> Group {
        Group::new(self.id, self.macs, self.rule)
    }
}

/// Decoded control-plane command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetBase { drop_anonymous: bool, src_dev: String },
    AddRule(Vec<RuleSpec>),
    SetRule(Vec<RuleSpec>),
    CleanRule,
    AddGroup(Vec<GroupSpec>),
    SetGroup(Vec<GroupSpec>),
    CleanGroup,
}

/// Result of applying a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    /// Ids a set command could not find
    pub missing: Vec<String>,
}

impl Command {
    /// Decode a JSON command document
    pub fn from_json(input: &str) -> PcResult<Self> {
        let value: Value = serde_json::from_str(input)?;
        Self::from_value(&value)
    }

    /// Decode an already-parsed command document
    pub fn from_value(value: &Value) -> PcResult<Self> {
        let doc = value
            .as_object()
            .ok_or_else(|| invalid("command is not an object"))?;
        let op = doc
            .get("op")
            .ok_or_else(|| invalid("missing op"))?
            .as_u64()
            .ok_or_else(|| invalid("op is not a non-negative integer"))?;
        let op = u32::try_from(op).map_err(|_| PcError::UnknownCommand(u32::MAX))?;
        let data = doc.get("data");

        match op {
            OP_SET_BASE => decode_base(require_data(data)?),
            OP_ADD_RULE => Ok(Self::AddRule(decode_rules(require_data(data)?)?)),
            OP_SET_RULE => Ok(Self::SetRule(decode_rules(require_data(data)?)?)),
            OP_CLEAN_RULE => Ok(Self::CleanRule),
            OP_ADD_GROUP => Ok(Self::AddGroup(decode_groups(require_data(data)?)?)),
            OP_SET_GROUP => Ok(Self::SetGroup(decode_groups(require_data(data)?)?)),
            OP_CLEAN_GROUP => Ok(Self::CleanGroup),
            other => Err(PcError::UnknownCommand(other)),
        }
    }

    /// Wire op code
    pub fn op(&self) -> u32 {
        match self {
            Self::SetBase { .. } => OP_SET_BASE,
            Self::AddRule(_) => OP_ADD_RULE,
            Self::AddGroup(_) => OP_ADD_GROUP,
            Self::CleanRule => OP_CLEAN_RULE,
            Self::CleanGroup => OP_CLEAN_GROUP,
            Self::SetRule(_) => OP_SET_RULE,
            Self::SetGroup(_) => OP_SET_GROUP,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetBase { .. } => "set_base",
            Self::AddRule(_) => "add_rule",
            Self::AddGroup(_) => "add_group",
            Self::CleanRule => "clean_rule",
            Self::CleanGroup => "clean_group",
            Self::SetRule(_) => "set_rule",
            Self::SetGroup(_) => "set_group",
        }
    }

    /// Apply to the store and base configuration.
    ///
    /// Set commands report ids they could not find in the outcome rather
    /// than failing; the remaining entries are still applied.
    pub fn apply(self, store: &PolicyStore, base: &BaseConfig) -> PcResult<CommandOutcome> {
        let mut outcome = CommandOutcome::default();
        tracing::info!(command = self.name(), "Applying command");

        match self {
            Self::SetBase {
                drop_anonymous,
                src_dev,
            } => base.set(drop_anonymous, src_dev),
            Self::AddRule(specs) => {
                store.add_rules(specs.into_iter().map(RuleSpec::into_rule).collect())?;
            }
            Self::SetRule(specs) => {
                for spec in specs {
                    let id = spec.id.clone();
                    match store.set_rule(spec.into_rule()) {
                        Ok(()) => {}
                        Err(PcError::NotFound { .. }) => {
                            tracing::warn!(rule = %id, "Set on unknown rule");
                            outcome.missing.push(id);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            Self::CleanRule => store.clean_rules(),
            Self::AddGroup(specs) => {
                store.add_groups(specs.into_iter().map(GroupSpec::into_group).collect())?;
            }
            Self::SetGroup(specs) => {
                for spec in specs {
                    let id = spec.id.clone();
                    match store.set_group(spec.into_group()) {
                        Ok(()) => {}
                        Err(PcError::NotFound { .. }) => {
                            tracing::warn!(group = %id, "Set on unknown group");
                            outcome.missing.push(id);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            Self::CleanGroup => store.clean_groups(),
        }
        Ok(outcome)
    }
}

fn invalid(msg: impl Into<String>) -> PcError {
    PcError::InvalidCommand(msg.into())
}

fn require_data(data: Option<&Value>) -> PcResult<&Map<String, Value>> {
    data.ok_or_else(|| invalid("missing data"))?
        .as_object()
        .ok_or_else(|| invalid("data is not an object"))
}

fn decode_base(data: &Map<String, Value>) -> PcResult<Command> {
    let drop_anonymous = match data.get("drop_anonymous") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        Some(_) => return Err(invalid("drop_anonymous is not a bool or integer")),
        None => return Err(invalid("missing drop_anonymous")),
    };
    let src_dev = data
        .get("src_dev")
        .ok_or_else(|| invalid("missing src_dev"))?
        .as_str()
        .ok_or_else(|| invalid("src_dev is not a string"))?;

    Ok(Command::SetBase {
        drop_anonymous,
        src_dev: truncate_str(src_dev, MAX_SRC_DEVNAME_SIZE - 1).to_string(),
    })
}

fn decode_rules(data: &Map<String, Value>) -> PcResult<Vec<RuleSpec>> {
    let rules = data
        .get("rules")
        .ok_or_else(|| invalid("missing rules"))?
        .as_array()
        .ok_or_else(|| invalid("rules is not an array"))?;

    rules.iter().map(decode_rule).collect()
}

fn decode_rule(value: &Value) -> PcResult<RuleSpec> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("rule is not an object"))?;
    let id = required_str(obj, "id", "rule")?;
    let action = obj
        .get("action")
        .ok_or_else(|| invalid(format!("rule {id}: missing action")))?
        .as_i64()
        .and_then(Action::from_wire)
        .ok_or_else(|| invalid(format!("rule {id}: invalid action")))?;

    let mut apps = Vec::new();
    for item in optional_array(obj, "apps") {
        match item.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(app_id) => apps.push(app_id),
            None => tracing::warn!(rule = %id, app = %item, "Skipping invalid app id"),
        }
    }

    let mut blacklist = Vec::new();
    for item in optional_array(obj, "blacklist") {
        match item.as_str() {
            Some(feature) => blacklist.push(feature.to_string()),
            None => tracing::warn!(rule = %id, entry = %item, "Skipping non-string blacklist entry"),
        }
    }

    Ok(RuleSpec {
        id: truncate_str(id, RULE_ID_SIZE - 1).to_string(),
        action,
        apps,
        blacklist,
    })
}

fn decode_groups(data: &Map<String, Value>) -> PcResult<Vec<GroupSpec>> {
    let groups = data
        .get("groups")
        .ok_or_else(|| invalid("missing groups"))?
        .as_array()
        .ok_or_else(|| invalid("groups is not an array"))?;

    groups.iter().map(decode_group).collect()
}

fn decode_group(value: &Value) -> PcResult<GroupSpec> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("group is not an object"))?;
    let id = required_str(obj, "id", "group")?;
    let rule = obj
        .get("rule")
        .ok_or_else(|| invalid(format!("group {id}: missing rule")))?
        .as_str()
        .ok_or_else(|| invalid(format!("group {id}: rule is not a string")))?;

    let mut macs = Vec::new();
    for item in optional_array(obj, "macs") {
        match item.as_str().map(str::parse::<MacAddr>) {
            Some(Ok(mac)) => macs.push(mac),
            _ => tracing::warn!(group = %id, mac = %item, "Skipping invalid mac"),
        }
    }

    Ok(GroupSpec {
        id: truncate_str(id, GROUP_ID_SIZE - 1).to_string(),
        rule: (!rule.is_empty()).then(|| truncate_str(rule, RULE_ID_SIZE - 1).to_string()),
        macs,
    })
}

fn required_str<'v>(obj: &'v Map<String, Value>, key: &str, kind: &str) -> PcResult<&'v str> {
    obj.get(key)
        .ok_or_else(|| invalid(format!("{kind}: missing {key}")))?
        .as_str()
        .ok_or_else(|| invalid(format!("{kind}: {key} is not a string")))
}

fn optional_array<'v>(obj: &'v Map<String, Value>, key: &str) -> impl Iterator<Item = &'v Value> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter())
        .into_iter()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_add_rule() {
        let cmd = Command::from_json(
            r#"{"op":1,"data":{"rules":[{"id":"r1","action":2,"apps":[1001,2],"blacklist":["tcp;;443;;;"]}]}}"#,
        )
        .unwrap();
        let Command::AddRule(specs) = cmd else {
            panic!("expected add rule");
        };
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, "r1");
        assert_eq!(specs[0].action, Action::PolicyDrop);
        assert_eq!(specs[0].apps, vec![1001, 2]);

        let rule = specs[0].clone().into_rule();
        assert_eq!(rule.blacklist.len(), 1);
        assert_eq!(rule.blacklist[0].app_id, BLIST_ID);
        assert_eq!(rule.blacklist[0].name, BLACKLIST_NAME);
    }

    #[test]
    fn test_decode_groups_skips_bad_macs() {
        let cmd = Command::from_json(
            r#"{"op":2,"data":{"groups":[{"id":"g1","rule":"r1","macs":["AA:BB:CC:DD:EE:FF","bogus",7]}]}}"#,
        )
        .unwrap();
        let Command::AddGroup(specs) = cmd else {
            panic!("expected add group");
        };
        assert_eq!(specs[0].macs, vec!["aa:bb:cc:dd:ee:ff".parse::<MacAddr>().unwrap()]);
        assert_eq!(specs[0].rule.as_deref(), Some("r1"));
    }

    #[test]
    fn test_decode_base() {
        let cmd = Command::from_json(r#"{"op":0,"data":{"drop_anonymous":1,"src_dev":"br-lan wlan0"}}"#)
            .unwrap();
        assert_eq!(
            cmd,
            Command::SetBase {
                drop_anonymous: true,
                src_dev: "br-lan wlan0".into()
            }
        );

        let long = format!(r#"{{"op":0,"data":{{"drop_anonymous":false,"src_dev":"{}"}}}}"#, "d".repeat(200));
        let Command::SetBase { src_dev, .. } = Command::from_json(&long).unwrap() else {
            panic!("expected set base");
        };
        assert_eq!(src_dev.len(), MAX_SRC_DEVNAME_SIZE - 1);
    }

    #[test]
    fn test_clean_ops_need_no_data() {
        assert_eq!(Command::from_json(r#"{"op":3}"#).unwrap(), Command::CleanRule);
        assert_eq!(Command::from_json(r#"{"op":4}"#).unwrap(), Command::CleanGroup);
    }

    #[test]
    fn test_rejects_malformed() {
        let cases = [
            r#"{"data":{}}"#,
            r#"{"op":1}"#,
            r#"{"op":1,"data":{}}"#,
            r#"{"op":1,"data":{"rules":[{"action":1}]}}"#,
            r#"{"op":1,"data":{"rules":[{"id":"r1"}]}}"#,
            r#"{"op":1,"data":{"rules":[{"id":"r1","action":4}]}}"#,
            r#"{"op":2,"data":{"groups":[{"id":"g1"}]}}"#,
            r#"{"op":0,"data":{"src_dev":""}}"#,
        ];
        for case in cases {
            assert!(
                matches!(Command::from_json(case), Err(PcError::InvalidCommand(_))),
                "{case}"
            );
        }
        assert!(matches!(Command::from_json("not json"), Err(PcError::Json(_))));
    }

    #[test]
    fn test_unknown_op() {
        assert!(matches!(
            Command::from_json(r#"{"op":9,"data":{}}"#),
            Err(PcError::UnknownCommand(9))
        ));
    }

    #[test]
    fn test_rejected_batch_applies_nothing() {
        let store = PolicyStore::new();
        let base = BaseConfig::default();
        Command::from_json(r#"{"op":1,"data":{"rules":[{"id":"r1","action":0}]}}"#)
            .unwrap()
            .apply(&store, &base)
            .unwrap();

        // second rule has no action, so r2 must not be added either
        let result = Command::from_json(
            r#"{"op":1,"data":{"rules":[{"id":"r2","action":0},{"id":"r3"}]}}"#,
        )
        .and_then(|cmd| cmd.apply(&store, &base));
        assert!(matches!(result, Err(PcError::InvalidCommand(_))));
        assert_eq!(store.rule_count(), 1);
        assert!(store.find_rule("r2").is_none());
    }

    #[test]
    fn test_add_batch_keeps_order() {
        let store = PolicyStore::new();
        let base = BaseConfig::default();
        Command::from_json(
            r#"{"op":1,"data":{"rules":[{"id":"r1","action":0},{"id":"r2","action":1}]}}"#,
        )
        .unwrap()
        .apply(&store, &base)
        .unwrap();
        Command::from_json(
            r#"{"op":2,"data":{"groups":[{"id":"g1","rule":"r2","macs":[]},{"id":"g2","rule":"r2","macs":[]}]}}"#,
        )
        .unwrap()
        .apply(&store, &base)
        .unwrap();

        let ids: Vec<String> = store.rules().iter().map(|e| e.rule.id.clone()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(store.rule_reference_count("r2"), Some(2));
        assert_eq!(store.group_count(), 2);
    }

    #[test]
    fn test_apply_set_reports_missing() {
        let store = PolicyStore::new();
        let base = BaseConfig::default();
        Command::from_json(r#"{"op":1,"data":{"rules":[{"id":"r1","action":0}]}}"#)
            .unwrap()
            .apply(&store, &base)
            .unwrap();

        let outcome = Command::from_json(
            r#"{"op":5,"data":{"rules":[{"id":"r1","action":1},{"id":"r9","action":1}]}}"#,
        )
        .unwrap()
        .apply(&store, &base)
        .unwrap();
        assert_eq!(outcome.missing, vec!["r9".to_string()]);
        assert_eq!(store.find_rule("r1").unwrap().action, Action::Accept);
    }

    #[test]
    fn test_apply_base() {
        let store = PolicyStore::new();
        let base = BaseConfig::default();
        Command::SetBase {
            drop_anonymous: true,
            src_dev: "br-lan".into(),
        }
        .apply(&store, &base)
        .unwrap();
        assert!(base.drop_anonymous());
        assert_eq!(base.src_dev(), "br-lan");
    }

    #[test]
    fn test_op_codes() {
        for json in [
            r#"{"op":3}"#,
            r#"{"op":4}"#,
            r#"{"op":1,"data":{"rules":[]}}"#,
            r#"{"op":6,"data":{"groups":[]}}"#,
        ] {
            let value: Value = serde_json::from_str(json).unwrap();
            let cmd = Command::from_value(&value).unwrap();
            assert_eq!(Some(cmd.op() as u64), value["op"].as_u64());
        }
    }
}
