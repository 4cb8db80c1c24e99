//! Diagnostic snapshots of the registry and policy store
//!
//! Rows serialize to JSON for tooling; the `*_table` functions render the
//! tab-separated text tables operators are used to reading.

use pc_dpi::{AppRegistry, AppSignature};
use serde::Serialize;
use std::fmt::Write;

use crate::engine::BaseConfig;
use crate::group::Group;
use crate::store::{PolicyStore, RuleEntry};

const APP_HEADER: &str = "ID\tName\tProto\tSport\tDport\tHost_url\tRequest_url\tDataDictionary";
const RULE_SEPARATOR: &str = "=======================================================";

/// One application signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppRow {
    pub id: u32,
    pub name: String,
    /// IP protocol number, 0 for any
    pub proto: u8,
    /// Required source port, 0 for any
    pub sport: u16,
    /// Destination ranges, `!a-b|c`
    pub dport: String,
    pub host_url: String,
    pub request_url: String,
    /// Byte positions, `[pos]=0xNN&&...`
    pub data_dictionary: String,
}

impl From<&AppSignature> for AppRow {
    fn from(sig: &AppSignature) -> Self {
        let dport = sig
            .dest_port_ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|");
        let data_dictionary = sig
            .byte_positions
            .iter()
            .map(|pos| format!("[{}]=0x{:x}", pos.position, pos.expected))
            .collect::<Vec<_>>()
            .join("&&");

        Self {
            id: sig.app_id,
            name: sig.name.clone(),
            proto: sig.protocol.as_u8(),
            sport: sig.source_port.unwrap_or(0),
            dport,
            host_url: sig.host_pattern.as_ref().map(|p| p.as_str().to_string()).unwrap_or_default(),
            request_url: sig
                .request_pattern
                .as_ref()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default(),
            data_dictionary,
        }
    }
}

/// One rule with its reference count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRow {
    pub id: String,
    /// Wire value of the action
    pub action: u8,
    pub refer_count: u32,
    pub apps: Vec<u32>,
    pub blacklist: Vec<AppRow>,
}

impl From<&RuleEntry> for RuleRow {
    fn from(entry: &RuleEntry) -> Self {
        let rule = &entry.rule;
        Self {
            id: rule.id.clone(),
            action: rule.action.as_u8(),
            refer_count: entry.reference_count,
            apps: rule.apps.clone(),
            blacklist: rule.blacklist.iter().map(AppRow::from).collect(),
        }
    }
}

/// One device group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRow {
    pub id: String,
    /// Bound rule id, `None` when unbound
    pub rule: Option<String>,
    pub macs: Vec<String>,
}

impl From<&Group> for GroupRow {
    fn from(group: &Group) -> Self {
        Self {
            id: group.id.clone(),
            rule: group.rule.clone(),
            macs: group.macs.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Base configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseRow {
    pub drop_anonymous: bool,
    pub src_dev: String,
}

impl From<&BaseConfig> for BaseRow {
    fn from(base: &BaseConfig) -> Self {
        Self {
            drop_anonymous: base.drop_anonymous(),
            src_dev: base.src_dev(),
        }
    }
}

pub fn app_rows(registry: &AppRegistry) -> Vec<AppRow> {
    registry.snapshot().iter().map(AppRow::from).collect()
}

pub fn rule_rows(store: &PolicyStore) -> Vec<RuleRow> {
    store.rules().iter().map(RuleRow::from).collect()
}

pub fn group_rows(store: &PolicyStore) -> Vec<GroupRow> {
    store.groups().iter().map(GroupRow::from).collect()
}

/// Registry table, one line per signature
pub fn apps_table(registry: &AppRegistry) -> String {
    let mut out = String::new();
    write_app_rows(&mut out, &app_rows(registry));
    out
}

/// Rules table; each rule is followed by its blacklist
pub fn rules_table(store: &PolicyStore) -> String {
    let mut out = String::from("ID\tAction\tRefer_count\tAPPs\n");
    for row in rule_rows(store) {
        let _ = write!(out, "{}\t{}\t{}\t[ ", row.id, row.action, row.refer_count);
        for app in &row.apps {
            let _ = write!(out, "{app} ");
        }
        out.push_str("]\nBlack List:\n");
        write_app_rows(&mut out, &row.blacklist);
        out.push_str(RULE_SEPARATOR);
        out.push_str("\n\n");
    }
    out
}

/// Groups table
pub fn groups_table(store: &PolicyStore) -> String {
    let mut out = String::from("ID\tRule_ID\tMACs\n");
    for row in group_rows(store) {
        let _ = write!(out, "{}\t{}\t[ ", row.id, row.rule.as_deref().unwrap_or("NULL"));
        for mac in &row.macs {
            let _ = write!(out, "{mac} ");
        }
        out.push_str("]\n");
    }
    out
}

fn write_app_rows(out: &mut String, rows: &[AppRow]) {
    out.push_str(APP_HEADER);
    out.push('\n');
    for row in rows {
        let _ = write!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.id, row.name, row.proto, row.sport, row.dport, row.host_url, row.request_url
        );
        if !row.data_dictionary.is_empty() {
            let _ = write!(out, "\t{}", row.data_dictionary);
        }
        out.push('\n');
    }
}
