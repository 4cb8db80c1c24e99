//! Per-packet decision engine
//!
//! # Decision order
//!
//! 1. Ingress interface not policed ⇒ ACCEPT
//! 2. Zero or broadcast source MAC ⇒ ACCEPT
//! 3. Device policy: DROP / ACCEPT / anonymous handling short-circuit
//! 4. Parse IPv4 + TCP/UDP; unparsable ⇒ ACCEPT
//! 5. HTTP / TLS extraction
//! 6. Rule blacklist ⇒ DROP
//! 7. First registry app covered by the rule decides
//!
//! The engine never fails; anything it cannot classify is accepted.

use parking_lot::RwLock;
use pc_common::{
    truncate_str, Action, ConnState, EngineConfig, MacAddr, PcResult,
    MAX_SRC_DEVNAME_SIZE,
};
use pc_dpi::{first_match, match_one, AppRegistry, FlowView};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::command::{Command, CommandOutcome};
use crate::store::PolicyStore;

/// Runtime base configuration, changed by the set-base command
#[derive(Debug, Default)]
pub struct BaseConfig {
    drop_anonymous: AtomicBool,
    src_dev: RwLock<String>,
}

impl BaseConfig {
    /// Create new base config
    pub fn new(drop_anonymous: bool, src_dev: &str) -> Self {
        Self {
            drop_anonymous: AtomicBool::new(drop_anonymous),
            src_dev: RwLock::new(truncate_str(src_dev, MAX_SRC_DEVNAME_SIZE - 1).to_string()),
        }
    }

    #[inline(always)]
    pub fn drop_anonymous(&self) -> bool {
        self.drop_anonymous.load(Ordering::Relaxed)
    }

    /// Space-separated policed interfaces
    pub fn src_dev(&self) -> String {
        self.src_dev.read().clone()
    }

    pub fn set(&self, drop_anonymous: bool, src_dev: String) {
        let src_dev = truncate_str(&src_dev, MAX_SRC_DEVNAME_SIZE - 1).to_string();
        tracing::info!(drop_anonymous, src_dev = %src_dev, "Updated base config");
        self.drop_anonymous.store(drop_anonymous, Ordering::Relaxed);
        *self.src_dev.write() = src_dev;
    }

    /// Whether packets arriving on `in_dev` are policed. An empty list
    /// polices every interface; a packet without an interface is never
    /// policed.
    pub fn polices(&self, in_dev: Option<&str>) -> bool {
        let Some(dev) = in_dev else {
            return false;
        };
        let list = self.src_dev.read();
        if list.is_empty() {
            return true;
        }
        list.split(' ').any(|name| !name.is_empty() && name == dev)
    }
}

/// Packet handed over by the forwarding hook
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    /// Ingress interface name
    pub in_dev: Option<&'a str>,
    /// Ethernet source address
    pub src_mac: MacAddr,
    /// Connection-tracking state
    pub conn_state: ConnState,
    /// IPv4 datagram starting at the IP header
    pub ip: &'a [u8],
}

/// Final verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Accept,
    Drop,
}

/// Why a verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Ingress interface not in the policed list
    InterfaceNotPoliced,
    /// Zero or broadcast source MAC
    SpecialMac,
    /// Device in no group, or its group has no rule
    NoRule,
    /// Rule action DROP
    RuleDrop,
    /// Rule action ACCEPT
    RuleAccept,
    /// Anonymous device on a tracked connection
    AnonymousTracked,
    /// Anonymous device opening a new connection
    Anonymous,
    /// Not an IPv4 TCP/UDP packet
    Unparsed,
    /// Matched the rule's inline blacklist
    Blacklisted,
    /// Matched an app covered by the rule
    AppMatched,
    /// No covered app matched
    NoAppMatch,
}

/// Engine output for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub verdict: Verdict,
    /// App id that decided the verdict
    pub app_id: Option<u32>,
    pub reason: DecisionReason,
}

impl Decision {
    #[inline(always)]
    pub fn accept(reason: DecisionReason) -> Self {
        Self { verdict: Verdict::Accept, app_id: None, reason }
    }

    #[inline(always)]
    pub fn drop(reason: DecisionReason) -> Self {
        Self { verdict: Verdict::Drop, app_id: None, reason }
    }

    #[inline(always)]
    pub fn is_drop(&self) -> bool {
        self.verdict == Verdict::Drop
    }
}

/// Parental-control decision engine
pub struct DecisionEngine {
    store: Arc<PolicyStore>,
    registry: Arc<AppRegistry>,
    base: BaseConfig,
    counters: Counters,
}

/// Decision counters, bumped lock-free on the packet path
#[derive(Debug, Default)]
struct Counters {
    packets: AtomicU64,
    accepted: AtomicU64,
    dropped: AtomicU64,
    /// Packets that reached payload inspection
    inspected: AtomicU64,
    blacklist_hits: AtomicU64,
    app_matches: AtomicU64,
}

#[inline(always)]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl DecisionEngine {
    /// Create new engine with empty store and registry
    pub fn new() -> Self {
        Self::with_parts(Arc::new(PolicyStore::new()), Arc::new(AppRegistry::new()))
    }

    /// Create around an existing store and registry
    pub fn with_parts(store: Arc<PolicyStore>, registry: Arc<AppRegistry>) -> Self {
        Self {
            store,
            registry,
            base: BaseConfig::default(),
            counters: Counters::default(),
        }
    }

    /// Create from configuration, loading the feature file when present
    pub fn from_config(config: &EngineConfig) -> PcResult<Self> {
        let engine = Self::new();
        engine.base.set(config.drop_anonymous, config.src_dev.clone());

        if config.feature_file.exists() {
            engine.registry.load_file(&config.feature_file)?;
        } else {
            tracing::warn!(path = %config.feature_file.display(), "Feature file not found, no apps loaded");
        }
        Ok(engine)
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<AppRegistry> {
        &self.registry
    }

    pub fn base(&self) -> &BaseConfig {
        &self.base
    }

    /// Apply a decoded command
    pub fn apply_command(&self, command: Command) -> PcResult<CommandOutcome> {
        command.apply(&self.store, &self.base)
    }

    /// Decode and apply a JSON command document
    pub fn apply_json(&self, input: &str) -> PcResult<CommandOutcome> {
        let command = Command::from_json(input).map_err(|e| {
            tracing::error!(error = %e, "Rejected command");
            e
        })?;
        self.apply_command(command)
    }

    /// Decide the fate of one packet
    #[inline]
    pub fn decide(&self, packet: &Packet<'_>) -> Decision {
        bump(&self.counters.packets);
        let decision = self.evaluate(packet);
        if decision.is_drop() {
            bump(&self.counters.dropped);
        } else {
            bump(&self.counters.accepted);
        }
        tracing::debug!(
            mac = %packet.src_mac,
            verdict = ?decision.verdict,
            reason = ?decision.reason,
            app_id = ?decision.app_id,
            "Packet decision"
        );
        decision
    }

    fn evaluate(&self, packet: &Packet<'_>) -> Decision {
        if !self.base.polices(packet.in_dev) {
            return Decision::accept(DecisionReason::InterfaceNotPoliced);
        }
        let mac = packet.src_mac;
        if mac.is_zero() || mac.is_broadcast() {
            return Decision::accept(DecisionReason::SpecialMac);
        }

        // Locks are released once the rule is resolved
        let (rule, action) = self.store.get_policy_for_mac(&mac, self.base.drop_anonymous());
        if !action.needs_inspection() {
            return match action {
                Action::Drop => Decision::drop(DecisionReason::RuleDrop),
                Action::DropAnonymous if packet.conn_state.is_tracked() => {
                    Decision::accept(DecisionReason::AnonymousTracked)
                }
                Action::DropAnonymous => Decision::drop(DecisionReason::Anonymous),
                _ if rule.is_some() => Decision::accept(DecisionReason::RuleAccept),
                _ => Decision::accept(DecisionReason::NoRule),
            };
        }
        let Some(rule) = rule else {
            return Decision::accept(DecisionReason::NoRule);
        };

        let mut flow = match FlowView::parse_ipv4(mac, packet.ip) {
            Ok(flow) => flow,
            Err(e) => {
                tracing::trace!(mac = %mac, error = %e, "Skipping inspection");
                return Decision::accept(DecisionReason::Unparsed);
            }
        };
        bump(&self.counters.inspected);
        flow.inspect();

        if rule.blacklist.iter().any(|sig| match_one(&flow, sig)) {
            bump(&self.counters.blacklist_hits);
            return Decision::drop(DecisionReason::Blacklisted);
        }

        let apps = self.registry.snapshot();
        let Some(sig) = first_match(&apps, &flow, |sig| rule.covers(sig)) else {
            return Decision::accept(DecisionReason::NoAppMatch);
        };
        bump(&self.counters.app_matches);
        flow.matched_app_id = Some(sig.app_id);
        flow.drop = rule.action == Action::PolicyDrop;

        Decision {
            verdict: if flow.drop { Verdict::Drop } else { Verdict::Accept },
            app_id: flow.matched_app_id,
            reason: DecisionReason::AppMatched,
        }
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            packets: c.packets.load(Ordering::Relaxed),
            accepted: c.accepted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            inspected: c.inspected.load(Ordering::Relaxed),
            blacklist_hits: c.blacklist_hits.load(Ordering::Relaxed),
            app_matches: c.app_matches.load(Ordering::Relaxed),
            apps_loaded: self.registry.len(),
            rules: self.store.rule_count(),
            groups: self.store.group_count(),
        }
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub packets: u64,
    pub accepted: u64,
    pub dropped: u64,
    pub inspected: u64,
    pub blacklist_hits: u64,
    pub app_matches: u64,
    pub apps_loaded: usize,
    pub rules: usize,
    pub groups: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;
    use crate::rule::Rule;
    use pc_dpi::parse_feature;
    use std::io::Write;

    const MAC: MacAddr = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

    fn ipv4(protocol: u8, l4: &[u8]) -> Vec<u8> {
        let total = (20 + l4.len()) as u16;
        let mut packet = vec![0x45, 0x00];
        packet.extend_from_slice(&total.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0x40, 0x00, 64, protocol, 0, 0]);
        packet.extend_from_slice(&[192, 168, 8, 100, 1, 1, 1, 1]);
        packet.extend_from_slice(l4);
        packet
    }

    fn tcp(dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut l4 = Vec::new();
        l4.extend_from_slice(&40000u16.to_be_bytes());
        l4.extend_from_slice(&dst_port.to_be_bytes());
        l4.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0, 0x50, 0x18, 0xff, 0xff, 0, 0, 0, 0]);
        l4.extend_from_slice(payload);
        ipv4(6, &l4)
    }

    fn udp(dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut l4 = Vec::new();
        l4.extend_from_slice(&40000u16.to_be_bytes());
        l4.extend_from_slice(&dst_port.to_be_bytes());
        l4.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        l4.extend_from_slice(&[0, 0]);
        l4.extend_from_slice(payload);
        ipv4(17, &l4)
    }

    fn packet<'a>(ip: &'a [u8], state: ConnState) -> Packet<'a> {
        Packet {
            in_dev: Some("br-lan"),
            src_mac: MAC,
            conn_state: state,
            ip,
        }
    }

    fn engine_with_rule(rule: Rule) -> DecisionEngine {
        let engine = DecisionEngine::new();
        let id = rule.id.clone();
        engine.store().add_rule(rule).unwrap();
        engine
            .store()
            .add_group(Group::new("kids", vec![MAC], Some(id)))
            .unwrap();
        engine
    }

    #[test]
    fn test_blacklist_drops_tcp_443_only() {
        let blacklist = vec![parse_feature(pc_common::BLIST_ID, "blacklist", "tcp;;443;;;").unwrap()];
        let engine = engine_with_rule(Rule::new("r1", Action::PolicyDrop).with_blacklist(blacklist));

        let https = tcp(443, b"\x16\x03\x01hello");
        let decision = engine.decide(&packet(&https, ConnState::New));
        assert_eq!(decision.verdict, Verdict::Drop);
        assert_eq!(decision.reason, DecisionReason::Blacklisted);

        let quic = udp(443, b"quic");
        let decision = engine.decide(&packet(&quic, ConnState::New));
        assert_eq!(decision.verdict, Verdict::Accept);
        assert_eq!(decision.reason, DecisionReason::NoAppMatch);

        let stats = engine.stats();
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.blacklist_hits, 1);
        assert_eq!(stats.inspected, 2);
    }

    #[test]
    fn test_policy_drop_by_class() {
        let engine = engine_with_rule(Rule::new("r1", Action::PolicyDrop).with_apps([2]));
        engine
            .registry()
            .load_str("2001 video:[tcp;;80;;/watch;]\n3001 other:[tcp;;80;;;]\n")
            .unwrap();

        let watch = tcp(80, b"GET /watch?v=1 HTTP/1.1\r\nHost: v.com\r\n\r\n");
        let decision = engine.decide(&packet(&watch, ConnState::New));
        assert_eq!(decision.verdict, Verdict::Drop);
        assert_eq!(decision.app_id, Some(2001));

        // 3001 matches on ports but is not covered by the rule
        let other = tcp(80, b"GET /other HTTP/1.1\r\nHost: o.com\r\n\r\n");
        let decision = engine.decide(&packet(&other, ConnState::New));
        assert_eq!(decision.verdict, Verdict::Accept);
        assert_eq!(decision.reason, DecisionReason::NoAppMatch);

        let stats = engine.stats();
        assert_eq!((stats.app_matches, stats.dropped, stats.accepted), (1, 1, 1));
        assert_eq!(stats.apps_loaded, 2);
    }

    #[test]
    fn test_policy_accept_match() {
        let engine = engine_with_rule(Rule::new("r1", Action::PolicyAccept).with_apps([1001]));
        engine.registry().load_str("1001 example:[tcp;;443;example\\.com;;]").unwrap();

        let mut hello = vec![0x16, 0x03, 0x01, 0x02, 0x00, 0, 0, 0, 0x0e, 0, 0x0c, 0, 0, 0x0b];
        hello.extend_from_slice(b"example.com");
        let ip = tcp(443, &hello);
        let decision = engine.decide(&packet(&ip, ConnState::New));
        assert_eq!(decision.verdict, Verdict::Accept);
        assert_eq!(decision.reason, DecisionReason::AppMatched);
        assert_eq!(decision.app_id, Some(1001));
    }

    #[test]
    fn test_fast_paths() {
        let engine = engine_with_rule(Rule::new("r1", Action::Drop));
        let ip = tcp(443, b"x");
        assert_eq!(engine.decide(&packet(&ip, ConnState::New)).reason, DecisionReason::RuleDrop);

        let mut zero = packet(&ip, ConnState::New);
        zero.src_mac = MacAddr::ZERO;
        assert_eq!(engine.decide(&zero).reason, DecisionReason::SpecialMac);
        zero.src_mac = MacAddr::BROADCAST;
        assert_eq!(engine.decide(&zero).verdict, Verdict::Accept);

        engine.store().set_rule(Rule::new("r1", Action::Accept)).unwrap();
        assert_eq!(engine.decide(&packet(&ip, ConnState::New)).reason, DecisionReason::RuleAccept);
    }

    #[test]
    fn test_anonymous_devices() {
        let engine = DecisionEngine::new();
        let ip = tcp(443, b"x");
        assert_eq!(engine.decide(&packet(&ip, ConnState::New)).reason, DecisionReason::NoRule);

        engine.base().set(true, String::new());
        assert_eq!(engine.decide(&packet(&ip, ConnState::New)).verdict, Verdict::Drop);
        for state in [ConnState::Established, ConnState::Related, ConnState::Reply] {
            let decision = engine.decide(&packet(&ip, state));
            assert_eq!(decision.reason, DecisionReason::AnonymousTracked);
        }
    }

    #[test]
    fn test_interface_filter() {
        let engine = engine_with_rule(Rule::new("r1", Action::Drop));
        engine.base().set(false, "eth1  br-lan".into());
        let ip = tcp(443, b"x");

        assert!(engine.decide(&packet(&ip, ConnState::New)).is_drop());

        let mut wan = packet(&ip, ConnState::New);
        wan.in_dev = Some("eth0");
        assert_eq!(engine.decide(&wan).reason, DecisionReason::InterfaceNotPoliced);
        wan.in_dev = None;
        assert_eq!(engine.decide(&wan).reason, DecisionReason::InterfaceNotPoliced);
    }

    #[test]
    fn test_unparsable_packet_accepted() {
        let engine = engine_with_rule(Rule::new("r1", Action::PolicyDrop).with_apps([1001]));
        let icmp = ipv4(1, &[8, 0, 0, 0, 0, 0, 0, 0]);
        let decision = engine.decide(&packet(&icmp, ConnState::New));
        assert_eq!(decision.reason, DecisionReason::Unparsed);
        assert_eq!(engine.decide(&packet(&[0x45], ConnState::New)).verdict, Verdict::Accept);
    }

    #[test]
    fn test_apply_json_commands() {
        let engine = DecisionEngine::new();
        engine
            .apply_json(r#"{"op":1,"data":{"rules":[{"id":"r1","action":0}]}}"#)
            .unwrap();
        engine
            .apply_json(r#"{"op":2,"data":{"groups":[{"id":"g1","rule":"r1","macs":["AA:BB:CC:DD:EE:FF"]}]}}"#)
            .unwrap();
        let ip = tcp(80, b"x");
        assert!(engine.decide(&packet(&ip, ConnState::New)).is_drop());

        assert!(engine.apply_json(r#"{"op":42}"#).is_err());
        engine.apply_json(r#"{"op":4}"#).unwrap();
        assert!(!engine.decide(&packet(&ip, ConnState::New)).is_drop());
    }

    #[test]
    fn test_rejected_command_leaves_state_unchanged() {
        let engine = DecisionEngine::new();
        engine
            .apply_json(r#"{"op":1,"data":{"rules":[{"id":"r1","action":0}]}}"#)
            .unwrap();
        engine
            .apply_json(r#"{"op":2,"data":{"groups":[{"id":"g1","rule":"r1","macs":["aa:bb:cc:dd:ee:ff"]}]}}"#)
            .unwrap();

        let bad = [
            r#"{"op":1,"data":{"rules":[{"id":"r2","action":1},{"id":"r3","action":9}]}}"#,
            r#"{"op":2,"data":{"groups":[{"id":"g2","rule":"r1","macs":[]},{"rule":"r1"}]}}"#,
            r#"{"op":6,"data":{"groups":[{"id":"g1"}]}}"#,
        ];
        for json in bad {
            assert!(engine.apply_json(json).is_err(), "{json}");
            assert_eq!(engine.store().rule_count(), 1);
            assert_eq!(engine.store().group_count(), 1);
            assert_eq!(engine.store().rule_reference_count("r1"), Some(1));
        }
        let ip = tcp(80, b"x");
        assert!(engine.decide(&packet(&ip, ConnState::New)).is_drop());
    }

    #[test]
    fn test_from_config_loads_features() {
        let mut features = tempfile::NamedTempFile::new().unwrap();
        writeln!(features, "1001 example:[tcp;;443;example\\.com;;]").unwrap();

        let config = EngineConfig {
            feature_file: features.path().to_path_buf(),
            drop_anonymous: true,
            src_dev: "br-lan".into(),
        };
        let engine = DecisionEngine::from_config(&config).unwrap();
        assert_eq!(engine.registry().len(), 1);
        assert!(engine.base().drop_anonymous());
        assert_eq!(engine.base().src_dev(), "br-lan");
    }

    #[test]
    fn test_from_config_without_feature_file() {
        let config = EngineConfig {
            feature_file: "/nonexistent/pc_app_feature.cfg".into(),
            ..Default::default()
        };
        let engine = DecisionEngine::from_config(&config).unwrap();
        assert!(engine.registry().is_empty());
    }
}
