//! Parental Control Policy Engine
//!
//! Maps devices to rules and decides the fate of each forwarded packet.
//!
//! # Architecture
//!
//! ```text
//!  control plane                 forwarding hook
//!  ─────────────                 ───────────────
//!  JSON ──► Command ──► PolicyStore ◄── DecisionEngine::decide(Packet)
//!                         │  groups: MAC ─► rule id           │
//!                         │  rules:  Arc<Rule> + refcount     │
//!                         ▼                                   ▼
//!                      report tables              AppRegistry snapshot
//!                                                 + HTTP/TLS extraction
//! ```
//!
//! Rules and groups each sit behind their own lock. Whenever both are
//! held, groups are locked first.

pub mod command;
pub mod engine;
pub mod group;
pub mod report;
pub mod rule;
pub mod store;

pub use command::{Command, CommandOutcome, GroupSpec, RuleSpec};
pub use engine::{BaseConfig, Decision, DecisionEngine, DecisionReason, EngineStats, Packet, Verdict};
pub use group::Group;
pub use rule::Rule;
pub use store::{PolicyStore, RuleEntry};
