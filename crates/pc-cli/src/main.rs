//! Parental Control CLI
//!
//! Builds an engine from a config file, a feature list and a file of
//! control-plane commands, then prints its tables or evaluates a packet.
//!
//! # Usage
//!
//! ```bash
//! pcctl --features pc_app_feature.cfg apps
//! pcctl --commands policy.jsonl rules --format json
//! pcctl --features pc_app_feature.cfg --commands policy.jsonl \
//!     check --mac aa:bb:cc:dd:ee:ff --in-dev br-lan --hex 4500...
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pc_common::{ConnState, EngineConfig, MacAddr};
use pc_policy::{report, BaseConfig, DecisionEngine, Packet};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod output;

use output::OutputFormat;

#[derive(Parser)]
#[command(name = "pcctl")]
#[command(version)]
#[command(about = "Parental-control engine tool", long_about = None)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, env = "PCCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Feature list, overrides the config's feature_file
    #[arg(long, env = "PCCTL_FEATURES")]
    features: Option<PathBuf>,

    /// Control-plane commands, one JSON document per line
    #[arg(long)]
    commands: Option<PathBuf>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show loaded application signatures
    Apps,
    /// Show rules with reference counts and blacklists
    Rules,
    /// Show device groups
    Groups,
    /// Show base configuration
    Base,
    /// Show engine statistics
    Stats,
    /// Evaluate one IPv4 packet
    Check {
        /// Source MAC address
        #[arg(long)]
        mac: MacAddr,
        /// Ingress interface
        #[arg(long)]
        in_dev: Option<String>,
        /// Connection-tracking state
        #[arg(long, default_value = "new")]
        state: ConnState,
        /// IPv4 datagram as hex
        #[arg(long)]
        hex: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so tables and JSON stay clean on stdout
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let engine = build_engine(cli.config.as_deref(), cli.features.as_deref())?;
    if let Some(path) = &cli.commands {
        let applied = apply_commands_file(&engine, path)?;
        tracing::info!(path = %path.display(), applied, "Applied commands");
    }

    match cli.command {
        Commands::Apps => cli.format.print(
            || report::apps_table(engine.registry()),
            &report::app_rows(engine.registry()),
        ),
        Commands::Rules => cli.format.print(
            || report::rules_table(engine.store()),
            &report::rule_rows(engine.store()),
        ),
        Commands::Groups => cli.format.print(
            || report::groups_table(engine.store()),
            &report::group_rows(engine.store()),
        ),
        Commands::Base => {
            let row = report::BaseRow::from(engine.base());
            cli.format.print(|| base_table(engine.base()), &row)
        }
        Commands::Stats => {
            let stats = engine.stats();
            cli.format.print(|| format!("{stats:#?}\n"), &stats)
        }
        Commands::Check { mac, in_dev, state, hex } => {
            let ip = decode_hex(&hex)?;
            let decision = engine.decide(&Packet {
                in_dev: in_dev.as_deref(),
                src_mac: mac,
                conn_state: state,
                ip: &ip,
            });
            cli.format.print(
                || {
                    let app = decision.app_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
                    format!("{:?}\t{:?}\t{}\n", decision.verdict, decision.reason, app)
                },
                &decision,
            )
        }
    }
}

/// Load the config (or defaults) and build the engine
fn build_engine(config: Option<&Path>, features: Option<&Path>) -> anyhow::Result<DecisionEngine> {
    let mut config = match config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(features) = features {
        if !features.exists() {
            bail!("feature file {} not found", features.display());
        }
        config.feature_file = features.to_path_buf();
    }
    DecisionEngine::from_config(&config).context("failed to build engine")
}

fn apply_commands_file(engine: &DecisionEngine, path: &Path) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read commands {}", path.display()))?;
    apply_commands(engine, &content)
}

/// Apply one JSON command per line. Blank lines and `#` comments are
/// ignored; the first rejected command aborts.
fn apply_commands(engine: &DecisionEngine, content: &str) -> anyhow::Result<usize> {
    let mut applied = 0;
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let outcome = engine
            .apply_json(line)
            .with_context(|| format!("command on line {} rejected", index + 1))?;
        for id in &outcome.missing {
            tracing::warn!(line = index + 1, id = %id, "Command referenced unknown id");
        }
        applied += 1;
    }
    Ok(applied)
}

fn decode_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_ascii_whitespace() && *c != ':').collect();
    hex::decode(&cleaned).context("invalid packet hex")
}

fn base_table(base: &BaseConfig) -> String {
    format!(
        "drop_anonymous\t{}\nsrc_dev\t{}\n",
        if base.drop_anonymous() { "YES" } else { "NO" },
        base.src_dev()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pc_policy::Verdict;
    use std::io::Write;

    const COMMANDS: &str = r#"
# base, rules, groups
{"op":0,"data":{"drop_anonymous":false,"src_dev":"br-lan"}}
{"op":1,"data":{"rules":[{"id":"r1","action":2,"apps":[1001]}]}}
{"op":2,"data":{"groups":[{"id":"g1","rule":"r1","macs":["aa:bb:cc:dd:ee:ff"]}]}}
"#;

    #[test]
    fn test_apply_commands() {
        let engine = DecisionEngine::new();
        assert_eq!(apply_commands(&engine, COMMANDS).unwrap(), 3);
        assert_eq!(engine.store().rule_count(), 1);
        assert_eq!(engine.store().rule_reference_count("r1"), Some(1));
        assert_eq!(engine.base().src_dev(), "br-lan");
    }

    #[test]
    fn test_apply_commands_stops_on_error() {
        let engine = DecisionEngine::new();
        let err = apply_commands(&engine, "{\"op\":3}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_check_against_built_engine() {
        let mut features = tempfile::NamedTempFile::new().unwrap();
        writeln!(features, "1001 example:[tcp;;80;example\\.com;;]").unwrap();

        let engine = build_engine(None, Some(features.path())).unwrap();
        apply_commands(&engine, COMMANDS).unwrap();

        let payload = b"GET / HTTP/1.1\r\nHost: www.example.com\r\n\r\n";
        let mut ip = vec![0x45, 0x00];
        ip.extend_from_slice(&((40 + payload.len()) as u16).to_be_bytes());
        ip.extend_from_slice(&[0, 0, 0x40, 0x00, 64, 6, 0, 0, 192, 168, 8, 100, 93, 184, 216, 34]);
        ip.extend_from_slice(&[0x9c, 0x40, 0x00, 0x50, 0, 0, 0, 1, 0, 0, 0, 0, 0x50, 0x18, 0xff, 0xff, 0, 0, 0, 0]);
        ip.extend_from_slice(payload);

        let ip = decode_hex(&hex::encode(&ip)).unwrap();
        let decision = engine.decide(&Packet {
            in_dev: Some("br-lan"),
            src_mac: "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            conn_state: ConnState::New,
            ip: &ip,
        });
        assert_eq!(decision.verdict, Verdict::Drop);
        assert_eq!(decision.app_id, Some(1001));
    }

    #[test]
    fn test_missing_feature_file_rejected() {
        assert!(build_engine(None, Some(Path::new("/nonexistent/features.cfg"))).is_err());
    }

    #[test]
    fn test_decode_hex_ignores_separators() {
        assert_eq!(decode_hex("45 00:01").unwrap(), vec![0x45, 0x00, 0x01]);
        assert!(decode_hex("4").is_err());
    }

    #[test]
    fn test_base_table() {
        let base = BaseConfig::new(true, "br-lan");
        assert_eq!(base_table(&base), "drop_anonymous\tYES\nsrc_dev\tbr-lan\n");
    }
}
