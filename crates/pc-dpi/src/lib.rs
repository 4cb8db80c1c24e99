//! Parental Control DPI
//!
//! Application classification for the per-packet policy engine.
//!
//! ## Components
//!
//! - **Signature Parser**: turns feature-list lines into [`AppSignature`]s
//! - **App Registry**: insertion-ordered signatures shared with the hot path
//! - **Protocol Extractors**: single-packet HTTP request and TLS SNI views
//! - **Flow Matcher**: port, protocol, URL and byte-position matching
//!
//! Extraction never allocates and never fails: a payload that does not
//! look like HTTP or TLS simply yields no view. Traffic split across
//! segments is not reassembled.

pub mod flow;
pub mod matcher;
pub mod parser;
pub mod protocols;
pub mod registry;
pub mod signature;

pub use flow::FlowView;
pub use matcher::{first_match, match_by_position, match_by_url, match_one, match_port};
pub use parser::{parse_feature, parse_line};
pub use protocols::{extract_http, extract_tls_sni, HttpMethod, HttpView, TlsView};
pub use registry::{AppRegistry, LoadReport};
pub use signature::{AppSignature, BytePosition, Pattern, PortRange, Protocol};

use pc_common::PcError;
use thiserror::Error;

/// DPI errors
#[derive(Error, Debug)]
pub enum DpiError {
    #[error("malformed feature {feature:?}: {reason}")]
    Malformed { feature: String, reason: &'static str },

    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),

    #[error("invalid pattern {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid feature line: {0}")]
    InvalidLine(&'static str),

    #[error("truncated {0} header")]
    Truncated(&'static str),

    #[error("unsupported packet: {0}")]
    UnsupportedPacket(&'static str),
}

pub type Result<T> = std::result::Result<T, DpiError>;

impl From<DpiError> for PcError {
    fn from(err: DpiError) -> Self {
        PcError::Parse(err.to_string())
    }
}
