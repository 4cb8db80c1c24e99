//! Parental Control Common - Shared types for the classification engine
//!
//! This crate provides the primitives every other crate in the workspace
//! agrees on:
//! - Device identity (`MacAddr`) and flow metadata (`L4Protocol`, `ConnState`)
//! - Policy actions and their wire values
//! - Engine configuration
//! - Error handling
//!
//! # Limits
//!
//! The bounds below mirror the fixed-size fields of the deployed feature
//! file and control-plane schema. Strings longer than a bound are
//! truncated, collections longer than a bound are cut short.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod flow;
pub mod policy;

pub use config::*;
pub use error::*;
pub use flow::*;
pub use policy::*;

/// Sentinel app id carried by inline blacklist signatures
pub const BLIST_ID: u32 = 0xFFFF_FFFF;
/// App ids are grouped in classes of this size (`app_id / MAX_APP_IN_CLASS`)
pub const MAX_APP_IN_CLASS: u32 = 1000;
/// Application names are stored in buffers of this size
pub const MAX_APP_NAME_LEN: usize = 64;
/// Feature strings at or below this length are accepted with missing fields
pub const MIN_FEATURE_STR_LEN: usize = 8;
/// Host pattern buffer size
pub const MAX_HOST_URL_LEN: usize = 254;
/// Request pattern buffer size
pub const MAX_REQUEST_URL_LEN: usize = 128;
/// Destination port ranges kept per signature
pub const MAX_PORT_RANGE_NUM: usize = 5;
/// Byte positions kept per signature
pub const MAX_POS_INFO_PER_FEATURE: usize = 16;
/// Feature-list lines shorter than this are skipped
pub const MIN_FEATURE_LINE_LEN: usize = 16;
/// Feature-list lines longer than this are skipped
pub const MAX_FEATURE_LINE_LEN: usize = 256;
/// Candidate host/url buffer size for regex matching
pub const MAX_URL_MATCH_LEN: usize = 64;
/// HTTP inspection needs at least this many payload bytes
pub const MIN_HTTP_DATA_LEN: usize = 16;
/// Offset of the SNI length field from the `00 00 00 XX` marker
pub const HTTPS_LEN_OFFSET: usize = 7;
/// Offset of the SNI host name from the `00 00 00 XX` marker
pub const HTTPS_URL_OFFSET: usize = 9;
/// Rule id buffer size
pub const RULE_ID_SIZE: usize = 32;
/// Group id buffer size
pub const GROUP_ID_SIZE: usize = 32;
/// Source device list buffer size
pub const MAX_SRC_DEVNAME_SIZE: usize = 129;

/// Truncate `s` to at most `max` bytes without splitting a character.
pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
