//! Application signatures
//!
//! One [`AppSignature`] describes one identifiable network pattern of an
//! application. An app with several patterns is registered as several
//! signatures sharing the same id.

use pc_common::{L4Protocol, BLIST_ID, MAX_APP_IN_CLASS};
use regex::bytes::Regex;
use std::fmt;

use crate::{DpiError, Result};

/// Protocol constraint of a signature
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    Tcp,
    Udp,
    #[default]
    Any,
}

impl Protocol {
    /// Parse a feature-string protocol token (only `tcp` and `udp`)
    pub fn from_token(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            _ => None,
        }
    }

    /// Whether a packet protocol satisfies this constraint
    #[inline(always)]
    pub fn accepts(&self, proto: L4Protocol) -> bool {
        match self {
            Self::Any => true,
            Self::Tcp => proto == L4Protocol::Tcp,
            Self::Udp => proto == L4Protocol::Udp,
        }
    }

    /// IP protocol number, 0 for any
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Any => 0,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// Inclusive destination port range, optionally negated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub negate: bool,
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Range `[start, end]`
    pub const fn new(start: u16, end: u16) -> Self {
        Self { negate: false, start, end }
    }

    /// Negated range `![start, end]`
    pub const fn not(start: u16, end: u16) -> Self {
        Self { negate: true, start, end }
    }

    /// Whether `port` lies inside the range, ignoring negation
    #[inline(always)]
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            write!(f, "!")?;
        }
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Expected byte at a payload offset. Negative offsets count from the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BytePosition {
    pub position: i32,
    pub expected: u8,
}

impl BytePosition {
    pub const fn new(position: i32, expected: u8) -> Self {
        Self { position, expected }
    }

    /// Resolve to an index into a payload of `len` bytes
    #[inline(always)]
    pub fn resolve(&self, len: usize) -> Option<usize> {
        let index = if self.position < 0 {
            len as i64 + self.position as i64
        } else {
            self.position as i64
        };
        if index < 0 || index >= len as i64 {
            return None;
        }
        Some(index as usize)
    }
}

impl fmt::Display for BytePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02x}", self.position, self.expected)
    }
}

/// Compiled host or request pattern, keeping its source text
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(source).map_err(|source_err| DpiError::Regex {
            pattern: source.to_string(),
            source: source_err,
        })?;
        Ok(Self { source: source.to_string(), regex })
    }

    /// Pattern source text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Unanchored search
    #[inline]
    pub fn is_match(&self, text: &[u8]) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

/// One application pattern
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppSignature {
    /// App id; `app_id / MAX_APP_IN_CLASS` is its class id
    pub app_id: u32,

    /// Display name
    pub name: String,

    /// Protocol constraint
    pub protocol: Protocol,

    /// Required source port
    pub source_port: Option<u16>,

    /// Destination port ranges; empty matches every port
    pub dest_port_ranges: Vec<PortRange>,

    /// Matched against the TLS server name or HTTP host
    pub host_pattern: Option<Pattern>,

    /// Matched against the HTTP request line
    pub request_pattern: Option<Pattern>,

    /// Byte checks, all of which must hold
    pub byte_positions: Vec<BytePosition>,
}

impl AppSignature {
    /// Signature matching on protocol alone
    pub fn new(app_id: u32, name: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            app_id,
            name: name.into(),
            protocol,
            source_port: None,
            dest_port_ranges: Vec::new(),
            host_pattern: None,
            request_pattern: None,
            byte_positions: Vec::new(),
        }
    }

    /// Class id of this app
    #[inline(always)]
    pub fn class_id(&self) -> u32 {
        self.app_id / MAX_APP_IN_CLASS
    }

    /// Inline blacklist entry
    pub fn is_blacklist(&self) -> bool {
        self.app_id == BLIST_ID
    }

    /// Host or request pattern configured
    #[inline(always)]
    pub fn uses_url(&self) -> bool {
        self.host_pattern.is_some() || self.request_pattern.is_some()
    }

    /// Render back into the `proto;sport;dports;host;request;positions`
    /// feature-string form
    pub fn to_feature_string(&self) -> String {
        let sport = self.source_port.map(|p| p.to_string()).unwrap_or_default();
        let dports = join(&self.dest_port_ranges, "|");
        let host = self.host_pattern.as_ref().map(Pattern::as_str).unwrap_or("");
        let request = self.request_pattern.as_ref().map(Pattern::as_str).unwrap_or("");
        let positions = join(&self.byte_positions, "|");
        format!("{};{};{};{};{};{}", self.protocol, sport, dports, host, request, positions)
    }
}

fn join<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(sep)
}
