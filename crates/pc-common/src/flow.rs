//! Network flow types for per-packet classification
//!
//! Device identity and the connection metadata the forwarding hook hands
//! to the engine alongside each packet.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::PcError;

/// 6-byte hardware address identifying a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// All-zero address
    pub const ZERO: Self = Self([0; 6]);
    /// Broadcast address
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// Create from raw octets
    #[inline(always)]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Raw octets
    #[inline(always)]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// True for 00:00:00:00:00:00
    #[inline(always)]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// True for ff:ff:ff:ff:ff:ff
    #[inline(always)]
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }
}

impl FromStr for MacAddr {
    type Err = PcError;

    /// Parse `xx:xx:xx:xx:xx:xx` (one or two hex digits per octet, any case)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| PcError::Parse(format!("short mac address: {s}")))?;
            if part.is_empty() || part.len() > 2 {
                return Err(PcError::Parse(format!("invalid mac octet {part:?} in {s}")));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| PcError::Parse(format!("invalid mac octet {part:?} in {s}")))?;
        }
        if parts.next().is_some() {
            return Err(PcError::Parse(format!("long mac address: {s}")));
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Layer-4 protocol of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L4Protocol {
    /// TCP (6)
    Tcp,
    /// UDP (17)
    Udp,
    /// Anything else, by IP protocol number
    Other(u8),
}

impl L4Protocol {
    /// Map an IP protocol number
    #[inline(always)]
    pub const fn from_raw(value: u8) -> Self {
        match value {
            6 => Self::Tcp,
            17 => Self::Udp,
            other => Self::Other(other),
        }
    }

    /// IP protocol number
    #[inline(always)]
    pub const fn as_u8(&self) -> u8 {
        match *self {
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Other(v) => v,
        }
    }
}

impl fmt::Display for L4Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Other(v) => write!(f, "ip-proto-{}", v),
        }
    }
}

/// Connection-tracking state reported by the forwarding hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    /// First packet of a connection (or untracked)
    #[default]
    New,
    /// Part of an established connection
    Established,
    /// Related to an existing connection (e.g. ICMP error, FTP data)
    Related,
    /// Reply direction of a tracked connection
    Reply,
}

impl ConnState {
    /// Traffic belonging to a connection that was already let through
    #[inline(always)]
    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Established | Self::Related | Self::Reply)
    }
}

impl FromStr for ConnState {
    type Err = PcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "established" => Ok(Self::Established),
            "related" => Ok(Self::Related),
            "reply" => Ok(Self::Reply),
            other => Err(PcError::Parse(format!("unknown connection state {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "AA:bb:0C:d:EE:ff".parse().unwrap();
        assert_eq!(mac.octets(), [0xaa, 0xbb, 0x0c, 0x0d, 0xee, 0xff]);
        assert_eq!(mac.to_string(), "aa:bb:0c:0d:ee:ff");
    }

    #[test]
    fn test_mac_rejects_malformed() {
        assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:fg".parse::<MacAddr>().is_err());
        assert!("aaa:bb:cc:dd:ee:ff".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_special_addresses() {
        assert!(MacAddr::ZERO.is_zero());
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(!MacAddr::new([0, 0, 0, 0, 0, 1]).is_zero());
    }

    #[test]
    fn test_mac_serde_as_string() {
        let mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"aa:bb:cc:dd:ee:ff\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    #[test]
    fn test_protocol_numbers() {
        assert_eq!(L4Protocol::from_raw(6), L4Protocol::Tcp);
        assert_eq!(L4Protocol::from_raw(17), L4Protocol::Udp);
        assert_eq!(L4Protocol::from_raw(1), L4Protocol::Other(1));
        assert_eq!(L4Protocol::Udp.as_u8(), 17);
    }

    #[test]
    fn test_conn_state_tracking() {
        assert!(!ConnState::New.is_tracked());
        assert!(ConnState::Established.is_tracked());
        assert!(ConnState::Related.is_tracked());
        assert!(ConnState::Reply.is_tracked());
        assert_eq!("Reply".parse::<ConnState>().unwrap(), ConnState::Reply);
    }
}
