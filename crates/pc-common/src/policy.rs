//! Policy actions
//!
//! A rule carries one action. `Drop` and `Accept` are unconditional;
//! the two `Policy*` actions require deep inspection and only apply to
//! traffic that matches one of the rule's applications.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    /// Drop everything from the device
    Drop = 0,
    /// Accept everything from the device
    Accept = 1,
    /// Drop traffic matching a listed app, accept the rest
    PolicyDrop = 2,
    /// Accept traffic matching a listed app, accept the rest
    PolicyAccept = 3,
    /// Device in no group while anonymous devices are dropped
    DropAnonymous = 4,
}

impl Default for Action {
    fn default() -> Self {
        Self::Accept
    }
}

impl Action {
    /// Decode a control-plane action value. `DropAnonymous` is never
    /// accepted from the wire.
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Drop),
            1 => Some(Self::Accept),
            2 => Some(Self::PolicyDrop),
            3 => Some(Self::PolicyAccept),
            _ => None,
        }
    }

    /// Wire value
    #[inline(always)]
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Whether this action needs payload inspection
    #[inline(always)]
    pub fn needs_inspection(&self) -> bool {
        matches!(self, Self::PolicyDrop | Self::PolicyAccept)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => write!(f, "DROP"),
            Self::Accept => write!(f, "ACCEPT"),
            Self::PolicyDrop => write!(f, "POLICY_DROP"),
            Self::PolicyAccept => write!(f, "POLICY_ACCEPT"),
            Self::DropAnonymous => write!(f, "DROP_ANONYMOUS"),
        }
    }
}
