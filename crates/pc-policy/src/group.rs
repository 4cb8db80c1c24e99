//! Device groups

use pc_common::MacAddr;

/// Set of devices sharing one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Group ID
    pub id: String,
    /// Member hardware addresses
    pub macs: Vec<MacAddr>,
    /// Bound rule id; `None` when the rule was missing at bind time or
    /// has been cleaned
    pub rule: Option<String>,
}

impl Group {
    /// Create group bound to `rule`
    pub fn new(id: impl Into<String>, macs: Vec<MacAddr>, rule: Option<String>) -> Self {
        Self {
            id: id.into(),
            macs,
            rule,
        }
    }

    /// Membership test
    #[inline]
    pub fn contains(&self, mac: &MacAddr) -> bool {
        self.macs.contains(mac)
    }
}
