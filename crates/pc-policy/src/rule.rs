//! Policy rules

use pc_common::{Action, MAX_APP_IN_CLASS};
use pc_dpi::AppSignature;

/// Rule bound to device groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Rule ID
    pub id: String,
    /// Action for devices bound to this rule
    pub action: Action,
    /// App or class ids the action applies to, in configuration order
    pub apps: Vec<u32>,
    /// Inline signatures checked before the app list; a match always drops
    pub blacklist: Vec<AppSignature>,
}

impl Rule {
    /// Create rule without apps or blacklist
    pub fn new(id: impl Into<String>, action: Action) -> Self {
        Self {
            id: id.into(),
            action,
            apps: Vec::new(),
            blacklist: Vec::new(),
        }
    }

    /// Set the app list
    pub fn with_apps(mut self, apps: impl IntoIterator<Item = u32>) -> Self {
        self.apps = apps.into_iter().collect();
        self
    }

    /// Set the inline blacklist
    pub fn with_blacklist(mut self, blacklist: Vec<AppSignature>) -> Self {
        self.blacklist = blacklist;
        self
    }

    /// Whether the app list covers `sig`, either by its id or by its class.
    ///
    /// Ids below `MAX_APP_IN_CLASS` are class ids and never belong to a
    /// rule themselves; inline blacklist entries are never covered.
    #[inline]
    pub fn covers(&self, sig: &AppSignature) -> bool {
        if sig.app_id < MAX_APP_IN_CLASS || sig.is_blacklist() {
            return false;
        }
        self.apps.contains(&sig.app_id) || self.apps.contains(&sig.class_id())
    }
}
