//! Rule and group store
//!
//! Rules and groups live in two insertion-ordered vectors, each behind its
//! own lock. A group refers to its rule by id; the rule entry keeps a
//! count of the groups bound to it and cannot be deleted while that count
//! is non-zero.
//!
//! Lock order is always groups before rules. Reference counts only change
//! while the rules write lock is held.

use parking_lot::RwLock;
use pc_common::{Action, MacAddr, PcError, PcResult};
use std::sync::Arc;

use crate::group::Group;
use crate::rule::Rule;

/// Stored rule with its reference count
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub rule: Arc<Rule>,
    /// Groups bound to this entry
    pub reference_count: u32,
}

/// Policy store
pub struct PolicyStore {
    groups: RwLock<Vec<Group>>,
    rules: RwLock<Vec<RuleEntry>>,
}

impl PolicyStore {
    /// Create empty store
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(Vec::new()),
            rules: RwLock::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    /// Append a rule. Duplicate ids are kept; lookups see the first.
    pub fn add_rule(&self, rule: Rule) -> PcResult<()> {
        self.add_rules(vec![rule])
    }

    /// Append rules in order. Space for the whole batch is reserved up
    /// front, so on allocation failure no rule is added.
    pub fn add_rules(&self, batch: Vec<Rule>) -> PcResult<()> {
        let mut rules = self.rules.write();
        rules.try_reserve(batch.len())?;
        for rule in batch {
            tracing::info!(rule = %rule.id, action = %rule.action, apps = rule.apps.len(), "Added rule");
            rules.push(RuleEntry {
                rule: Arc::new(rule),
                reference_count: 0,
            });
        }
        Ok(())
    }

    /// Replace the body of every rule with this id. Reference counts and
    /// group bindings are kept.
    pub fn set_rule(&self, rule: Rule) -> PcResult<()> {
        let mut rules = self.rules.write();
        let body = Arc::new(rule);
        let mut found = false;
        for entry in rules.iter_mut().filter(|e| e.rule.id == body.id) {
            entry.rule = Arc::clone(&body);
            found = true;
        }
        if !found {
            return Err(PcError::rule_not_found(body.id.as_str()));
        }
        tracing::info!(rule = %body.id, action = %body.action, "Updated rule");
        Ok(())
    }

    /// Remove every rule with this id, refusing while any is referenced
    pub fn delete_rule(&self, id: &str) -> PcResult<()> {
        let mut rules = self.rules.write();
        let mut found = false;
        for entry in rules.iter().filter(|e| e.rule.id == id) {
            if entry.reference_count > 0 {
                return Err(PcError::Referenced {
                    id: id.to_string(),
                    count: entry.reference_count,
                });
            }
            found = true;
        }
        if !found {
            return Err(PcError::rule_not_found(id));
        }
        rules.retain(|e| e.rule.id != id);
        tracing::info!(rule = id, "Deleted rule");
        Ok(())
    }

    /// Remove all rules. Every group is unbound first.
    pub fn clean_rules(&self) {
        let mut groups = self.groups.write();
        let mut rules = self.rules.write();
        for group in groups.iter_mut() {
            group.rule = None;
        }
        rules.clear();
        tracing::info!("Cleaned rules");
    }

    /// First rule with this id
    pub fn find_rule(&self, id: &str) -> Option<Arc<Rule>> {
        self.rules
            .read()
            .iter()
            .find(|e| e.rule.id == id)
            .map(|e| Arc::clone(&e.rule))
    }

    /// Reference count of the first rule with this id
    pub fn rule_reference_count(&self, id: &str) -> Option<u32> {
        self.rules
            .read()
            .iter()
            .find(|e| e.rule.id == id)
            .map(|e| e.reference_count)
    }

    /// Snapshot of all rule entries
    pub fn rules(&self) -> Vec<RuleEntry> {
        self.rules.read().clone()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Append a group and bind it to `group.rule`. An unknown rule id
    /// leaves the group unbound.
    pub fn add_group(&self, group: Group) -> PcResult<()> {
        self.add_groups(vec![group])
    }

    /// Append groups in order, binding each. Space for the whole batch is
    /// reserved before any binding, so on allocation failure nothing
    /// changes.
    pub fn add_groups(&self, batch: Vec<Group>) -> PcResult<()> {
        let mut groups = self.groups.write();
        let mut rules = self.rules.write();
        groups.try_reserve(batch.len())?;

        for mut group in batch {
            if let Some(rule_id) = group.rule.take() {
                if bind(&mut rules, &rule_id) {
                    group.rule = Some(rule_id);
                } else {
                    tracing::warn!(group = %group.id, rule = %rule_id, "Rule not found, group left unbound");
                }
            }

            tracing::info!(group = %group.id, macs = group.macs.len(), rule = ?group.rule, "Added group");
            groups.push(group);
        }
        Ok(())
    }

    /// Replace members and binding of every group with this id
    pub fn set_group(&self, group: Group) -> PcResult<()> {
        let mut groups = self.groups.write();
        let mut rules = self.rules.write();

        if !groups.iter().any(|g| g.id == group.id) {
            return Err(PcError::group_not_found(group.id));
        }

        let target = match group.rule {
            Some(id) if rules.iter().any(|e| e.rule.id == id) => Some(id),
            Some(id) => {
                tracing::warn!(group = %group.id, rule = %id, "Rule not found, group left unbound");
                None
            }
            None => None,
        };

        for existing in groups.iter_mut().filter(|g| g.id == group.id) {
            if let Some(old) = existing.rule.take() {
                unbind(&mut rules, &old);
            }
            if let Some(new) = &target {
                bind(&mut rules, new);
            }
            existing.macs = group.macs.clone();
            existing.rule = target.clone();
        }

        tracing::info!(group = %group.id, rule = ?target, "Updated group");
        Ok(())
    }

    /// Remove every group with this id, releasing their bindings
    pub fn delete_group(&self, id: &str) -> PcResult<()> {
        let mut groups = self.groups.write();
        let mut rules = self.rules.write();

        let before = groups.len();
        for group in groups.iter().filter(|g| g.id == id) {
            if let Some(rule_id) = &group.rule {
                unbind(&mut rules, rule_id);
            }
        }
        groups.retain(|g| g.id != id);
        if groups.len() == before {
            return Err(PcError::group_not_found(id));
        }
        tracing::info!(group = id, "Deleted group");
        Ok(())
    }

    /// Remove all groups, releasing their bindings
    pub fn clean_groups(&self) {
        let mut groups = self.groups.write();
        let mut rules = self.rules.write();
        for group in groups.iter() {
            if let Some(rule_id) = &group.rule {
                unbind(&mut rules, rule_id);
            }
        }
        groups.clear();
        tracing::info!("Cleaned groups");
    }

    /// First group containing `mac`
    pub fn find_group_by_mac(&self, mac: &MacAddr) -> Option<Group> {
        self.groups.read().iter().find(|g| g.contains(mac)).cloned()
    }

    /// Snapshot of all groups
    pub fn groups(&self) -> Vec<Group> {
        self.groups.read().clone()
    }

    pub fn group_count(&self) -> usize {
        self.groups.read().len()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Resolve the rule and action for a device.
    ///
    /// A device in no group is accepted, or marked `DropAnonymous` when
    /// `drop_anonymous` is set. A device in an unbound group is accepted.
    #[inline]
    pub fn get_policy_for_mac(
        &self,
        mac: &MacAddr,
        drop_anonymous: bool,
    ) -> (Option<Arc<Rule>>, Action) {
        let groups = self.groups.read();
        let Some(group) = groups.iter().find(|g| g.contains(mac)) else {
            let action = if drop_anonymous {
                Action::DropAnonymous
            } else {
                Action::Accept
            };
            return (None, action);
        };
        let Some(rule_id) = &group.rule else {
            return (None, Action::Accept);
        };

        let rules = self.rules.read();
        match rules.iter().find(|e| e.rule.id == *rule_id) {
            Some(entry) => (Some(Arc::clone(&entry.rule)), entry.rule.action),
            None => (None, Action::Accept),
        }
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Count a binding on the first entry with `id`
fn bind(rules: &mut [RuleEntry], id: &str) -> bool {
    match rules.iter_mut().find(|e| e.rule.id == id) {
        Some(entry) => {
            entry.reference_count += 1;
            true
        }
        None => false,
    }
}

/// Release a binding on the first entry with `id`
fn unbind(rules: &mut [RuleEntry], id: &str) {
    if let Some(entry) = rules.iter_mut().find(|e| e.rule.id == id) {
        entry.reference_count = entry.reference_count.saturating_sub(1);
    }
}
