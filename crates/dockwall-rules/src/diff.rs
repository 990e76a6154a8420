//! Diffing two states of a [`RuleSet`].
//!
//! A snapshot numbers every rule with its 1-based position inside its
//! `(table, chain)`, walking the canonical order. That matches the live chain
//! as long as every earlier change went through this engine.

use std::collections::{HashMap, HashSet};

use dockwall_common::{IpFamily, WallError, WallResult};

use crate::rule::{Place, Rule, RuleKey};
use crate::ruleset::RuleSet;

/// A rule with its position in its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Positioned {
    /// 1-based position inside `(table, chain)`.
    pub position: usize,
    /// The rule.
    pub rule: Rule,
}

/// Positions of all rules of one family at one instant.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<Positioned>,
    keys: HashSet<RuleKey>,
}

impl Snapshot {
    /// Capture one family of `rules`.
    ///
    /// # Errors
    ///
    /// Returns [`WallError::DuplicateRule`] if two blocks hold the same rule.
    pub fn capture(rules: &RuleSet, family: IpFamily) -> WallResult<Self> {
        let mut counters: HashMap<Place, usize> = HashMap::new();
        let mut snapshot = Self::default();

        for rule in rules.rules_for(family) {
            if !snapshot.keys.insert(rule.key().clone()) {
                return Err(WallError::DuplicateRule {
                    rule: rule.to_string(),
                });
            }
            let counter = counters.entry(rule.place()).or_default();
            *counter += 1;
            snapshot.entries.push(Positioned {
                position: *counter,
                rule: rule.clone(),
            });
        }

        Ok(snapshot)
    }

    /// Whether a rule with this identity is present.
    #[must_use]
    pub fn contains(&self, key: &RuleKey) -> bool {
        self.keys.contains(key)
    }

    /// Entries in canonical order.
    #[must_use]
    pub fn entries(&self) -> &[Positioned] {
        &self.entries
    }

    fn missing_from(&self, other: &Self) -> Vec<Positioned> {
        self.entries
            .iter()
            .filter(|entry| !other.contains(entry.rule.key()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshots {
    v4: Snapshot,
    v6: Snapshot,
}

impl Snapshots {
    fn capture(rules: &RuleSet) -> WallResult<Self> {
        Ok(Self {
            v4: Snapshot::capture(rules, IpFamily::V4)?,
            v6: Snapshot::capture(rules, IpFamily::V6)?,
        })
    }

    const fn get(&self, family: IpFamily) -> &Snapshot {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }
}

/// An open diff scope holding the "before" state.
#[derive(Debug)]
#[must_use = "a diff scope does nothing until it is ended"]
pub struct PendingDiff {
    before: Snapshots,
}

impl PendingDiff {
    /// Capture the "before" state.
    ///
    /// # Errors
    ///
    /// Returns [`WallError::DuplicateRule`] on an identity collision.
    pub fn begin(rules: &RuleSet) -> WallResult<Self> {
        Ok(Self {
            before: Snapshots::capture(rules)?,
        })
    }

    /// Capture the "after" state and close the scope.
    ///
    /// # Errors
    ///
    /// Returns [`WallError::DuplicateRule`] on an identity collision.
    pub fn end(self, rules: &RuleSet) -> WallResult<RuleSetDiff> {
        Ok(RuleSetDiff {
            before: self.before,
            after: Snapshots::capture(rules)?,
        })
    }
}

/// Rules removed and added between two states.
#[derive(Debug, Clone)]
pub struct RuleSetDiff {
    before: Snapshots,
    after: Snapshots,
}

impl RuleSetDiff {
    /// Rules present before but not after, with their "before" positions.
    #[must_use]
    pub fn removed(&self, family: IpFamily) -> Vec<Positioned> {
        self.before.get(family).missing_from(self.after.get(family))
    }

    /// Rules present after but not before, with their "after" positions.
    #[must_use]
    pub fn added(&self, family: IpFamily) -> Vec<Positioned> {
        self.after.get(family).missing_from(self.before.get(family))
    }

    /// The "before" snapshot of a family.
    #[must_use]
    pub const fn before(&self, family: IpFamily) -> &Snapshot {
        self.before.get(family)
    }

    /// The "after" snapshot of a family.
    #[must_use]
    pub const fn after(&self, family: IpFamily) -> &Snapshot {
        self.after.get(family)
    }

    /// Whether nothing changed in any family.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        IpFamily::ALL
            .into_iter()
            .all(|family| self.removed(family).is_empty() && self.added(family).is_empty())
    }
}
