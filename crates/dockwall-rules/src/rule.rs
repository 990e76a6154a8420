//! Firewall rule model.
//!
//! A [`Rule`] is one line of a managed chain. Its identity for diffing is the
//! [`RuleKey`]: everything but the ownership tags.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use dockwall_common::IpFamily;

/// Ordering group. Rules of a lower group always precede higher groups in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    /// Per-network rules.
    Network = 1,
    /// Per-container rules.
    Container = 2,
    /// Trailing static rules.
    Last = 9,
}

impl Group {
    /// Numeric value used in rendered rules.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }
}

/// A `(table, chain)` pair rules are placed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Place {
    /// Table name.
    pub table: &'static str,
    /// Chain name.
    pub chain: &'static str,
}

impl Place {
    /// `filter:DOCKER-FORWARD`
    pub const FILTER_FORWARD: Self = Self::new("filter", "DOCKER-FORWARD");
    /// `nat:DOCKER-POSTROUTING`
    pub const NAT_POSTROUTING: Self = Self::new("nat", "DOCKER-POSTROUTING");
    /// `filter:DOCKER-ISOLATION`
    pub const FILTER_ISOLATION: Self = Self::new("filter", "DOCKER-ISOLATION");
    /// `nat:DOCKER`
    pub const NAT_DOCKER: Self = Self::new("nat", "DOCKER");
    /// `filter:DOCKER`
    pub const FILTER_DOCKER: Self = Self::new("filter", "DOCKER");

    /// Every chain dockwall owns. Bootstrap flushes all of them.
    pub const MANAGED: [Self; 5] = [
        Self::NAT_POSTROUTING,
        Self::NAT_DOCKER,
        Self::FILTER_FORWARD,
        Self::FILTER_DOCKER,
        Self::FILTER_ISOLATION,
    ];

    /// Create a place.
    #[must_use]
    pub const fn new(table: &'static str, chain: &'static str) -> Self {
        Self { table, chain }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.chain)
    }
}

/// Ownership tags: key to a set of values.
///
/// A rule owned by a pair of networks carries both ids under the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeMap<String, BTreeSet<String>>);

impl Tags {
    /// Empty tag map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add values under `key`.
    pub fn insert<I, V>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.0
            .entry(key.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    /// Whether `key` holds `value`.
    #[must_use]
    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.get(key).is_some_and(|values| values.contains(value))
    }

    /// Values under `key`.
    pub fn get(&self, key: &str) -> impl Iterator<Item = &str> {
        self.0.get(key).into_iter().flatten().map(String::as_str)
    }

    /// Whether no tags are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Identity of a rule. Tags are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    /// Protocol family.
    pub family: IpFamily,
    /// Placement.
    pub place: Place,
    /// Raw rule text.
    pub data: String,
    /// Ordering group.
    pub group: Group,
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -t {} -A {} {} [group:{}]",
            self.family,
            self.place.table,
            self.place.chain,
            self.data,
            self.group.value()
        )
    }
}

/// One concrete firewall rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    key: RuleKey,
    tags: Tags,
}

impl Rule {
    /// Create an untagged rule.
    pub fn new(family: IpFamily, place: Place, data: impl Into<String>, group: Group) -> Self {
        Self {
            key: RuleKey {
                family,
                place,
                data: data.into(),
                group,
            },
            tags: Tags::new(),
        }
    }

    /// Replace the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Identity of this rule.
    #[must_use]
    pub const fn key(&self) -> &RuleKey {
        &self.key
    }

    /// Protocol family.
    #[must_use]
    pub const fn family(&self) -> IpFamily {
        self.key.family
    }

    /// Placement.
    #[must_use]
    pub const fn place(&self) -> Place {
        self.key.place
    }

    /// Table name.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        self.key.place.table
    }

    /// Chain name.
    #[must_use]
    pub const fn chain(&self) -> &'static str {
        self.key.place.chain
    }

    /// Raw rule text.
    #[must_use]
    pub fn data(&self) -> &str {
        &self.key.data
    }

    /// Ordering group.
    #[must_use]
    pub const fn group(&self) -> Group {
        self.key.group
    }

    /// Ownership tags.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        &self.tags
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_order() {
        assert!(Group::Network < Group::Container);
        assert!(Group::Container < Group::Last);
        assert_eq!(Group::Last.value(), 9);
    }

    #[test]
    fn identity_ignores_tags() {
        let mut tags = Tags::new();
        tags.insert("network", ["a", "b"]);
        let plain = Rule::new(IpFamily::V4, Place::FILTER_ISOLATION, "-j DROP", Group::Network);
        let tagged = plain.clone().with_tags(tags);

        assert_eq!(plain.key(), tagged.key());
        assert_ne!(plain, tagged);
    }

    #[test]
    fn tags_hold_value_sets() {
        let mut tags = Tags::new();
        tags.insert("network", ["a"]);
        tags.insert("network", ["b"]);

        assert!(tags.contains("network", "a"));
        assert!(tags.contains("network", "b"));
        assert!(!tags.contains("network", "c"));
        assert!(!tags.contains("container", "a"));
        assert_eq!(tags.get("network").collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn rule_display() {
        let rule = Rule::new(IpFamily::V6, Place::NAT_DOCKER, "-j RETURN", Group::Container);
        assert_eq!(rule.to_string(), "ip6 -t nat -A DOCKER -j RETURN [group:2]");
    }
}
