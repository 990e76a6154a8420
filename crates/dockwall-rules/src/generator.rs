//! Rule generation.
//!
//! A [`RuleGenerator`] collects [`RuleDefinition`]s for one owner and expands
//! them into concrete per-family [`Rule`]s once generation is done:
//!
//! ```
//! use dockwall_rules::{Group, Place, RuleGenerator};
//!
//! let mut generator = RuleGenerator::new();
//! generator
//!     .define(Place::FILTER_DOCKER, "-i br0 -j ACCEPT")
//!     .group(Group::Container)
//!     .any_family();
//! let rules = generator.finish();
//! assert_eq!(rules.len(), 2);
//! ```

use dockwall_common::IpFamily;

use crate::rule::{Group, Place, Rule, Tags};

/// Declaration of a rule before it is expanded per family.
///
/// Definitions are IPv4-only in group [`Group::Network`] until configured otherwise.
#[derive(Debug, Clone)]
pub struct RuleDefinition {
    place: Place,
    data: String,
    group: Group,
    ipv4: bool,
    ipv6: bool,
    tags: Tags,
}

impl RuleDefinition {
    fn new(place: Place, data: String) -> Self {
        Self {
            place,
            data,
            group: Group::Network,
            ipv4: true,
            ipv6: false,
            tags: Tags::new(),
        }
    }

    /// Set the ordering group.
    pub fn group(&mut self, group: Group) -> &mut Self {
        self.group = group;
        self
    }

    /// Enable or disable the IPv4 rule.
    pub fn ipv4(&mut self, enabled: bool) -> &mut Self {
        self.ipv4 = enabled;
        self
    }

    /// Enable or disable the IPv6 rule.
    pub fn ipv6(&mut self, enabled: bool) -> &mut Self {
        self.ipv6 = enabled;
        self
    }

    /// Restrict the definition to exactly one family.
    pub fn family(&mut self, family: IpFamily) -> &mut Self {
        self.ipv4 = family == IpFamily::V4;
        self.ipv6 = family == IpFamily::V6;
        self
    }

    /// Enable both families.
    pub fn any_family(&mut self) -> &mut Self {
        self.ipv4(true).ipv6(true)
    }

    /// Tag the rule with `values` under `key`.
    pub fn tag<I, V>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.tags.insert(key, values);
        self
    }

    fn families(&self) -> impl Iterator<Item = IpFamily> + use<> {
        let enabled = [self.ipv4, self.ipv6];
        IpFamily::ALL
            .into_iter()
            .zip(enabled)
            .filter_map(|(family, on)| on.then_some(family))
    }

    fn expand(self) -> impl Iterator<Item = Rule> {
        self.families().map(move |family| {
            Rule::new(family, self.place, self.data.clone(), self.group)
                .with_tags(self.tags.clone())
        })
    }
}

/// Collects rule definitions for one round of generation.
#[derive(Debug, Default)]
pub struct RuleGenerator {
    definitions: Vec<RuleDefinition>,
}

impl RuleGenerator {
    /// Start a new round.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a rule and return its definition for configuration.
    pub fn define(&mut self, place: Place, data: impl Into<String>) -> &mut RuleDefinition {
        self.definitions.push(RuleDefinition::new(place, data.into()));
        let last = self.definitions.len() - 1;
        &mut self.definitions[last]
    }

    /// Number of definitions collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether nothing was defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Expand every definition into concrete rules, in declaration order.
    #[must_use]
    pub fn finish(self) -> Vec<Rule> {
        self.definitions
            .into_iter()
            .flat_map(RuleDefinition::expand)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_ipv4_network_group() {
        let mut generator = RuleGenerator::new();
        generator.define(Place::NAT_POSTROUTING, "-j MASQUERADE");
        let rules = generator.finish();

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].family(), IpFamily::V4);
        assert_eq!(rules[0].group(), Group::Network);
        assert_eq!(rules[0].place(), Place::NAT_POSTROUTING);
    }

    #[test]
    fn expands_per_family_with_tags() {
        let mut generator = RuleGenerator::new();
        generator
            .define(Place::FILTER_ISOLATION, "-i a -o b -j DROP")
            .any_family()
            .tag("network", ["a", "b"]);
        generator
            .define(Place::FILTER_DOCKER, "-j ACCEPT")
            .family(IpFamily::V6)
            .group(Group::Container);
        generator.define(Place::FILTER_DOCKER, "-j DROP").ipv4(false);
        assert_eq!(generator.len(), 3);

        let rules = generator.finish();
        let families: Vec<_> = rules.iter().map(Rule::family).collect();
        assert_eq!(families, [IpFamily::V4, IpFamily::V6, IpFamily::V6]);
        assert!(rules[0].tags().contains("network", "b"));
        assert!(rules[1].tags().contains("network", "a"));
        assert_eq!(rules[2].group(), Group::Container);
    }

    #[test]
    fn generator_does_not_deduplicate() {
        let mut generator = RuleGenerator::new();
        generator.define(Place::FILTER_DOCKER, "-j ACCEPT");
        generator.define(Place::FILTER_DOCKER, "-j ACCEPT");
        assert_eq!(generator.finish().len(), 2);
    }
}
