//! Translating diffs into firewall commands.
//!
//! Removals run highest position first so earlier deletes never shift the
//! positions of later ones. Additions then run lowest position first; each
//! recorded position was computed against the final state, so inserting in
//! ascending order lands every rule exactly where the canonical order puts it.

use std::fmt;

use dockwall_common::{IpFamily, WallResult};

use crate::diff::{Positioned, RuleSetDiff};
use crate::rule::{Place, Rule};
use crate::ruleset::RuleSet;

/// What a command does to its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `-A <chain> <data>`
    Append(String),
    /// `-I <chain> <position> <data>`
    Insert(usize, String),
    /// `-D <chain> <position>`
    Delete(usize),
    /// `-F <chain>`
    Flush,
}

/// One firewall binary invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallCommand {
    /// Family, selecting `iptables` or `ip6tables`.
    pub family: IpFamily,
    /// Target chain.
    pub place: Place,
    /// Operation on the chain.
    pub operation: Operation,
}

impl FirewallCommand {
    /// Append `rule` to its chain.
    #[must_use]
    pub fn append(rule: &Rule) -> Self {
        Self {
            family: rule.family(),
            place: rule.place(),
            operation: Operation::Append(rule.data().to_string()),
        }
    }

    /// Insert a rule at its recorded position.
    #[must_use]
    pub fn insert(entry: &Positioned) -> Self {
        Self {
            family: entry.rule.family(),
            place: entry.rule.place(),
            operation: Operation::Insert(entry.position, entry.rule.data().to_string()),
        }
    }

    /// Delete the rule at its recorded position.
    #[must_use]
    pub fn delete(entry: &Positioned) -> Self {
        Self {
            family: entry.rule.family(),
            place: entry.rule.place(),
            operation: Operation::Delete(entry.position),
        }
    }

    /// Flush a chain.
    #[must_use]
    pub const fn flush(family: IpFamily, place: Place) -> Self {
        Self {
            family,
            place,
            operation: Operation::Flush,
        }
    }

    /// Arguments passed to the binary.
    ///
    /// Rule data is split on whitespace; generated rules carry no quoting.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-t".to_string(), self.place.table.to_string()];
        let (flag, position, data) = match &self.operation {
            Operation::Append(data) => ("-A", None, Some(data)),
            Operation::Insert(position, data) => ("-I", Some(position), Some(data)),
            Operation::Delete(position) => ("-D", Some(position), None),
            Operation::Flush => ("-F", None, None),
        };
        args.push(flag.to_string());
        args.push(self.place.chain.to_string());
        if let Some(position) = position {
            args.push(position.to_string());
        }
        if let Some(data) = data {
            args.extend(data.split_whitespace().map(str::to_string));
        }
        args
    }
}

impl fmt::Display for FirewallCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family.binary(), self.args().join(" "))
    }
}

/// Something that executes firewall commands.
pub trait Firewall {
    /// Execute one command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails; no rollback is attempted.
    fn execute(&mut self, command: &FirewallCommand) -> WallResult<()>;
}

/// Commands turning the "before" state of `family` into the "after" state.
#[must_use]
pub fn plan_diff(diff: &RuleSetDiff, family: IpFamily) -> Vec<FirewallCommand> {
    let mut removed = diff.removed(family);
    removed.sort_by(|a, b| b.position.cmp(&a.position));
    let mut added = diff.added(family);
    added.sort_by_key(|entry| entry.position);

    removed
        .iter()
        .map(FirewallCommand::delete)
        .chain(added.iter().map(FirewallCommand::insert))
        .collect()
}

/// Commands that flush every managed chain and append the whole canonical order.
#[must_use]
pub fn plan_bootstrap(rules: &RuleSet, family: IpFamily) -> Vec<FirewallCommand> {
    Place::MANAGED
        .into_iter()
        .map(|place| FirewallCommand::flush(family, place))
        .chain(
            rules
                .rules_for(family)
                .into_iter()
                .map(FirewallCommand::append),
        )
        .collect()
}

fn run(firewall: &mut impl Firewall, commands: &[FirewallCommand]) -> WallResult<usize> {
    for command in commands {
        firewall.execute(command)?;
    }
    Ok(commands.len())
}

/// Apply a diff for every family. Returns the number of commands executed.
///
/// # Errors
///
/// Stops at the first failing command.
pub fn apply_diff(firewall: &mut impl Firewall, diff: &RuleSetDiff) -> WallResult<usize> {
    let mut executed = 0;
    for family in IpFamily::ALL {
        executed += run(firewall, &plan_diff(diff, family))?;
    }
    tracing::debug!(commands = executed, "Applied rule diff");
    Ok(executed)
}

/// Flush managed chains and append the full rule set for every family.
///
/// # Errors
///
/// Stops at the first failing command.
pub fn bootstrap(firewall: &mut impl Firewall, rules: &RuleSet) -> WallResult<usize> {
    let mut executed = 0;
    for family in IpFamily::ALL {
        executed += run(firewall, &plan_bootstrap(rules, family))?;
    }
    tracing::info!(commands = executed, "Bootstrapped managed chains");
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFirewall;
    use crate::rule::Group;
    use crate::ruleset::BlockKey;

    fn rule(data: &str, group: Group) -> Rule {
        Rule::new(IpFamily::V4, Place::FILTER_FORWARD, data, group)
    }

    #[test]
    fn command_rendering() {
        let rule = Rule::new(IpFamily::V6, Place::NAT_DOCKER, "! -i br0 -j RETURN", Group::Network);
        let entry = Positioned { position: 3, rule };

        assert_eq!(
            FirewallCommand::append(&entry.rule).to_string(),
            "ip6tables -t nat -A DOCKER ! -i br0 -j RETURN"
        );
        assert_eq!(
            FirewallCommand::insert(&entry).to_string(),
            "ip6tables -t nat -I DOCKER 3 ! -i br0 -j RETURN"
        );
        assert_eq!(
            FirewallCommand::delete(&entry).to_string(),
            "ip6tables -t nat -D DOCKER 3"
        );
        assert_eq!(
            FirewallCommand::flush(IpFamily::V4, Place::FILTER_ISOLATION).args(),
            ["-t", "filter", "-F", "DOCKER-ISOLATION"]
        );
    }

    #[test]
    fn plan_orders_deletes_descending_then_inserts_ascending() {
        let mut set = RuleSet::new();
        set.set_block(
            BlockKey::Network("a".into()),
            [rule("a1", Group::Network), rule("a2", Group::Network), rule("a3", Group::Network)],
        )
        .unwrap();
        let pending = set.diff().unwrap();
        set.set_block(
            BlockKey::Network("a".into()),
            [rule("a2", Group::Network)],
        )
        .unwrap();
        set.set_block(
            BlockKey::Container("c".into()),
            [rule("c1", Group::Container), rule("c2", Group::Container)],
        )
        .unwrap();
        let diff = pending.end(&set).unwrap();

        let plan: Vec<_> = plan_diff(&diff, IpFamily::V4)
            .into_iter()
            .map(|c| c.operation)
            .collect();
        assert_eq!(
            plan,
            [
                Operation::Delete(3),
                Operation::Delete(1),
                Operation::Insert(2, "c1".into()),
                Operation::Insert(3, "c2".into()),
            ]
        );
        assert!(plan_diff(&diff, IpFamily::V6).is_empty());
    }

    #[test]
    fn bootstrap_flushes_every_managed_chain() {
        let mut set = RuleSet::new();
        set.set_block(BlockKey::Static, [rule("s", Group::Last)]).unwrap();

        let plan = plan_bootstrap(&set, IpFamily::V6);
        assert_eq!(plan.len(), Place::MANAGED.len());
        assert!(plan.iter().all(|c| c.operation == Operation::Flush));

        let plan = plan_bootstrap(&set, IpFamily::V4);
        assert_eq!(plan.last().unwrap().operation, Operation::Append("s".into()));
    }

    #[test]
    fn applying_diff_matches_fresh_bootstrap() {
        let mut set = RuleSet::new();
        set.set_block(
            BlockKey::Network("a".into()),
            [rule("a1", Group::Network), rule("a2", Group::Network)],
        )
        .unwrap();
        set.set_block(BlockKey::Container("c".into()), [rule("c1", Group::Container)])
            .unwrap();

        let mut live = MemoryFirewall::new();
        bootstrap(&mut live, &set).unwrap();

        let pending = set.diff().unwrap();
        set.set_block(BlockKey::Network("b".into()), [rule("b1", Group::Network)])
            .unwrap();
        set.remove_block(&BlockKey::Network("a".into()));
        let diff = pending.end(&set).unwrap();
        assert_eq!(apply_diff(&mut live, &diff).unwrap(), 3);

        let mut fresh = MemoryFirewall::new();
        bootstrap(&mut fresh, &set).unwrap();
        assert_eq!(live, fresh);
        assert_eq!(
            live.chain(IpFamily::V4, Place::FILTER_FORWARD),
            ["b1", "c1"]
        );
    }
}
