//! An in-memory firewall with iptables position semantics.

use std::collections::BTreeMap;

use dockwall_common::{IpFamily, WallError, WallResult};

use crate::apply::{Firewall, FirewallCommand, Operation};
use crate::rule::Place;

/// Ordered chains kept in memory.
///
/// Positions are 1-based. Inserting at `len + 1` appends, like `iptables -I`.
/// Two firewalls compare equal when their non-empty chains hold the same rules.
#[derive(Debug, Clone, Default)]
pub struct MemoryFirewall {
    chains: BTreeMap<(IpFamily, Place), Vec<String>>,
    executed: Vec<FirewallCommand>,
}

impl MemoryFirewall {
    /// Create a firewall with no chains.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule data of one chain, in order.
    #[must_use]
    pub fn chain(&self, family: IpFamily, place: Place) -> &[String] {
        self.chains.get(&(family, place)).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every command executed so far.
    #[must_use]
    pub fn executed(&self) -> &[FirewallCommand] {
        &self.executed
    }

    /// Forget the command log, keeping chain contents.
    pub fn clear_log(&mut self) {
        self.executed.clear();
    }

    fn rejected(command: &FirewallCommand, reason: &str) -> WallError {
        WallError::Firewall {
            command: command.to_string(),
            stderr: reason.to_string(),
        }
    }
}

impl PartialEq for MemoryFirewall {
    fn eq(&self, other: &Self) -> bool {
        let populated = |fw: &Self| {
            fw.chains
                .iter()
                .filter(|(_, rules)| !rules.is_empty())
                .map(|(place, rules)| (*place, rules.clone()))
                .collect::<Vec<_>>()
        };
        populated(self) == populated(other)
    }
}

impl Eq for MemoryFirewall {}

impl Firewall for MemoryFirewall {
    fn execute(&mut self, command: &FirewallCommand) -> WallResult<()> {
        let chain = self
            .chains
            .entry((command.family, command.place))
            .or_default();

        match &command.operation {
            Operation::Append(data) => chain.push(data.clone()),
            Operation::Insert(position, data) => {
                if *position == 0 || *position > chain.len() + 1 {
                    return Err(Self::rejected(command, "Index of insertion too big"));
                }
                chain.insert(position - 1, data.clone());
            }
            Operation::Delete(position) => {
                if *position == 0 || *position > chain.len() {
                    return Err(Self::rejected(command, "Index of deletion too big"));
                }
                chain.remove(position - 1);
            }
            Operation::Flush => chain.clear(),
        }

        self.executed.push(command.clone());
        Ok(())
    }
}
