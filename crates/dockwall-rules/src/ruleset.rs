//! The block store: desired firewall state.
//!
//! Rules are grouped into blocks, each owned by one entity. Blocks are only
//! ever replaced or removed whole.

use std::collections::HashSet;
use std::fmt;

use dockwall_common::{IpFamily, WallError, WallResult};

use crate::diff::PendingDiff;
use crate::generator::RuleGenerator;
use crate::rule::Rule;

/// Name of a block, derived from its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockKey {
    /// Rules installed once at bootstrap.
    Static,
    /// Rules owned by a network.
    Network(String),
    /// Rules owned by a container.
    Container(String),
    /// Isolation rules between two networks.
    Isolation(String, String),
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Network(id) => write!(f, "network:{id}"),
            Self::Container(id) => write!(f, "container:{id}"),
            Self::Isolation(a, b) => write!(f, "isolation:{a}:{b}"),
        }
    }
}

/// Rules of one block, free of identity collisions.
#[derive(Debug, Clone, Default)]
pub struct Block {
    rules: Vec<Rule>,
}

impl Block {
    /// Build a block, rejecting two rules with the same identity.
    ///
    /// # Errors
    ///
    /// Returns [`WallError::DuplicateRule`] on an identity collision.
    pub fn new(rules: impl IntoIterator<Item = Rule>) -> WallResult<Self> {
        let rules: Vec<Rule> = rules.into_iter().collect();
        let mut seen = HashSet::with_capacity(rules.len());
        for rule in &rules {
            if !seen.insert(rule.key()) {
                return Err(WallError::DuplicateRule {
                    rule: rule.to_string(),
                });
            }
        }
        Ok(Self { rules })
    }

    /// Rules in insertion order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the block holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Authoritative in-memory desired state.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    blocks: Vec<(BlockKey, Block)>,
}

impl RuleSet {
    /// Create an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &BlockKey) -> Option<usize> {
        self.blocks.iter().position(|(k, _)| k == key)
    }

    /// Replace the named block wholesale.
    ///
    /// A replaced block keeps its original position among blocks.
    ///
    /// # Errors
    ///
    /// Returns [`WallError::DuplicateRule`] if two of `rules` share identity.
    pub fn set_block(&mut self, key: BlockKey, rules: impl IntoIterator<Item = Rule>) -> WallResult<()> {
        let block = Block::new(rules)?;
        tracing::trace!(block = %key, rules = block.len(), "Setting block");
        match self.position(&key) {
            Some(idx) => self.blocks[idx].1 = block,
            None => self.blocks.push((key, block)),
        }
        Ok(())
    }

    /// Replace the named block with the output of a generator.
    ///
    /// # Errors
    ///
    /// Returns [`WallError::DuplicateRule`] if the generator produced a duplicate.
    pub fn set_generated(&mut self, key: BlockKey, generator: RuleGenerator) -> WallResult<()> {
        self.set_block(key, generator.finish())
    }

    /// Remove a block. Returns whether it existed.
    pub fn remove_block(&mut self, key: &BlockKey) -> bool {
        match self.position(key) {
            Some(idx) => {
                self.blocks.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove every rule tagged with `value` under `tag`, then drop emptied blocks.
    ///
    /// Returns the number of rules removed.
    pub fn remove_by_tag(&mut self, tag: &str, value: &str) -> usize {
        let mut removed = 0;
        self.blocks.retain_mut(|(key, block)| {
            let before = block.rules.len();
            block.rules.retain(|rule| !rule.tags().contains(tag, value));
            let dropped = before - block.rules.len();
            removed += dropped;
            if dropped > 0 && block.rules.is_empty() {
                tracing::trace!(block = %key, tag, value, "Removing emptied block");
                return false;
            }
            true
        });
        removed
    }

    /// Look up a block.
    #[must_use]
    pub fn block(&self, key: &BlockKey) -> Option<&Block> {
        self.blocks.iter().find(|(k, _)| k == key).map(|(_, b)| b)
    }

    /// Iterate over blocks in insertion order.
    pub fn blocks(&self) -> impl Iterator<Item = (&BlockKey, &Block)> {
        self.blocks.iter().map(|(k, b)| (k, b))
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no blocks are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All rules of one family in canonical order.
    ///
    /// Sorted by group, then table, then chain. Equal keys keep block
    /// insertion order, then rule order inside the block.
    #[must_use]
    pub fn rules_for(&self, family: IpFamily) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self
            .blocks
            .iter()
            .flat_map(|(_, block)| block.rules.iter())
            .filter(|rule| rule.family() == family)
            .collect();
        rules.sort_by_key(|rule| (rule.group(), rule.table(), rule.chain()));
        rules
    }

    /// Open a diff scope against the current state.
    ///
    /// # Errors
    ///
    /// Returns [`WallError::DuplicateRule`] if two blocks hold the same rule.
    pub fn diff(&self) -> WallResult<PendingDiff> {
        PendingDiff::begin(self)
    }
}
