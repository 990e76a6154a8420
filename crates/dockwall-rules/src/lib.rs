//! # dockwall-rules
//!
//! The rule reconciliation engine.
//!
//! Desired firewall state lives in a [`RuleSet`] made of named blocks. A diff
//! scope captures the state before and after a change; [`apply_diff`] then
//! turns the difference into positional deletes and inserts, so live chains
//! follow the canonical order without ever being flushed outside bootstrap.

#![warn(missing_docs)]

pub mod apply;
pub mod diff;
pub mod generator;
pub mod iptables;
pub mod memory;
pub mod rule;
pub mod ruleset;

pub use apply::{
    Firewall, FirewallCommand, Operation, apply_diff, bootstrap, plan_bootstrap, plan_diff,
};
pub use diff::{PendingDiff, Positioned, RuleSetDiff, Snapshot};
pub use generator::{RuleDefinition, RuleGenerator};
pub use iptables::IptablesFirewall;
pub use memory::MemoryFirewall;
pub use rule::{Group, Place, Rule, RuleKey, Tags};
pub use ruleset::{Block, BlockKey, RuleSet};
