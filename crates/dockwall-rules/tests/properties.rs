//! Property tests for ordering, diffing and positional application.

use std::collections::HashSet;

use dockwall_common::IpFamily;
use dockwall_rules::{
    BlockKey, Firewall, Group, MemoryFirewall, Place, Rule, RuleKey, RuleSet, apply_diff,
    bootstrap,
};
use proptest::prelude::*;

const GROUPS: [Group; 3] = [Group::Network, Group::Container, Group::Last];
const BLOCKS: usize = 6;

/// (ipv6, place index, group index, version)
type RuleShape = (bool, usize, usize, u8);
type State = Vec<Option<Vec<RuleShape>>>;

fn rule_shape() -> impl Strategy<Value = RuleShape> {
    (any::<bool>(), 0..Place::MANAGED.len(), 0..GROUPS.len(), 0..2u8)
}

fn state() -> impl Strategy<Value = State> {
    prop::collection::vec(
        prop::option::of(prop::collection::vec(rule_shape(), 0..6)),
        BLOCKS,
    )
}

fn rules(block: usize, shapes: &[RuleShape]) -> Vec<Rule> {
    shapes
        .iter()
        .enumerate()
        .map(|(idx, &(v6, place, group, version))| {
            let family = if v6 { IpFamily::V6 } else { IpFamily::V4 };
            Rule::new(
                family,
                Place::MANAGED[place],
                format!("b{block}-r{idx}-v{version}"),
                GROUPS[group],
            )
        })
        .collect()
}

fn key(block: usize) -> BlockKey {
    BlockKey::Network(block.to_string())
}

fn build<'a>(order: impl Iterator<Item = (usize, &'a Option<Vec<RuleShape>>)>) -> RuleSet {
    let mut set = RuleSet::new();
    for (block, shapes) in order {
        if let Some(shapes) = shapes {
            set.set_block(key(block), rules(block, shapes)).unwrap();
        }
    }
    set
}

fn mutate(set: &mut RuleSet, after: &State) {
    for (block, shapes) in after.iter().enumerate() {
        match shapes {
            Some(shapes) => set.set_block(key(block), rules(block, shapes)).unwrap(),
            None => {
                set.remove_block(&key(block));
            }
        }
    }
}

fn identities(set: &RuleSet, family: IpFamily) -> HashSet<RuleKey> {
    set.rules_for(family)
        .into_iter()
        .map(|rule| rule.key().clone())
        .collect()
}

proptest! {
    #[test]
    fn canonical_order_is_sorted_and_insertion_independent(state in state()) {
        let forward = build(state.iter().enumerate());
        let backward = build(state.iter().enumerate().rev());

        for family in IpFamily::ALL {
            let sort_key = |rule: &&Rule| (rule.group(), rule.table(), rule.chain());
            let ordered = forward.rules_for(family);
            prop_assert!(ordered.windows(2).all(|w| sort_key(&w[0]) <= sort_key(&w[1])));

            let forward_keys: Vec<_> = ordered.iter().map(sort_key).collect();
            let backward_keys: Vec<_> = backward.rules_for(family).iter().map(sort_key).collect();
            prop_assert_eq!(forward_keys, backward_keys);
            prop_assert_eq!(identities(&forward, family), identities(&backward, family));
        }
    }

    #[test]
    fn diff_partitions_identities(before in state(), after in state()) {
        let mut set = build(before.iter().enumerate());
        let old: Vec<_> = IpFamily::ALL.iter().map(|&f| identities(&set, f)).collect();

        let pending = set.diff().unwrap();
        mutate(&mut set, &after);
        let diff = pending.end(&set).unwrap();

        for (i, family) in IpFamily::ALL.into_iter().enumerate() {
            let new = identities(&set, family);
            let added: HashSet<_> = diff.added(family).into_iter().map(|p| p.rule.key().clone()).collect();
            let removed: HashSet<_> = diff.removed(family).into_iter().map(|p| p.rule.key().clone()).collect();

            prop_assert!(added.is_disjoint(&removed));
            prop_assert_eq!(&added, &new.difference(&old[i]).cloned().collect::<HashSet<_>>());
            prop_assert_eq!(&removed, &old[i].difference(&new).cloned().collect::<HashSet<_>>());
        }
    }

    #[test]
    fn positional_application_reproduces_canonical_order(before in state(), after in state()) {
        let mut set = build(before.iter().enumerate());
        let mut live = MemoryFirewall::new();
        bootstrap(&mut live, &set).unwrap();

        let pending = set.diff().unwrap();
        mutate(&mut set, &after);
        let diff = pending.end(&set).unwrap();
        apply_diff(&mut live, &diff).unwrap();

        let mut fresh = MemoryFirewall::new();
        bootstrap(&mut fresh, &set).unwrap();
        prop_assert_eq!(live, fresh);
    }

    #[test]
    fn bootstrap_is_idempotent(state in state()) {
        let set = build(state.iter().enumerate());
        let mut fw = MemoryFirewall::new();

        bootstrap(&mut fw, &set).unwrap();
        let first = fw.clone();
        let first_log = fw.executed().to_vec();
        fw.clear_log();
        bootstrap(&mut fw, &set).unwrap();

        prop_assert_eq!(&fw, &first);
        prop_assert_eq!(fw.executed(), first_log.as_slice());
    }
}

#[test]
fn memory_firewall_accepts_trait_objects() {
    let mut fw = MemoryFirewall::new();
    let dyn_fw: &mut dyn Firewall = &mut fw;
    let set = RuleSet::new();
    for command in dockwall_rules::plan_bootstrap(&set, IpFamily::V4) {
        dyn_fw.execute(&command).unwrap();
    }
    assert_eq!(fw.executed().len(), Place::MANAGED.len());
}
