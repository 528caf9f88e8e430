//! Property-based tests for the single-owner invariant
//!
//! Whatever sequence of edits is applied, every node has at most one owner,
//! its owner lists it at the recorded index, and following owners always
//! terminates at a root.

use canopy_core::{
    builtins, Forest, LanguageBuilder, LanguageRegistry, MetaPointer, Multiplicity, NodeId,
    Owner, Slot, Value,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn p(key: &str) -> MetaPointer {
    MetaPointer::new("tree", "1", key)
}

fn registry() -> Arc<LanguageRegistry> {
    let lang = LanguageBuilder::new("tree", "1")
        .partition_concept("Root", |c| c.containment("kids", "Branch", Multiplicity::ZeroOrMore))
        .concept("Branch", |c| {
            c.property("label", builtins::string(), Multiplicity::Optional)
                .containment("kids", "Branch", Multiplicity::ZeroOrMore)
                .containment("side", "Branch", Multiplicity::ZeroOrMore)
        })
        .build();
    let mut registry = LanguageRegistry::new();
    registry.register(lang).unwrap();
    Arc::new(registry)
}

#[derive(Clone, Debug)]
enum Op {
    Add { parent: usize, child: usize, side: bool },
    Move { child: usize, to: usize },
    Delete { child: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..12, 0usize..12, any::<bool>())
            .prop_map(|(parent, child, side)| Op::Add { parent, child, side }),
        (0usize..12, 0usize..4).prop_map(|(child, to)| Op::Move { child, to }),
        (0usize..12).prop_map(|child| Op::Delete { child }),
    ]
}

fn id(i: usize) -> NodeId {
    if i == 0 {
        NodeId::from("root")
    } else {
        NodeId::new(format!("n{}", i))
    }
}

fn fresh() -> Forest {
    let mut forest: Forest = Forest::new(registry());
    forest.create_node("root", &p("Root")).unwrap();
    forest.add_partition(&"root".into()).unwrap();
    for i in 1..12 {
        forest.create_node(id(i), &p("Branch")).unwrap();
    }
    forest
}

fn apply(forest: &mut Forest, op: &Op) {
    // Errors are expected for many random ops; only the invariant matters.
    let _ = match op {
        Op::Add {
            parent,
            child,
            side,
        } => {
            let feature = if *side && *parent != 0 { p("side") } else { p("kids") };
            forest.add(&id(*parent), &feature, vec![Value::Node(id(*child))])
        }
        Op::Move { child, to } => match forest.position_of(&id(*child)) {
            Some(from) => {
                let to = from.slot.clone().at(*to);
                forest.move_item(&from, &to, false)
            }
            None => Ok(()),
        },
        Op::Delete { child } => match forest.position_of(&id(*child)) {
            Some(at) => forest.delete_at(&at),
            None => Ok(()),
        },
    };
}

fn check_invariant(forest: &Forest) {
    let mut owned = HashSet::new();
    for node in forest.nodes() {
        let listed = match node.owner() {
            Owner::None => continue,
            Owner::Contained {
                parent,
                containment,
                index,
            } => {
                let children = forest.children(parent, containment).unwrap();
                children.get(*index) == Some(node.id())
            }
            Owner::Annotated { parent, index } => {
                forest.annotations(parent).unwrap().get(*index) == Some(node.id())
            }
        };
        assert!(listed, "{} is not listed where its owner says", node.id());
        assert!(owned.insert(node.id().clone()));
        assert!(forest.root_of(node.id()).is_some(), "{} sits on a cycle", node.id());
    }

    for partition in forest.partitions() {
        assert!(forest.node(partition).unwrap().owner().is_none());
    }

    for node in forest.nodes() {
        for child in node.owned() {
            let parent = forest.node(&child).and_then(|c| c.parent().cloned());
            assert_eq!(parent.as_ref(), Some(node.id()));
        }
    }
}

proptest! {
    #[test]
    fn ownership_edges_form_a_forest(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut forest = fresh();
        for op in &ops {
            apply(&mut forest, op);
            check_invariant(&forest);
        }
    }

    #[test]
    fn failed_edits_leave_no_trace(ops in prop::collection::vec(op_strategy(), 1..20)) {
        let mut forest = fresh();
        for op in &ops {
            let before = forest.serialize_partitions().unwrap();
            forest.drain_notifications();
            let result = match op {
                Op::Add { parent, child, side } => {
                    let feature = if *side && *parent != 0 { p("side") } else { p("kids") };
                    forest.add(&id(*parent), &feature, vec![Value::Node(id(*child))])
                }
                _ => {
                    apply(&mut forest, op);
                    Ok(())
                }
            };
            if result.is_err() {
                prop_assert_eq!(forest.serialize_partitions().unwrap(), before);
                prop_assert!(forest.drain_notifications().is_empty());
            }
        }
    }
}

#[test]
fn same_list_moves_follow_remove_then_insert() {
    let mut forest = fresh();
    let kids: Vec<Value> = (1..5).map(|i| Value::Node(id(i))).collect();
    forest.add(&"root".into(), &p("kids"), kids).unwrap();

    let slot = Slot::containment("root", p("kids"));
    for (from, to) in [(0, 3), (3, 0), (1, 2), (2, 1)] {
        let before = forest.children(&"root".into(), &p("kids")).unwrap();
        forest.move_item(&slot.clone().at(from), &slot.clone().at(to), false).unwrap();
        let after = forest.children(&"root".into(), &p("kids")).unwrap();

        let mut expected = before.clone();
        let moved = expected.remove(from);
        expected.insert(to, moved);
        assert_eq!(after, expected);
    }
}
