//! Deciding what each participation sees of a confirmed command.
//!
//! Notifications are routed one at a time and in order, so the subscription
//! side effects of an earlier notification (auto-subscribing a created
//! partition, forgetting a deleted one) apply to the later ones.
//!
//! Moves between partitions are translated per recipient:
//!
//! ```text
//! subscribed to      delivered as
//! source + target    Move
//! target only        Add (or Replace) of the moved subtree or entry
//! source only        Delete at the old position
//! neither            nothing
//! ```

use crate::participation::Participation;
use canopy_core::{Change, Item, Notification, NodeId, Position};
use canopy_delta::EventBody;

/// The event body `participation` receives for one command's notifications,
/// or `None` when nothing is visible to it. Subscription side effects are
/// applied whether or not the participation is active.
pub fn route_all(
    notifications: &[Notification],
    participation: &mut Participation,
    originator: bool,
) -> Option<EventBody> {
    let mut delivered: Vec<EventBody> = notifications
        .iter()
        .flat_map(Notification::flatten)
        .filter_map(|notification| route(notification, participation, originator))
        .map(EventBody::Change)
        .collect();

    match delivered.len() {
        0 => None,
        1 => delivered.pop(),
        _ => Some(EventBody::Composite(delivered)),
    }
}

/// Route one elementary notification.
pub fn route(
    notification: &Notification,
    participation: &mut Participation,
    originator: bool,
) -> Option<Change> {
    let Notification::Elementary {
        change,
        partition,
        source_partition,
        moved_item,
    } = notification
    else {
        return None;
    };

    match change {
        Change::AddPartition { .. } => {
            let created = partition.as_ref()?;
            let deliver = participation.is_subscribed(created) || participation.notify_creation;
            if deliver && participation.auto_subscribe {
                participation.subscribe(created.clone());
            }
            deliver.then(|| change.clone())
        }
        Change::DeletePartition { partition: deleted } => {
            let deliver = participation.is_subscribed(deleted)
                || participation.notify_deletion
                || originator;
            participation.unsubscribe(deleted);
            deliver.then(|| change.clone())
        }
        _ => {
            let sees = |p: &Option<NodeId>| {
                p.as_ref()
                    .map(|p| participation.is_subscribed(p))
                    .unwrap_or(false)
            };
            let sees_target = sees(partition);
            let crossing = source_partition.is_some() && source_partition != partition;
            if !crossing {
                return sees_target.then(|| change.clone());
            }
            match (sees(source_partition), sees_target) {
                (true, true) => Some(change.clone()),
                (false, true) => arrival(change, moved_item.as_ref()),
                (true, false) => departure(change),
                (false, false) => None,
            }
        }
    }
}

fn arrival(change: &Change, moved_item: Option<&Item>) -> Option<Change> {
    let Change::Move { to, replace, .. } = change else {
        return Some(change.clone());
    };
    let item = moved_item?.clone();
    let at: Position = to.clone();
    Some(if *replace {
        Change::Replace { at, item }
    } else {
        Change::Add { at, item }
    })
}

fn departure(change: &Change) -> Option<Change> {
    match change {
        Change::Move { from, .. } => Some(Change::Delete { at: from.clone() }),
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{
        MetaPointer, ReferenceEntry, SerializationFormat, SerializedChunk, Slot, Topology,
    };

    fn participation() -> Participation {
        Participation::new("p".into(), "client".into(), 1)
    }

    fn slot(parent: &str) -> Slot {
        Slot::Containment {
            parent: parent.into(),
            containment: MetaPointer::new("shapes", "1", "shapes"),
        }
    }

    fn created(partition: &str) -> Notification {
        Notification::elementary(
            Change::AddPartition {
                partition: SerializedChunk::new(SerializationFormat::default()),
            },
            Some(partition.into()),
        )
    }

    fn crossing_move(replace: bool) -> Notification {
        Notification::Elementary {
            change: Change::Move {
                from: slot("a-root").at(0),
                to: slot("b-root").at(2),
                topology: Topology::OtherOwner,
                replace,
            },
            partition: Some("b".into()),
            source_partition: Some("a".into()),
            moved_item: Some(Item::Entry(ReferenceEntry::to("x"))),
        }
    }

    #[test]
    fn test_changes_follow_subscriptions() {
        let edit = Notification::elementary(
            Change::Delete {
                at: slot("a-root").at(0),
            },
            Some("a".into()),
        );
        let mut p = participation();
        assert!(route(&edit, &mut p, false).is_none());

        p.subscribe("a".into());
        assert_eq!(route(&edit, &mut p, false), Some(edit.change()));
    }

    #[test]
    fn test_creation_notice_and_auto_subscribe() {
        let mut quiet = participation();
        assert!(route(&created("n"), &mut quiet, true).is_none());

        let mut watcher = participation();
        watcher.notify_creation = true;
        watcher.auto_subscribe = true;
        assert!(route(&created("n"), &mut watcher, false).is_some());
        assert!(watcher.is_subscribed(&"n".into()));
    }

    #[test]
    fn test_deletion_reaches_originator_and_unsubscribes_everyone() {
        let deleted = Notification::elementary(
            Change::DeletePartition {
                partition: "a".into(),
            },
            Some("a".into()),
        );

        let mut originator = participation();
        assert!(route(&deleted, &mut originator, true).is_some());

        let mut subscriber = participation();
        subscriber.subscribe("a".into());
        assert!(route(&deleted, &mut subscriber, false).is_some());
        assert!(!subscriber.is_subscribed(&"a".into()));

        let mut bystander = participation();
        assert!(route(&deleted, &mut bystander, false).is_none());
    }

    #[test]
    fn test_cross_partition_move_is_translated_per_recipient() {
        let mut both = participation();
        both.subscribe("a".into());
        both.subscribe("b".into());
        assert!(matches!(
            route(&crossing_move(false), &mut both, false),
            Some(Change::Move { .. })
        ));

        let mut target = participation();
        target.subscribe("b".into());
        assert_eq!(
            route(&crossing_move(false), &mut target, false),
            Some(Change::Add {
                at: slot("b-root").at(2),
                item: Item::Entry(ReferenceEntry::to("x")),
            })
        );
        assert!(matches!(
            route(&crossing_move(true), &mut target, false),
            Some(Change::Replace { .. })
        ));

        let mut source = participation();
        source.subscribe("a".into());
        assert_eq!(
            route(&crossing_move(false), &mut source, false),
            Some(Change::Delete {
                at: slot("a-root").at(0)
            })
        );

        let mut neither = participation();
        assert!(route(&crossing_move(false), &mut neither, false).is_none());
    }

    #[test]
    fn test_route_all_combines_delivered_parts() {
        let mut p = participation();
        p.notify_creation = true;
        p.auto_subscribe = true;
        let edit = Notification::elementary(
            Change::Delete {
                at: slot("n-root").at(0),
            },
            Some("n".into()),
        );

        // The creation subscribes, so the following edit is delivered too.
        let body = route_all(&[created("n"), edit.clone()], &mut p, false).unwrap();
        assert_eq!(body.elementary_count(), 2);
        assert!(matches!(body, EventBody::Composite(_)));

        let single = route_all(&[edit], &mut p, false).unwrap();
        assert!(matches!(single, EventBody::Change(Change::Delete { .. })));

        assert!(route_all(&[created("m")], &mut participation(), false).is_none());
    }
}
