//! Per-client bookkeeping kept by the repository.

use canopy_core::NodeId;
use canopy_delta::{ClientId, EventSequenceNumber, ParticipationId, SequenceCounter};
use std::collections::BTreeSet;

/// Identifies one transport-level connection on the repository side.
pub type ConnectionId = u64;

/// A signed-on client. Active while bound to a connection, stale otherwise.
///
/// A stale participation keeps its subscriptions and its event counter so a
/// later `Reconnect` can resume it, but no events are produced for it.
#[derive(Clone, Debug)]
pub struct Participation {
    id: ParticipationId,
    client_id: ClientId,
    connection: Option<ConnectionId>,
    counter: SequenceCounter,
    subscriptions: BTreeSet<NodeId>,
    /// Receive `AddPartition` for partitions not subscribed to.
    pub notify_creation: bool,
    /// Receive `DeletePartition` for partitions not subscribed to.
    pub notify_deletion: bool,
    /// Subscribe to every partition whose creation is delivered.
    pub auto_subscribe: bool,
}

impl Participation {
    pub fn new(id: ParticipationId, client_id: ClientId, connection: ConnectionId) -> Self {
        Self {
            id,
            client_id,
            connection: Some(connection),
            counter: SequenceCounter::new(),
            subscriptions: BTreeSet::new(),
            notify_creation: false,
            notify_deletion: false,
            auto_subscribe: false,
        }
    }

    pub fn id(&self) -> &ParticipationId {
        &self.id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn is_active(&self) -> bool {
        self.connection.is_some()
    }

    pub fn attach(&mut self, connection: ConnectionId) {
        self.connection = Some(connection);
    }

    pub fn detach(&mut self) {
        self.connection = None;
    }

    /// Sequence number of the last event produced for this participation.
    pub fn last_sequence(&self) -> EventSequenceNumber {
        self.counter.last()
    }

    pub fn next_sequence(&mut self) -> EventSequenceNumber {
        self.counter.next()
    }

    pub fn is_subscribed(&self, partition: &NodeId) -> bool {
        self.subscriptions.contains(partition)
    }

    pub fn subscribe(&mut self, partition: NodeId) -> bool {
        self.subscriptions.insert(partition)
    }

    pub fn unsubscribe(&mut self, partition: &NodeId) -> bool {
        self.subscriptions.remove(partition)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &NodeId> {
        self.subscriptions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_participation_keeps_state() {
        let mut participation = Participation::new("p".into(), "alice".into(), 3);
        participation.subscribe("geo".into());
        participation.next_sequence();
        participation.detach();

        assert!(!participation.is_active());
        assert!(participation.is_subscribed(&"geo".into()));
        assert_eq!(participation.last_sequence(), 1);

        participation.attach(4);
        assert_eq!(participation.connection(), Some(4));
        assert_eq!(participation.next_sequence(), 2);
    }
}
