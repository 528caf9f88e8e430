//! The client connector: a local replica kept in step with the repository.
//!
//! Two forests are kept. `confirmed` holds exactly what the repository's
//! events describe, in the repository's order. `working` is what the
//! application sees and edits: `confirmed` with the not-yet-confirmed local
//! commands replayed on top.
//!
//! ```text
//! local edit ──► working ──► command ──► pending ──► repository
//!                                                       │
//! echo (own origin) ──► confirmed, pending shrinks ◄────┤
//! remote event ──► confirmed, working rebuilt ◄─────────┘
//! ```
//!
//! An echo is never replayed on `working`: the edit is already there. When a
//! remote event or a rejection arrives, `working` is rebuilt from
//! `confirmed` and the remaining pending commands, so the repository's order
//! wins and a rejected command's local effect disappears.

use crate::error::{Result, SyncError};
use crate::session::{Session, SessionState};
use canopy_chunk::{Deserializer, StrictHandler};
use canopy_core::{DynamicSlots, FeatureSlots, Forest, LanguageRegistry, NodeId, SerializedChunk};
use canopy_delta::{
    apply_command, apply_event_body, ClientId, Command, CommandId, DeltaError, ErrorCode, Event,
    EventBody, EventSequenceNumber, ParticipationId, QueryBody, ResponseBody,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// What receiving one event amounted to.
#[derive(Clone, Debug, PartialEq)]
pub enum Received {
    /// Changes made by someone else were applied.
    Remote {
        sequence: EventSequenceNumber,
        changes: usize,
    },
    /// The repository applied commands of ours.
    Confirmed {
        sequence: EventSequenceNumber,
        commands: Vec<CommandId>,
    },
    /// A sequenced error, usually a rejected command of ours.
    Rejected {
        sequence: EventSequenceNumber,
        code: ErrorCode,
        message: String,
        commands: Vec<CommandId>,
    },
    /// An error sent outside the sequence, e.g. for a command sent before
    /// signing on.
    Unsequenced { code: ErrorCode, message: String },
}

pub struct ClientConnector<S: FeatureSlots = DynamicSlots> {
    client_id: ClientId,
    session: Session,
    confirmed: Forest<S>,
    working: Forest<S>,
    pending: VecDeque<Command>,
    outbox: Vec<Command>,
    next_command: u64,
}

impl<S: FeatureSlots> ClientConnector<S> {
    pub fn new(client_id: impl Into<ClientId>, registry: Arc<LanguageRegistry>) -> Self {
        let confirmed = Forest::new(registry);
        Self {
            client_id: client_id.into(),
            session: Session::new(),
            working: confirmed.clone(),
            confirmed,
            pending: VecDeque::new(),
            outbox: Vec::new(),
            next_command: 0,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn participation(&self) -> Option<&ParticipationId> {
        self.session.participation()
    }

    pub fn last_sequence(&self) -> EventSequenceNumber {
        self.session.last_sequence()
    }

    /// The replica as the application sees it, local edits included.
    pub fn forest(&self) -> &Forest<S> {
        &self.working
    }

    /// The replica as confirmed by the repository.
    pub fn confirmed(&self) -> &Forest<S> {
        &self.confirmed
    }

    /// Partitions this replica holds.
    pub fn partitions(&self) -> Vec<NodeId> {
        self.confirmed.partitions().cloned().collect()
    }

    /// Commands sent but not yet answered by an event.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Edit the working forest. Every notification the edit produces becomes
    /// one command. Operations that succeeded before an error are kept.
    pub fn edit<T>(
        &mut self,
        edit: impl FnOnce(&mut Forest<S>) -> canopy_core::Result<T>,
    ) -> Result<T> {
        if !self.session.is_signed_on() {
            return Err(SyncError::NotSignedOn);
        }
        let result = edit(&mut self.working);
        self.stage();
        Ok(result?)
    }

    /// Commands waiting to be sent, oldest first.
    pub fn take_outbox(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outbox)
    }

    fn stage(&mut self) {
        for notification in self.working.drain_notifications() {
            self.next_command += 1;
            let id = format!("{}-{}", self.client_id, self.next_command);
            let command = Command::from_notification(id, &notification);
            tracing::debug!(command = %command.id, change = %command.change().name(), "Staged command");
            self.pending.push_back(command.clone());
            self.outbox.push(command);
        }
    }

    /// Apply one event from the repository.
    pub fn receive_event(&mut self, event: &Event) -> Result<Received> {
        self.stage();

        if event.sequence == 0 {
            return match &event.body {
                EventBody::Error { code, message } => {
                    tracing::warn!(%code, %message, "Unsequenced error");
                    Ok(Received::Unsequenced {
                        code: *code,
                        message: message.clone(),
                    })
                }
                _ => Err(SyncError::Delta(DeltaError::SequenceGap {
                    expected: self.session.last_sequence() + 1,
                    received: 0,
                })),
            };
        }
        self.session.accept_event(event.sequence)?;

        let mine: Vec<CommandId> = match self.session.participation() {
            Some(me) => event
                .origin
                .iter()
                .filter(|source| &source.participation_id == me)
                .map(|source| source.command_id.clone())
                .collect(),
            None => Vec::new(),
        };
        self.pending.retain(|command| !mine.contains(&command.id));

        match &event.body {
            EventBody::Error { code, message } => {
                tracing::warn!(sequence = event.sequence, %code, %message, "Command rejected");
                self.rebuild();
                Ok(Received::Rejected {
                    sequence: event.sequence,
                    code: *code,
                    message: message.clone(),
                    commands: mine,
                })
            }
            body => {
                if let Err(error) = apply_event_body(&mut self.confirmed, body) {
                    self.confirmed.drain_notifications();
                    self.rebuild();
                    return Err(error.into());
                }
                self.confirmed.drain_notifications();

                let echo = !mine.is_empty() && *body != EventBody::NoOp;
                if !echo {
                    self.rebuild();
                }
                if mine.is_empty() {
                    Ok(Received::Remote {
                        sequence: event.sequence,
                        changes: body.elementary_count(),
                    })
                } else {
                    Ok(Received::Confirmed {
                        sequence: event.sequence,
                        commands: mine,
                    })
                }
            }
        }
    }

    /// Fold a query response into the replica and session. `request` is the
    /// query the response answers.
    pub fn on_response(&mut self, request: &QueryBody, response: ResponseBody) -> Result<ResponseBody> {
        match (request, &response) {
            (_, ResponseBody::Failed { code, message }) => {
                return Err(match code {
                    ErrorCode::ReconnectMismatch => SyncError::ReconnectMismatch(message.clone()),
                    ErrorCode::NotSignedOn => SyncError::NotSignedOn,
                    ErrorCode::AlreadySignedOn => SyncError::AlreadySignedOn,
                    _ => SyncError::QueryFailed {
                        code: *code,
                        message: message.clone(),
                    },
                });
            }
            (QueryBody::SignOn { .. }, ResponseBody::SignOn { participation_id }) => {
                if self.state() == SessionState::Stale {
                    self.reset();
                }
                self.session.signed_on(participation_id.clone())?;
            }
            (QueryBody::SignOff, ResponseBody::SignOff) => {
                self.session.signed_off()?;
                self.pending.clear();
                self.outbox.clear();
                self.rebuild();
            }
            (
                QueryBody::Reconnect { .. },
                ResponseBody::Reconnect {
                    participation_id,
                    last_sequence,
                },
            ) => {
                self.session.reconnected(participation_id, *last_sequence)?;
                // Anything still pending never reached the repository.
                self.outbox = self.pending.iter().cloned().collect();
            }
            (
                QueryBody::SubscribeToPartitionContents { partition },
                ResponseBody::SubscribeToPartitionContents { contents },
            ) => self.load_partition(partition, contents)?,
            (
                QueryBody::UnsubscribeFromPartitionContents { partition },
                ResponseBody::UnsubscribeFromPartitionContents,
            ) => self.drop_partition(partition),
            (QueryBody::ListPartitions, ResponseBody::ListPartitions { .. })
            | (QueryBody::GetAvailableIds { .. }, ResponseBody::GetAvailableIds { .. })
            | (
                QueryBody::SubscribeToChangingPartitions { .. },
                ResponseBody::SubscribeToChangingPartitions,
            ) => {}
            (request, _) => {
                return Err(SyncError::UnexpectedResponse {
                    query: request.name(),
                })
            }
        }
        Ok(response)
    }

    /// The session dropped its connection.
    pub fn connection_lost(&mut self) {
        self.session.connection_lost();
    }

    /// Replace any copy of `partition` with `contents`.
    fn load_partition(&mut self, partition: &NodeId, contents: &SerializedChunk) -> Result<()> {
        let mut next = self.confirmed.clone();
        if next.is_partition(partition) {
            next.evict_partition(partition)?;
        }
        let loaded = Deserializer::new().deserialize_partitions(contents, &mut next)?;
        next.drain_notifications();
        tracing::debug!(partition = %partition, nodes = loaded.nodes, "Loaded partition");
        self.confirmed = next;
        self.rebuild();
        Ok(())
    }

    fn drop_partition(&mut self, partition: &NodeId) {
        if self.confirmed.is_partition(partition) && self.confirmed.evict_partition(partition).is_ok() {
            self.rebuild();
        }
    }

    /// Forget everything learned under a previous participation.
    fn reset(&mut self) {
        let registry = self.confirmed.registry().clone();
        let format = self.confirmed.format();
        self.confirmed = Forest::new(registry).with_format(format);
        self.pending.clear();
        self.outbox.clear();
        self.rebuild();
    }

    /// `working` := `confirmed` + pending commands. Free subtrees the
    /// application created but has not placed yet are carried over.
    fn rebuild(&mut self) {
        let mut working = self.confirmed.clone();
        for command in &self.pending {
            if let Err(error) = apply_command(&mut working, command) {
                tracing::debug!(command = %command.id, %error, "Pending command no longer applies");
            }
        }

        let free: Vec<NodeId> = self
            .working
            .nodes()
            .filter(|node| node.owner().is_none() && !self.working.is_partition(node.id()))
            .map(|node| node.id().clone())
            .filter(|id| !working.contains(id))
            .collect();
        for root in free {
            let carried = self
                .working
                .serialize_subtree(&root)
                .map_err(SyncError::from)
                .and_then(|chunk| {
                    Deserializer::new()
                        .with_handler(StrictHandler)
                        .deserialize(&chunk, &mut working)
                        .map_err(SyncError::from)
                });
            if let Err(error) = carried {
                tracing::debug!(node = %root, %error, "Dropped free subtree");
            }
        }

        working.drain_notifications();
        self.working = working;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::participation::ConnectionId;
    use crate::repository::{Outgoing, RepositoryConnector};
    use canopy_core::{
        builtins, subtree_eq, LanguageBuilder, MetaPointer, Multiplicity, PropertyValue, Value,
    };
    use canopy_delta::{ClientMessage, QueryRequest, ServerMessage, PROTOCOL_VERSION};
    use std::collections::HashMap;

    fn p(key: &str) -> MetaPointer {
        MetaPointer::new("geo", "1", key)
    }

    fn registry() -> Arc<LanguageRegistry> {
        let lang = LanguageBuilder::new("geo", "1")
            .partition_concept("Geometry", |c| {
                c.containment("shapes", "Line", Multiplicity::ZeroOrMore)
            })
            .concept("Line", |c| {
                c.property("name", builtins::string(), Multiplicity::Optional)
            })
            .build();
        let mut registry = LanguageRegistry::new();
        registry.register(lang).unwrap();
        Arc::new(registry)
    }

    /// Clients and a repository exchanging messages by hand, so deliveries
    /// can be held back to interleave edits.
    struct Harness {
        repo: RepositoryConnector,
        clients: Vec<(ConnectionId, ClientConnector)>,
        inbox: HashMap<ConnectionId, Vec<Event>>,
    }

    impl Harness {
        fn new(clients: usize) -> Self {
            let mut repo = RepositoryConnector::new(RepositoryConfig::default(), registry());
            let clients = (0..clients)
                .map(|i| (repo.connect(), ClientConnector::new(format!("c{}", i), registry())))
                .collect();
            let mut harness = Self {
                repo,
                clients,
                inbox: HashMap::new(),
            };
            for i in 0..harness.clients.len() {
                harness
                    .query(
                        i,
                        QueryBody::SignOn {
                            protocol_version: PROTOCOL_VERSION.to_string(),
                            client_id: format!("c{}", i).into(),
                            repository_id: "default".to_string(),
                        },
                    )
                    .unwrap();
            }
            harness
        }

        fn queue(&mut self, out: Vec<Outgoing>) -> Option<ResponseBody> {
            let mut response = None;
            for outgoing in out {
                match outgoing.message {
                    ServerMessage::Event(event) => {
                        self.inbox.entry(outgoing.connection).or_default().push(event)
                    }
                    ServerMessage::Response(r) => response = Some(r.body),
                }
            }
            response
        }

        fn query(&mut self, i: usize, body: QueryBody) -> Result<ResponseBody> {
            self.deliver(i);
            let connection = self.clients[i].0;
            let out = self.repo.handle(
                connection,
                ClientMessage::Query(QueryRequest::new("q", body.clone())),
            );
            let response = self.queue(out).expect("query answered");
            self.clients[i].1.on_response(&body, response)
        }

        fn edit<T>(
            &mut self,
            i: usize,
            edit: impl FnOnce(&mut Forest) -> canopy_core::Result<T>,
        ) -> T {
            self.clients[i].1.edit(edit).unwrap()
        }

        /// Hand client `i`'s outbox to the repository.
        fn send(&mut self, i: usize) {
            let connection = self.clients[i].0;
            for command in self.clients[i].1.take_outbox() {
                let out = self.repo.handle(connection, ClientMessage::Command(command));
                self.queue(out);
            }
        }

        fn deliver(&mut self, i: usize) -> Vec<Received> {
            let connection = self.clients[i].0;
            let events = self.inbox.remove(&connection).unwrap_or_default();
            events
                .iter()
                .map(|event| self.clients[i].1.receive_event(event).unwrap())
                .collect()
        }

        fn settle(&mut self) {
            for _ in 0..4 {
                for i in 0..self.clients.len() {
                    self.send(i);
                }
                for i in 0..self.clients.len() {
                    self.deliver(i);
                }
            }
        }

        fn client(&self, i: usize) -> &ClientConnector {
            &self.clients[i].1
        }

        fn subscribe(&mut self, i: usize, partition: &str) {
            self.query(
                i,
                QueryBody::SubscribeToPartitionContents {
                    partition: partition.into(),
                },
            )
            .unwrap();
        }

        fn assert_converged(&self, partition: &str) {
            let partition: NodeId = partition.into();
            let repo = self.repo.forest();
            for (_, client) in &self.clients {
                assert!(subtree_eq(repo, &partition, client.forest(), &partition));
                assert_eq!(client.pending(), 0);
            }
        }
    }

    fn geo_with_line(h: &mut Harness) {
        h.edit(0, |f| {
            f.create_node("geo", &p("Geometry"))?;
            f.add_partition(&"geo".into())?;
            f.create_node("l1", &p("Line"))?;
            f.add(&"geo".into(), &p("shapes"), vec![Value::Node("l1".into())])
        });
        h.settle();
    }

    fn rename(name: &'static str) -> impl FnOnce(&mut Forest) -> canopy_core::Result<()> {
        move |f| f.set_property(&"l1".into(), &p("name"), Some(PropertyValue::String(name.into())))
    }

    #[test]
    fn test_edit_requires_sign_on() {
        let mut client: ClientConnector = ClientConnector::new("c", registry());
        assert!(matches!(
            client.edit(|f| f.create_node("x", &p("Line"))),
            Err(SyncError::NotSignedOn)
        ));
    }

    #[test]
    fn test_echo_confirms_without_replay() {
        let mut h = Harness::new(1);
        h.edit(0, |f| {
            f.create_node("geo", &p("Geometry"))?;
            f.add_partition(&"geo".into())
        });
        assert_eq!(h.client(0).pending(), 1);
        h.send(0);
        let received = h.deliver(0);
        assert!(matches!(&received[..], [Received::Confirmed { sequence: 1, commands }] if commands.len() == 1));
        assert_eq!(h.client(0).pending(), 0);
        assert!(h.client(0).confirmed().is_partition(&"geo".into()));
        h.assert_converged("geo");
    }

    #[test]
    fn test_subscriber_follows_edits() {
        let mut h = Harness::new(2);
        geo_with_line(&mut h);
        h.subscribe(1, "geo");
        h.edit(0, rename("first"));
        h.settle();
        h.assert_converged("geo");
        assert_eq!(
            h.client(1).forest().property(&"l1".into(), &p("name")).unwrap(),
            Some(PropertyValue::String("first".into()))
        );
    }

    #[test]
    fn test_repository_order_wins_for_concurrent_edits() {
        let mut h = Harness::new(2);
        geo_with_line(&mut h);
        h.subscribe(1, "geo");
        h.edit(0, rename("start"));
        h.settle();

        // Both rename before seeing the other's edit; client 1 reaches the
        // repository first, so client 0's rename is applied last.
        h.edit(0, rename("zero"));
        h.edit(1, rename("one"));
        h.send(1);
        h.send(0);
        let received = h.deliver(0);
        assert!(matches!(received[0], Received::Remote { .. }));
        assert!(matches!(received[1], Received::Confirmed { .. }));
        h.settle();

        h.assert_converged("geo");
        assert_eq!(
            h.repo.forest().property(&"l1".into(), &p("name")).unwrap(),
            Some(PropertyValue::String("zero".into()))
        );
    }

    #[test]
    fn test_rejected_command_is_rolled_back_locally() {
        let mut h = Harness::new(2);
        geo_with_line(&mut h);
        h.subscribe(1, "geo");

        // Client 1 deletes the line while client 0 renames it.
        h.edit(1, |f| f.remove(&"geo".into(), &p("shapes"), vec![Value::Node("l1".into())]));
        h.edit(0, rename("late"));
        h.send(1);
        h.send(0);
        let received = h.deliver(0);
        assert!(received
            .iter()
            .any(|r| matches!(r, Received::Rejected { code: ErrorCode::CommandRejected, .. })));
        assert!(!h.client(0).forest().contains(&"l1".into()));
        h.settle();
        h.assert_converged("geo");
    }

    #[test]
    fn test_free_nodes_survive_rebuild() {
        let mut h = Harness::new(2);
        geo_with_line(&mut h);
        h.subscribe(1, "geo");
        h.edit(1, |f| f.create_node("draft", &p("Line")));
        h.edit(0, rename("remote"));
        h.settle();
        assert!(h.client(1).forest().contains(&"draft".into()));
        assert_eq!(h.client(1).pending(), 0);
    }

    #[test]
    fn test_unsubscribe_drops_replica() {
        let mut h = Harness::new(2);
        geo_with_line(&mut h);
        h.subscribe(1, "geo");
        h.query(
            1,
            QueryBody::UnsubscribeFromPartitionContents {
                partition: "geo".into(),
            },
        )
        .unwrap();
        assert!(h.client(1).partitions().is_empty());

        h.edit(0, rename("unseen"));
        h.settle();
        assert_eq!(h.client(1).last_sequence(), 0);
    }

    #[test]
    fn test_failed_query_maps_to_error() {
        let mut h = Harness::new(1);
        let result = h.query(
            0,
            QueryBody::SubscribeToPartitionContents {
                partition: "nothing".into(),
            },
        );
        assert!(matches!(
            result,
            Err(SyncError::QueryFailed {
                code: ErrorCode::UnknownPartition,
                ..
            })
        ));
    }
}
