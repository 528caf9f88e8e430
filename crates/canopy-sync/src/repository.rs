//! The repository connector: the single writer of the canonical forest.
//!
//! Messages are handled one at a time. A command is applied atomically, the
//! forest's notifications are drained, and each participation receives at
//! most one event for it, numbered from its own counter. Everything here is
//! synchronous; [`crate::server`] drives it from transports.

use crate::broadcast::route_all;
use crate::codec;
use crate::config::RepositoryConfig;
use crate::error::{Result, SyncError};
use crate::participation::{ConnectionId, Participation};
use canopy_core::{
    Change, DynamicSlots, FeatureSlots, Forest, GraphError, LanguageRegistry, NodeId, Notification,
};
use canopy_delta::{
    apply_command, ClientMessage, Command, CommandSource, ErrorCode, Event, EventBody,
    ParticipationId, PartitionInfo, ProtocolMessage, QueryBody, QueryRequest, QueryResponse,
    ResponseBody, ServerMessage,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use ulid::Ulid;

/// A message addressed to one connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Outgoing {
    pub connection: ConnectionId,
    pub message: ServerMessage,
}

impl Outgoing {
    fn event(connection: ConnectionId, event: Event) -> Self {
        Self {
            connection,
            message: ServerMessage::Event(event),
        }
    }

    fn response(connection: ConnectionId, response: QueryResponse) -> Self {
        Self {
            connection,
            message: ServerMessage::Response(response),
        }
    }
}

pub struct RepositoryConnector<S: FeatureSlots = DynamicSlots> {
    config: RepositoryConfig,
    forest: Forest<S>,
    participations: BTreeMap<ParticipationId, Participation>,
    /// Open connections and the participation each is signed on as.
    connections: HashMap<ConnectionId, Option<ParticipationId>>,
    next_connection: ConnectionId,
}

impl<S: FeatureSlots> RepositoryConnector<S> {
    pub fn new(config: RepositoryConfig, registry: Arc<LanguageRegistry>) -> Self {
        let forest = Forest::new(registry).with_format(config.format);
        Self::with_forest(config, forest)
    }

    /// Serve an existing forest. Pending notifications are discarded.
    pub fn with_forest(config: RepositoryConfig, mut forest: Forest<S>) -> Self {
        forest.drain_notifications();
        Self {
            config,
            forest,
            participations: BTreeMap::new(),
            connections: HashMap::new(),
            next_connection: 1,
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn forest(&self) -> &Forest<S> {
        &self.forest
    }

    pub fn participation(&self, id: &ParticipationId) -> Option<&Participation> {
        self.participations.get(id)
    }

    pub fn participations(&self) -> impl Iterator<Item = &Participation> {
        self.participations.values()
    }

    /// The participation signed on through `connection`.
    pub fn signed_on(&self, connection: ConnectionId) -> Option<&ParticipationId> {
        self.connections.get(&connection).and_then(Option::as_ref)
    }

    pub fn connect(&mut self) -> ConnectionId {
        let connection = self.next_connection;
        self.next_connection += 1;
        self.connections.insert(connection, None);
        tracing::debug!(connection, "Connection opened");
        connection
    }

    /// Forget `connection`. Its participation turns stale and stops
    /// accruing events until a client reconnects to it.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        if let Some(Some(id)) = self.connections.remove(&connection) {
            if let Some(participation) = self.participations.get_mut(&id) {
                if participation.connection() == Some(connection) {
                    participation.detach();
                    tracing::info!(participation = %id, "Participation is stale");
                }
            }
        }
    }

    /// Mutate the forest on the repository's own behalf and broadcast the
    /// result. The closure's edits are kept even when it fails part way.
    pub fn mutate<T>(
        &mut self,
        edit: impl FnOnce(&mut Forest<S>) -> canopy_core::Result<T>,
    ) -> (canopy_core::Result<T>, Vec<Outgoing>) {
        let result = edit(&mut self.forest);
        let outgoing = self.broadcast(None);
        (result, outgoing)
    }

    /// Decode and handle one frame. Undecodable frames are answered with an
    /// unsequenced error event.
    pub fn handle_frame(&mut self, connection: ConnectionId, frame: &[u8]) -> Vec<Outgoing> {
        match codec::decode::<ClientMessage>(frame) {
            Ok(message) => self.handle(connection, message),
            Err(error) => {
                tracing::warn!(connection, %error, "Malformed frame");
                vec![Outgoing::event(
                    connection,
                    Event::error(0, None, ErrorCode::MalformedMessage, error.to_string()),
                )]
            }
        }
    }

    pub fn handle(&mut self, connection: ConnectionId, message: ClientMessage) -> Vec<Outgoing> {
        match message {
            ClientMessage::Command(command) => self.handle_command(connection, command),
            ClientMessage::Query(request) => {
                let response = self.handle_query(connection, request);
                vec![Outgoing::response(connection, response)]
            }
        }
    }

    fn handle_command(&mut self, connection: ConnectionId, command: Command) -> Vec<Outgoing> {
        let Some(participation_id) = self.signed_on(connection).cloned() else {
            let event = Event::error(
                0,
                None,
                ErrorCode::NotSignedOn,
                "commands require a signed-on participation",
            )
            .with_message(
                ProtocolMessage::new("Command", "ignored").with_data("commandId", command.id.0),
            );
            return vec![Outgoing::event(connection, event)];
        };
        let source = CommandSource::new(participation_id.clone(), command.id.clone());

        if let Err(error) = apply_command(&mut self.forest, &command) {
            tracing::warn!(
                participation = %participation_id,
                command = %command.id,
                %error,
                "Command rejected"
            );
            self.forest.drain_notifications();
            let Some(participation) = self.participations.get_mut(&participation_id) else {
                return Vec::new();
            };
            let event = Event::error(
                participation.next_sequence(),
                Some(source),
                ErrorCode::CommandRejected,
                error.to_string(),
            );
            return vec![Outgoing::event(connection, event)];
        }

        self.broadcast(Some(source))
    }

    /// Route the drained notifications to every participation. The
    /// originator always hears back, with `NoOp` if nothing was visible.
    fn broadcast(&mut self, origin: Option<CommandSource>) -> Vec<Outgoing> {
        let notifications = self.forest.drain_notifications();
        let originator = origin.as_ref().map(|source| source.participation_id.clone());

        if self.config.subscribe_originator {
            let created = created_partitions(&notifications);
            if let Some(participation) = originator
                .as_ref()
                .and_then(|id| self.participations.get_mut(id))
            {
                for partition in created {
                    participation.subscribe(partition);
                }
            }
        }

        let origins: Vec<CommandSource> = origin.into_iter().collect();
        let mut outgoing = Vec::new();
        for participation in self.participations.values_mut() {
            let is_originator = originator.as_ref() == Some(participation.id());
            let body = route_all(&notifications, participation, is_originator);
            let Some(connection) = participation.connection() else {
                continue;
            };
            let body = match body {
                Some(body) => body,
                None if is_originator => EventBody::NoOp,
                None => continue,
            };
            let event = Event::new(participation.next_sequence(), origins.clone(), body);
            tracing::debug!(
                participation = %participation.id(),
                sequence = event.sequence,
                changes = event.body.elementary_count(),
                "Event"
            );
            outgoing.push(Outgoing::event(connection, event));
        }
        outgoing
    }

    fn handle_query(&mut self, connection: ConnectionId, request: QueryRequest) -> QueryResponse {
        let name = request.body.name();
        match self.answer(connection, request.body) {
            Ok(body) => QueryResponse::new(request.id, body),
            Err(error) => {
                tracing::debug!(connection, query = name, %error, "Query failed");
                QueryResponse::failed(request.id, error.code(), error.to_string())
            }
        }
    }

    fn answer(&mut self, connection: ConnectionId, query: QueryBody) -> Result<ResponseBody> {
        match query {
            QueryBody::SignOn {
                protocol_version,
                client_id,
                repository_id,
            } => {
                if self.signed_on(connection).is_some() {
                    return Err(SyncError::AlreadySignedOn);
                }
                if protocol_version != self.config.protocol_version {
                    return Err(SyncError::QueryFailed {
                        code: ErrorCode::UnsupportedProtocolVersion,
                        message: format!(
                            "protocol {} is not {}",
                            protocol_version, self.config.protocol_version
                        ),
                    });
                }
                if repository_id != self.config.repository_id {
                    return Err(SyncError::QueryFailed {
                        code: ErrorCode::UnknownRepository,
                        message: format!("no repository named {}", repository_id),
                    });
                }
                let id = ParticipationId::new(Ulid::new().to_string());
                tracing::info!(participation = %id, client = %client_id, "Signed on");
                self.participations
                    .insert(id.clone(), Participation::new(id.clone(), client_id, connection));
                self.connections.insert(connection, Some(id.clone()));
                Ok(ResponseBody::SignOn { participation_id: id })
            }
            QueryBody::SignOff => {
                let id = self.require(connection)?;
                self.participations.remove(&id);
                self.connections.insert(connection, None);
                tracing::info!(participation = %id, "Signed off");
                Ok(ResponseBody::SignOff)
            }
            QueryBody::Reconnect {
                participation_id,
                last_received_sequence,
            } => {
                if self.signed_on(connection).is_some() {
                    return Err(SyncError::AlreadySignedOn);
                }
                let participation = self
                    .participations
                    .get_mut(&participation_id)
                    .ok_or_else(|| {
                        SyncError::ReconnectMismatch(format!(
                            "unknown participation {}",
                            participation_id
                        ))
                    })?;
                let last_sequence = participation.last_sequence();
                if last_sequence != last_received_sequence {
                    return Err(SyncError::ReconnectMismatch(format!(
                        "{} events were sent, {} acknowledged",
                        last_sequence, last_received_sequence
                    )));
                }
                if let Some(previous) = participation.connection() {
                    self.connections.insert(previous, None);
                }
                participation.attach(connection);
                self.connections
                    .insert(connection, Some(participation_id.clone()));
                tracing::info!(participation = %participation_id, last_sequence, "Reconnected");
                Ok(ResponseBody::Reconnect {
                    participation_id,
                    last_sequence,
                })
            }
            QueryBody::ListPartitions => {
                self.require(connection)?;
                let partitions = self
                    .forest
                    .partitions()
                    .filter_map(|id| {
                        self.forest.node(id).map(|node| PartitionInfo {
                            id: id.clone(),
                            classifier: node.classifier().clone(),
                        })
                    })
                    .collect();
                Ok(ResponseBody::ListPartitions { partitions })
            }
            QueryBody::GetAvailableIds { count } => {
                self.require(connection)?;
                let count = count.min(self.config.max_available_ids);
                let mut ids = Vec::with_capacity(count);
                while ids.len() < count {
                    let id = NodeId::generate();
                    if !self.forest.contains(&id) && !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                Ok(ResponseBody::GetAvailableIds { ids })
            }
            QueryBody::SubscribeToChangingPartitions {
                creation,
                deletion,
                partitions,
            } => {
                let participation = self.require_mut(connection)?;
                participation.notify_creation = creation;
                participation.notify_deletion = deletion;
                participation.auto_subscribe = partitions;
                Ok(ResponseBody::SubscribeToChangingPartitions)
            }
            QueryBody::SubscribeToPartitionContents { partition } => {
                self.require(connection)?;
                if !self.forest.is_partition(&partition) {
                    return Err(SyncError::Graph(GraphError::NotAPartition(partition)));
                }
                let contents = self.forest.serialize_subtree(&partition)?;
                self.require_mut(connection)?.subscribe(partition);
                Ok(ResponseBody::SubscribeToPartitionContents { contents })
            }
            QueryBody::UnsubscribeFromPartitionContents { partition } => {
                self.require_mut(connection)?.unsubscribe(&partition);
                Ok(ResponseBody::UnsubscribeFromPartitionContents)
            }
        }
    }

    fn require(&self, connection: ConnectionId) -> Result<ParticipationId> {
        self.signed_on(connection)
            .cloned()
            .ok_or(SyncError::NotSignedOn)
    }

    fn require_mut(&mut self, connection: ConnectionId) -> Result<&mut Participation> {
        let id = self.require(connection)?;
        self.participations
            .get_mut(&id)
            .ok_or(SyncError::NotSignedOn)
    }
}

fn created_partitions(notifications: &[Notification]) -> Vec<NodeId> {
    notifications
        .iter()
        .flat_map(Notification::flatten)
        .filter_map(|notification| match notification {
            Notification::Elementary {
                change: Change::AddPartition { .. },
                partition,
                ..
            } => partition.clone(),
            _ => None,
        })
        .collect()
}
