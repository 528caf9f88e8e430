//! Async client over a [`Transport`].
//!
//! A reader task owns the receiving side: it answers pending queries and
//! feeds events to the [`ClientConnector`] strictly in arrival order. Query
//! responses are folded into the replica by the reader too, so a partition's
//! contents are always loaded before the events that follow them.

use crate::codec;
use crate::config::ClientConfig;
use crate::connector::{ClientConnector, Received};
use crate::error::{Result, SyncError};
use crate::network::{NetworkError, Transport};
use crate::session::SessionState;
use canopy_core::{DynamicSlots, FeatureSlots, Forest, LanguageRegistry, NodeId};
use canopy_delta::{
    ClientMessage, EventSequenceNumber, ParticipationId, PartitionInfo, QueryBody, QueryId,
    QueryRequest, ResponseBody, ServerMessage, PROTOCOL_VERSION,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

/// Events published by a client as it processes repository messages.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Received(Received),
    /// An event could not be applied; the replica may need a refresh.
    Failed(SyncError),
    Disconnected,
}

/// Replication progress, watched by [`Client::settled`] and friends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub last_sequence: EventSequenceNumber,
    pub pending: usize,
}

type PendingQuery = (QueryBody, oneshot::Sender<Result<ResponseBody>>);

struct Shared<S: FeatureSlots> {
    connector: Mutex<ClientConnector<S>>,
    queries: Mutex<HashMap<QueryId, PendingQuery>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    /// Bumped on every new transport so a stale reader does not report its
    /// own connection loss.
    generation: AtomicU64,
    /// Serializes sends so commands leave in the order they were staged.
    send_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ClientEvent>,
    progress: watch::Sender<Progress>,
}

impl<S: FeatureSlots> Shared<S> {
    fn current_transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .read()
            .clone()
            .ok_or(SyncError::Network(NetworkError::Disconnected))
    }

    async fn send_frame(&self, transport: &Arc<dyn Transport>, message: &ClientMessage) -> Result<()> {
        let frame = codec::encode(message)?;
        transport.send(frame).await?;
        Ok(())
    }

    /// Send staged commands, then `message` if any.
    async fn flush(&self, message: Option<ClientMessage>) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        let transport = self.current_transport()?;
        let commands = self.connector.lock().take_outbox();
        for command in commands {
            tracing::debug!(command = %command.id, "Sending command");
            self.send_frame(&transport, &ClientMessage::Command(command)).await?;
        }
        if let Some(message) = message {
            self.send_frame(&transport, &message).await?;
        }
        Ok(())
    }

    fn publish_progress(&self) {
        let progress = {
            let connector = self.connector.lock();
            Progress {
                last_sequence: connector.last_sequence(),
                pending: connector.pending(),
            }
        };
        self.progress.send_replace(progress);
    }
}

pub struct Client<S: FeatureSlots = DynamicSlots> {
    config: ClientConfig,
    shared: Arc<Shared<S>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    query_counter: AtomicU64,
}

impl<S: FeatureSlots> Client<S> {
    pub fn new(config: ClientConfig, registry: Arc<LanguageRegistry>) -> Self {
        let connector = ClientConnector::new(config.client_id.clone(), registry);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (progress, _) = watch::channel(Progress::default());
        Self {
            shared: Arc::new(Shared {
                connector: Mutex::new(connector),
                queries: Mutex::new(HashMap::new()),
                transport: RwLock::new(None),
                generation: AtomicU64::new(0),
                send_lock: tokio::sync::Mutex::new(()),
                events,
                progress,
            }),
            config,
            reader: Mutex::new(None),
            query_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start using `transport`. A previous transport is abandoned, not closed.
    pub fn connect(&self, transport: Arc<dyn Transport>) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.transport.write() = Some(transport.clone());
        let reader = tokio::spawn(read_loop(self.shared.clone(), transport, generation));
        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }
    }

    /// Drop the connection. A signed-on session turns stale.
    pub async fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let transport = self.shared.transport.write().take();
        self.shared.connector.lock().connection_lost();
        if let Some(transport) = transport {
            transport.close().await;
        }
        fail_queries(&self.shared);
    }

    pub fn state(&self) -> SessionState {
        self.shared.connector.lock().state()
    }

    pub fn participation(&self) -> Option<ParticipationId> {
        self.shared.connector.lock().participation().cloned()
    }

    pub fn last_sequence(&self) -> EventSequenceNumber {
        self.shared.connector.lock().last_sequence()
    }

    pub fn pending(&self) -> usize {
        self.shared.connector.lock().pending()
    }

    /// Partitions the local replica holds.
    pub fn partitions(&self) -> Vec<NodeId> {
        self.shared.connector.lock().partitions()
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Read the replica, local edits included.
    pub fn with_forest<T>(&self, read: impl FnOnce(&Forest<S>) -> T) -> T {
        read(self.shared.connector.lock().forest())
    }

    /// Edit the replica and send the resulting commands.
    pub async fn edit<T>(
        &self,
        edit: impl FnOnce(&mut Forest<S>) -> canopy_core::Result<T>,
    ) -> Result<T> {
        let result = self.shared.connector.lock().edit(edit);
        self.shared.publish_progress();
        self.shared.flush(None).await?;
        result
    }

    async fn query(&self, body: QueryBody) -> Result<ResponseBody> {
        let n = self.query_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = QueryId::new(format!("{}-q{}", self.config.client_id, n));
        let (tx, rx) = oneshot::channel();
        self.shared
            .queries
            .lock()
            .insert(id.clone(), (body.clone(), tx));
        tracing::debug!(query = %id, kind = body.name(), "Sending query");

        let request = ClientMessage::Query(QueryRequest::new(id.clone(), body));
        if let Err(error) = self.shared.flush(Some(request)).await {
            self.shared.queries.lock().remove(&id);
            return Err(error);
        }

        match tokio::time::timeout(self.config.query_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::Network(NetworkError::Disconnected)),
            Err(_) => {
                self.shared.queries.lock().remove(&id);
                Err(SyncError::Timeout(format!("query {}", id)))
            }
        }
    }

    pub async fn sign_on(&self) -> Result<ParticipationId> {
        if self.state() == SessionState::SignedOn {
            return Err(SyncError::AlreadySignedOn);
        }
        let body = QueryBody::SignOn {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_id: self.config.client_id.clone(),
            repository_id: self.config.repository_id.clone(),
        };
        match self.query(body).await? {
            ResponseBody::SignOn { participation_id } => Ok(participation_id),
            _ => Err(SyncError::UnexpectedResponse { query: "SignOn" }),
        }
    }

    pub async fn sign_off(&self) -> Result<()> {
        self.query(QueryBody::SignOff).await?;
        Ok(())
    }

    /// Resume a stale session over `transport`, then refresh every held
    /// partition, since events were not kept while the session was stale.
    /// On failure the session stays stale and must sign on anew.
    pub async fn reconnect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let (participation_id, last_received_sequence) =
            self.shared.connector.lock().session().reconnect_request()?;
        self.connect(transport);
        self.query(QueryBody::Reconnect {
            participation_id,
            last_received_sequence,
        })
        .await?;
        self.shared.flush(None).await?;
        for partition in self.partitions() {
            self.subscribe(&partition).await?;
        }
        Ok(())
    }

    pub async fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
        match self.query(QueryBody::ListPartitions).await? {
            ResponseBody::ListPartitions { partitions } => Ok(partitions),
            _ => Err(SyncError::UnexpectedResponse {
                query: "ListPartitions",
            }),
        }
    }

    pub async fn available_ids(&self, count: usize) -> Result<Vec<NodeId>> {
        match self.query(QueryBody::GetAvailableIds { count }).await? {
            ResponseBody::GetAvailableIds { ids } => Ok(ids),
            _ => Err(SyncError::UnexpectedResponse {
                query: "GetAvailableIds",
            }),
        }
    }

    /// Ask for creation and deletion notices; `partitions` also subscribes
    /// to the contents of partitions created from now on.
    pub async fn subscribe_to_changing_partitions(
        &self,
        creation: bool,
        deletion: bool,
        partitions: bool,
    ) -> Result<()> {
        self.query(QueryBody::SubscribeToChangingPartitions {
            creation,
            deletion,
            partitions,
        })
        .await?;
        Ok(())
    }

    /// Subscribe to `partition` and load its current contents.
    pub async fn subscribe(&self, partition: &NodeId) -> Result<()> {
        self.query(QueryBody::SubscribeToPartitionContents {
            partition: partition.clone(),
        })
        .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, partition: &NodeId) -> Result<()> {
        self.query(QueryBody::UnsubscribeFromPartitionContents {
            partition: partition.clone(),
        })
        .await?;
        Ok(())
    }

    /// Wait until every sent command has been answered.
    pub async fn settled(&self, timeout: Duration) -> Result<()> {
        self.wait_for(timeout, "pending commands", |p| p.pending == 0)
            .await
    }

    /// Wait until event `sequence` has been applied.
    pub async fn wait_for_sequence(
        &self,
        sequence: EventSequenceNumber,
        timeout: Duration,
    ) -> Result<()> {
        self.wait_for(timeout, "event sequence", move |p| p.last_sequence >= sequence)
            .await
    }

    async fn wait_for(
        &self,
        timeout: Duration,
        what: &str,
        done: impl Fn(&Progress) -> bool,
    ) -> Result<()> {
        self.shared.publish_progress();
        let mut progress = self.shared.progress.subscribe();
        let waiting = async {
            loop {
                if done(&progress.borrow_and_update()) {
                    return Ok(());
                }
                if progress.changed().await.is_err() {
                    return Err(SyncError::Network(NetworkError::Disconnected));
                }
            }
        };
        tokio::time::timeout(timeout, waiting)
            .await
            .unwrap_or_else(|_| Err(SyncError::Timeout(what.to_string())))
    }
}

impl<S: FeatureSlots> Drop for Client<S> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

fn fail_queries<S: FeatureSlots>(shared: &Shared<S>) {
    let queries: Vec<PendingQuery> = shared.queries.lock().drain().map(|(_, q)| q).collect();
    for (_, tx) in queries {
        let _ = tx.send(Err(SyncError::Network(NetworkError::Disconnected)));
    }
}

async fn read_loop<S: FeatureSlots>(
    shared: Arc<Shared<S>>,
    transport: Arc<dyn Transport>,
    generation: u64,
) {
    while let Ok(frame) = transport.recv().await {
        let message: ServerMessage = match codec::decode(&frame) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, "Dropping undecodable frame");
                continue;
            }
        };
        match message {
            ServerMessage::Response(response) => {
                let pending = shared.queries.lock().remove(&response.id);
                match pending {
                    Some((request, tx)) => {
                        let result = shared.connector.lock().on_response(&request, response.body);
                        let _ = tx.send(result);
                    }
                    None => tracing::debug!(query = %response.id, "Response to unknown query"),
                }
            }
            ServerMessage::Event(event) => {
                let received = shared.connector.lock().receive_event(&event);
                let published = match received {
                    Ok(received) => ClientEvent::Received(received),
                    Err(error) => {
                        tracing::warn!(sequence = event.sequence, %error, "Event not applied");
                        ClientEvent::Failed(error)
                    }
                };
                let _ = shared.events.send(published);
            }
        }
        shared.publish_progress();
    }

    if shared.generation.load(Ordering::SeqCst) == generation {
        tracing::info!("Connection lost");
        shared.connector.lock().connection_lost();
        shared.transport.write().take();
        fail_queries(&shared);
        let _ = shared.events.send(ClientEvent::Disconnected);
    }
}
