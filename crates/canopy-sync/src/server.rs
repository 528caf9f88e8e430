//! Async repository server: accepts transports and feeds their frames to a
//! [`RepositoryConnector`] one at a time.
//!
//! Each connection gets a reader task that forwards frames to a shared
//! inbox. A single loop drains the inbox, so commands are applied in the
//! order they arrive across all connections. Outgoing frames are written
//! after the repository lock is released.

use crate::codec;
use crate::network::{Listener, Transport};
use crate::participation::ConnectionId;
use crate::repository::{Outgoing, RepositoryConnector};
use canopy_core::{DynamicSlots, FeatureSlots, Forest};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

enum Input {
    Frame(ConnectionId, Vec<u8>),
    Closed(ConnectionId),
}

type Transports = Arc<Mutex<HashMap<ConnectionId, Arc<dyn Transport>>>>;

pub struct RepositoryServer<S: FeatureSlots = DynamicSlots> {
    repository: Arc<Mutex<RepositoryConnector<S>>>,
    transports: Transports,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl<S: FeatureSlots> RepositoryServer<S> {
    /// Serve `repository` on connections accepted from `listener`.
    pub fn spawn<L: Listener>(repository: RepositoryConnector<S>, listener: L) -> Self {
        let repository = Arc::new(Mutex::new(repository));
        let transports: Transports = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(serve(
            repository.clone(),
            transports.clone(),
            listener,
            shutdown_rx,
        ));
        Self {
            repository,
            transports,
            shutdown,
            task,
        }
    }

    /// Inspect the repository.
    pub fn with_repository<T>(&self, read: impl FnOnce(&RepositoryConnector<S>) -> T) -> T {
        read(&self.repository.lock())
    }

    /// Read the canonical forest.
    pub fn with_forest<T>(&self, read: impl FnOnce(&Forest<S>) -> T) -> T {
        read(self.repository.lock().forest())
    }

    /// Edit the canonical forest directly and broadcast the result.
    pub async fn mutate<T>(
        &self,
        edit: impl FnOnce(&mut Forest<S>) -> canopy_core::Result<T>,
    ) -> canopy_core::Result<T> {
        let (result, outgoing) = self.repository.lock().mutate(edit);
        deliver(&self.transports, outgoing).await;
        result
    }

    pub fn connections(&self) -> usize {
        self.transports.lock().len()
    }

    /// Stop accepting, close every connection and wait for the loop to end.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(error) = self.task.await {
            tracing::warn!(%error, "Server loop ended abnormally");
        }
    }
}

async fn serve<S: FeatureSlots, L: Listener>(
    repository: Arc<Mutex<RepositoryConnector<S>>>,
    transports: Transports,
    mut listener: L,
    mut shutdown: watch::Receiver<bool>,
) {
    let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    let mut accepting = true;
    tracing::info!("Repository server started");

    loop {
        tokio::select! {
            accepted = listener.accept(), if accepting => match accepted {
                Some(transport) => {
                    let connection = repository.lock().connect();
                    transports.lock().insert(connection, transport.clone());
                    readers.push(tokio::spawn(read_frames(connection, transport, inbox_tx.clone())));
                }
                None => accepting = false,
            },
            Some(input) = inbox.recv() => {
                let outgoing = match input {
                    Input::Frame(connection, frame) => repository.lock().handle_frame(connection, &frame),
                    Input::Closed(connection) => {
                        transports.lock().remove(&connection);
                        repository.lock().disconnect(connection);
                        Vec::new()
                    }
                };
                deliver(&transports, outgoing).await;
            }
            _ = shutdown.changed() => break,
        }
    }

    for reader in readers {
        reader.abort();
    }
    let open: Vec<Arc<dyn Transport>> = transports.lock().drain().map(|(_, t)| t).collect();
    join_all(open.iter().map(|transport| transport.close())).await;
    tracing::info!("Repository server stopped");
}

async fn read_frames(
    connection: ConnectionId,
    transport: Arc<dyn Transport>,
    inbox: mpsc::UnboundedSender<Input>,
) {
    while let Ok(frame) = transport.recv().await {
        if inbox.send(Input::Frame(connection, frame)).is_err() {
            return;
        }
    }
    let _ = inbox.send(Input::Closed(connection));
}

async fn deliver(transports: &Transports, outgoing: Vec<Outgoing>) {
    for Outgoing { connection, message } in outgoing {
        let Some(transport) = transports.lock().get(&connection).cloned() else {
            continue;
        };
        let frame = match codec::encode(&message) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(connection, %error, "Could not encode message");
                continue;
            }
        };
        if let Err(error) = transport.send(frame).await {
            tracing::debug!(connection, %error, "Dropped message for closed connection");
        }
    }
}
