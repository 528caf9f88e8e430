//! Repository and clients talking over in-memory transports.

use async_trait::async_trait;
use canopy_core::{
    builtins, subtree_eq, Forest, LanguageBuilder, LanguageRegistry, MetaPointer, Multiplicity,
    NodeId, PropertyValue, Value,
};
use canopy_delta::ErrorCode;
use canopy_sync::prelude::*;
use canopy_sync::{ClientConfig, MemoryConnector, NetworkError, Received, SyncError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn p(key: &str) -> MetaPointer {
    MetaPointer::new("geo", "1", key)
}

fn registry() -> Arc<LanguageRegistry> {
    let lang = LanguageBuilder::new("geo", "1")
        .partition_concept("Geometry", |c| {
            c.containment("shapes", "Shape", Multiplicity::ZeroOrMore)
        })
        .abstract_concept("Shape", |c| {
            c.property("name", builtins::string(), Multiplicity::Optional)
        })
        .concept("Line", |c| {
            c.extends("Shape")
                .containment("points", "Point", Multiplicity::ZeroOrMore)
        })
        .concept("Point", |c| {
            c.property("x", builtins::integer(), Multiplicity::Optional)
        })
        .build();
    let mut registry = LanguageRegistry::new();
    registry.register(lang).unwrap();
    Arc::new(registry)
}

fn config(name: &str) -> ClientConfig {
    ClientConfigBuilder::new()
        .client_id(name)
        .query_timeout(2000)
        .build()
}

struct World {
    server: RepositoryServer,
    connector: MemoryConnector,
}

impl World {
    fn start() -> Self {
        Self::with_config(RepositoryConfig::default())
    }

    fn with_config(config: RepositoryConfig) -> Self {
        let (connector, listener) = memory_listener();
        let repository = RepositoryConnector::new(config, registry());
        Self {
            server: RepositoryServer::spawn(repository, listener),
            connector,
        }
    }

    async fn client(&self, name: &str) -> Client {
        let client = Client::new(config(name), registry());
        client.connect(self.connector.connect().unwrap());
        client.sign_on().await.unwrap();
        client
    }

    fn assert_replica(&self, client: &Client, partition: &str) {
        let partition: NodeId = partition.into();
        let same = self.server.with_forest(|repo| {
            client.with_forest(|replica| subtree_eq(repo, &partition, replica, &partition))
        });
        assert!(same, "{} diverged from the repository", partition);
    }
}

async fn create_geo(client: &Client) {
    client
        .edit(|f| {
            f.create_node("geo", &p("Geometry"))?;
            f.add_partition(&"geo".into())
        })
        .await
        .unwrap();
    client.settled(WAIT).await.unwrap();
}

fn line_at_zero(forest: &Forest) -> Option<NodeId> {
    forest
        .children(&"geo".into(), &p("shapes"))
        .ok()
        .and_then(|shapes| shapes.first().cloned())
}

#[tokio::test]
async fn line_inserted_by_one_client_reaches_a_subscriber() {
    let world = World::start();
    let alice = world.client("alice").await;
    let bob = world.client("bob").await;

    create_geo(&alice).await;
    bob.subscribe(&"geo".into()).await.unwrap();
    assert_eq!(bob.partitions(), vec![NodeId::from("geo")]);
    assert_eq!(bob.with_forest(line_at_zero), None);

    alice
        .edit(|f| {
            f.create_node("line-1", &p("Line"))?;
            f.set_property(&"line-1".into(), &p("name"), Some(PropertyValue::String("edge".into())))?;
            f.insert(&"geo".into(), &p("shapes"), 0, vec![Value::Node("line-1".into())])
        })
        .await
        .unwrap();
    alice.settled(WAIT).await.unwrap();
    bob.wait_for_sequence(1, WAIT).await.unwrap();

    assert_eq!(bob.with_forest(line_at_zero), Some(NodeId::from("line-1")));
    world.assert_replica(&alice, "geo");
    world.assert_replica(&bob, "geo");
    world.server.shutdown().await;
}

#[tokio::test]
async fn sequence_numbers_have_no_gaps() {
    let world = World::start();
    let alice = world.client("alice").await;
    let bob = world.client("bob").await;
    create_geo(&alice).await;
    bob.subscribe(&"geo".into()).await.unwrap();
    let mut feed = bob.events();

    for i in 0..5 {
        let id = format!("l{}", i);
        alice
            .edit(|f| {
                f.create_node(id.as_str(), &p("Line"))?;
                f.add(&"geo".into(), &p("shapes"), vec![Value::Node(id.as_str().into())])
            })
            .await
            .unwrap();
    }
    bob.wait_for_sequence(5, WAIT).await.unwrap();

    let mut sequences = Vec::new();
    while sequences.len() < 5 {
        match feed.recv().await.unwrap() {
            ClientEvent::Received(Received::Remote { sequence, .. }) => sequences.push(sequence),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    world.assert_replica(&bob, "geo");
}

#[tokio::test]
async fn composite_edit_arrives_as_one_event() {
    let world = World::start();
    let alice = world.client("alice").await;
    let bob = world.client("bob").await;
    create_geo(&alice).await;
    bob.subscribe(&"geo".into()).await.unwrap();
    let mut feed = bob.events();

    // One `add` of three children is one composite command.
    alice
        .edit(|f| {
            for id in ["a", "b", "c"] {
                f.create_node(id, &p("Line"))?;
            }
            f.add(
                &"geo".into(),
                &p("shapes"),
                vec![Value::Node("a".into()), Value::Node("b".into()), Value::Node("c".into())],
            )
        })
        .await
        .unwrap();
    bob.wait_for_sequence(1, WAIT).await.unwrap();

    match feed.recv().await.unwrap() {
        ClientEvent::Received(Received::Remote { sequence, changes }) => {
            assert_eq!(sequence, 1);
            assert_eq!(changes, 3);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(bob.last_sequence(), 1);
    world.assert_replica(&bob, "geo");
}

#[tokio::test]
async fn invisible_command_is_acknowledged() {
    let config = RepositoryConfigBuilder::new().subscribe_originator(false).build();
    let world = World::with_config(config);
    let alice = world.client("alice").await;

    alice
        .edit(|f| {
            f.create_node("geo", &p("Geometry"))?;
            f.add_partition(&"geo".into())
        })
        .await
        .unwrap();
    alice.settled(WAIT).await.unwrap();

    assert_eq!(alice.last_sequence(), 1);
    assert!(alice.partitions().is_empty());
    assert!(world.server.with_forest(|f| f.is_partition(&"geo".into())));
}

#[tokio::test]
async fn creation_and_deletion_notices() {
    let world = World::start();
    let alice = world.client("alice").await;
    let watcher = world.client("watcher").await;
    watcher
        .subscribe_to_changing_partitions(true, true, true)
        .await
        .unwrap();

    create_geo(&alice).await;
    watcher.wait_for_sequence(1, WAIT).await.unwrap();
    assert_eq!(watcher.partitions(), vec![NodeId::from("geo")]);

    // Auto-subscribed, so contents follow.
    alice
        .edit(|f| {
            f.create_node("l1", &p("Line"))?;
            f.add(&"geo".into(), &p("shapes"), vec![Value::Node("l1".into())])
        })
        .await
        .unwrap();
    watcher.wait_for_sequence(2, WAIT).await.unwrap();
    world.assert_replica(&watcher, "geo");

    alice
        .edit(|f| f.delete_partition(&"geo".into()))
        .await
        .unwrap();
    alice.settled(WAIT).await.unwrap();
    watcher.wait_for_sequence(3, WAIT).await.unwrap();
    assert!(watcher.partitions().is_empty());
    assert!(alice.partitions().is_empty());
    world.server.with_repository(|repo| {
        assert!(repo
            .participations()
            .all(|participation| participation.subscriptions().next().is_none()));
    });
}

#[tokio::test]
async fn move_across_partitions_is_translated() {
    let world = World::start();
    let alice = world.client("alice").await;
    let bob = world.client("bob").await;

    alice
        .edit(|f| {
            for geo in ["geo", "other"] {
                f.create_node(geo, &p("Geometry"))?;
                f.add_partition(&geo.into())?;
            }
            f.create_node("l1", &p("Line"))?;
            f.add(&"other".into(), &p("shapes"), vec![Value::Node("l1".into())])
        })
        .await
        .unwrap();
    alice.settled(WAIT).await.unwrap();

    // Bob only sees the destination.
    bob.subscribe(&"geo".into()).await.unwrap();
    alice
        .edit(|f| f.add(&"geo".into(), &p("shapes"), vec![Value::Node("l1".into())]))
        .await
        .unwrap();
    bob.wait_for_sequence(1, WAIT).await.unwrap();

    assert_eq!(bob.with_forest(line_at_zero), Some(NodeId::from("l1")));
    world.assert_replica(&bob, "geo");
    world.assert_replica(&alice, "geo");
    world.assert_replica(&alice, "other");
}

#[tokio::test]
async fn concurrent_edits_converge() {
    let world = World::start();
    let alice = world.client("alice").await;
    let bob = world.client("bob").await;
    create_geo(&alice).await;
    bob.subscribe(&"geo".into()).await.unwrap();

    let edits = |client: &'static str| {
        move |f: &mut Forest| -> canopy_core::Result<()> {
            for i in 0..3 {
                let id = format!("{}-{}", client, i);
                f.create_node(id.as_str(), &p("Line"))?;
                f.insert(&"geo".into(), &p("shapes"), 0, vec![Value::Node(id.as_str().into())])?;
            }
            Ok(())
        }
    };
    let (a, b) = tokio::join!(alice.edit(edits("a")), bob.edit(edits("b")));
    a.unwrap();
    b.unwrap();
    alice.settled(WAIT).await.unwrap();
    bob.settled(WAIT).await.unwrap();

    let expected = world.server.with_forest(|f| f.children(&"geo".into(), &p("shapes")).unwrap());
    assert_eq!(expected.len(), 6);
    for client in [&alice, &bob] {
        let last = world.server.with_repository(|repo| {
            repo.participation(&client.participation().unwrap())
                .unwrap()
                .last_sequence()
        });
        client.wait_for_sequence(last, WAIT).await.unwrap();
        world.assert_replica(client, "geo");
    }
}

#[tokio::test]
async fn commands_before_sign_on_are_refused() {
    let world = World::start();
    let client: Client = Client::new(config("early"), registry());
    client.connect(world.connector.connect().unwrap());

    let edit = client.edit(|f| f.create_node("x", &p("Line"))).await;
    assert!(matches!(edit, Err(SyncError::NotSignedOn)));
    assert!(matches!(
        client.list_partitions().await,
        Err(SyncError::NotSignedOn)
    ));
    assert_eq!(client.state(), SessionState::SignedOff);
}

#[tokio::test]
async fn sign_on_with_unknown_repository_fails() {
    let world = World::start();
    let config = ClientConfigBuilder::new()
        .client_id("lost")
        .repository_id("elsewhere")
        .build();
    let client: Client = Client::new(config, registry());
    client.connect(world.connector.connect().unwrap());
    assert!(matches!(
        client.sign_on().await,
        Err(SyncError::QueryFailed {
            code: ErrorCode::UnknownRepository,
            ..
        })
    ));
    assert_eq!(client.state(), SessionState::SignedOff);
}

#[tokio::test]
async fn reconnect_resumes_and_refreshes() {
    let world = World::start();
    let alice = world.client("alice").await;
    let bob = world.client("bob").await;
    create_geo(&alice).await;
    bob.subscribe(&"geo".into()).await.unwrap();
    let participation = bob.participation().unwrap();

    bob.disconnect().await;
    assert_eq!(bob.state(), SessionState::Stale);
    wait_until_stale(&world, &participation).await;

    // Made while bob is away; arrives through the refresh, not as an event.
    alice
        .edit(|f| {
            f.create_node("l1", &p("Line"))?;
            f.add(&"geo".into(), &p("shapes"), vec![Value::Node("l1".into())])
        })
        .await
        .unwrap();
    alice.settled(WAIT).await.unwrap();

    bob.reconnect(world.connector.connect().unwrap()).await.unwrap();
    assert_eq!(bob.state(), SessionState::SignedOn);
    assert_eq!(bob.participation(), Some(participation));
    assert_eq!(bob.last_sequence(), 0);
    world.assert_replica(&bob, "geo");

    alice
        .edit(|f| f.set_property(&"l1".into(), &p("name"), Some(PropertyValue::String("back".into()))))
        .await
        .unwrap();
    bob.wait_for_sequence(1, WAIT).await.unwrap();
    world.assert_replica(&bob, "geo");
}

/// A transport that can stop passing frames up, losing them.
struct Lossy {
    inner: Arc<dyn Transport>,
    deaf: AtomicBool,
}

#[async_trait]
impl Transport for Lossy {
    async fn send(&self, frame: Vec<u8>) -> Result<(), NetworkError> {
        self.inner.send(frame).await
    }

    async fn recv(&self) -> Result<Vec<u8>, NetworkError> {
        loop {
            let frame = self.inner.recv().await?;
            if !self.deaf.load(Ordering::SeqCst) {
                return Ok(frame);
            }
        }
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

#[tokio::test]
async fn reconnect_after_lost_events_fails() {
    let world = World::start();
    let alice = world.client("alice").await;
    create_geo(&alice).await;

    let lossy = Arc::new(Lossy {
        inner: world.connector.connect().unwrap(),
        deaf: AtomicBool::new(false),
    });
    let bob: Client = Client::new(config("bob"), registry());
    bob.connect(lossy.clone());
    let participation = bob.sign_on().await.unwrap();
    bob.subscribe(&"geo".into()).await.unwrap();

    lossy.deaf.store(true, Ordering::SeqCst);
    alice
        .edit(|f| {
            f.create_node("l1", &p("Line"))?;
            f.add(&"geo".into(), &p("shapes"), vec![Value::Node("l1".into())])
        })
        .await
        .unwrap();
    alice.settled(WAIT).await.unwrap();
    let sent = world.server.with_repository(|repo| {
        repo.participation(&participation).unwrap().last_sequence()
    });
    assert_eq!(sent, 1);

    bob.disconnect().await;
    wait_until_stale(&world, &participation).await;
    let result = bob.reconnect(world.connector.connect().unwrap()).await;
    assert!(matches!(result, Err(SyncError::ReconnectMismatch(_))));
    assert_eq!(bob.state(), SessionState::Stale);
    assert!(matches!(
        bob.edit(|f| f.create_node("x", &p("Line"))).await,
        Err(SyncError::NotSignedOn)
    ));

    // A fresh sign-on starts over.
    bob.sign_on().await.unwrap();
    assert_eq!(bob.state(), SessionState::SignedOn);
    assert!(bob.partitions().is_empty());
}

async fn wait_until_stale(world: &World, participation: &canopy_delta::ParticipationId) {
    tokio::time::timeout(WAIT, async {
        loop {
            let stale = world.server.with_repository(|repo| {
                repo.participation(participation)
                    .map(|p| !p.is_active())
                    .unwrap_or(false)
            });
            if stale {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
