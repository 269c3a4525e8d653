#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio_test::assert_ok;

use shelf_queue::{
    Command, CommandDescriptor, CommandMessage, CommandResult, InsertOutcome, Outcome, Priority,
    ProcessorConfig, ProcessorGroup, QueueStore, SqliteStore,
};

/// Test factory functions
fn message(key: &str, parameters: &str) -> CommandMessage {
    CommandMessage::new("general", "TouchManifest", key, parameters)
}

fn inserted(outcome: InsertOutcome) -> CommandDescriptor {
    match outcome {
        InsertOutcome::Inserted(descriptor) => descriptor,
        InsertOutcome::Duplicate(descriptor) => {
            panic!("expected an insert, found pending duplicate {}", descriptor.id)
        }
    }
}

#[tokio::test]
async fn test_pending_descriptors_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("commands.db");

    let first = {
        let store = SqliteStore::open(&path).await.unwrap();
        let first = inserted(store.try_insert(message("a", "{}")).await.unwrap());
        inserted(
            store
                .try_insert(message("b", "{}").with_priority(Priority::LOW))
                .await
                .unwrap(),
        );
        first
    };

    let reopened = SqliteStore::open(&path).await.unwrap();
    let pending = reopened.pending("general").await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0], first);
    assert_eq!(pending[1].idempotency_key, "b");
}

#[tokio::test]
async fn test_loaded_descriptor_equals_the_inserted_one() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("commands.db")).await.unwrap();

    let parameters = r#"{"path":"富士山/ep 01 [1080p].mkv","tags":["anime","✓"],"runtime_minutes":null}"#;
    let descriptor = inserted(
        store
            .try_insert(message("unicode", parameters).with_priority(Priority::URGENT))
            .await
            .unwrap(),
    );

    let loaded = store.find_by_key("unicode").await.unwrap().unwrap();
    assert_eq!(loaded, descriptor);
    assert_eq!(loaded.parameters, parameters);
}

#[tokio::test]
async fn test_running_marks_do_not_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("commands.db");

    let store = SqliteStore::open(&path).await.unwrap();
    store.try_insert(message("interrupted", "{}")).await.unwrap();
    let taken = store.take_next("general", None).await.unwrap().unwrap();
    assert!(store.take_next("general", None).await.unwrap().is_none());

    // A crash before remove leaves the row behind; a fresh process sees it
    // as pending again
    let recovered = SqliteStore::open(&path).await.unwrap();
    let again = recovered.take_next("general", None).await.unwrap().unwrap();
    assert_eq!(again.id, taken.id);
    assert_eq!(again.attempt_count, 0);
}

#[tokio::test]
async fn test_dedup_is_enforced_by_the_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("commands.db");

    // Two pools over one file, as two producer processes would be
    let writer_a = SqliteStore::open(&path).await.unwrap();
    let writer_b = SqliteStore::open(&path).await.unwrap();

    let a = writer_a.try_insert(message("shared", "{}")).await.unwrap();
    let b = writer_b.try_insert(message("shared", "{}")).await.unwrap();

    assert!(a.is_inserted());
    assert!(!b.is_inserted());
    assert_eq!(b.descriptor().id, a.descriptor().id);
    assert_eq!(writer_b.pending_count("general").await.unwrap(), 1);
}

#[tokio::test]
async fn test_reinsertion_persists_attempts_and_goes_behind_siblings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("commands.db");

    let store = SqliteStore::open(&path).await.unwrap();
    store.try_insert(message("first", "{}")).await.unwrap();
    store.try_insert(message("second", "{}")).await.unwrap();

    let mut taken = store.take_next("general", None).await.unwrap().unwrap();
    assert_eq!(taken.idempotency_key, "first");
    let old_sequence = taken.sequence;

    taken.record_retry();
    store.reinsert(taken).await.unwrap();

    let reopened = SqliteStore::open(&path).await.unwrap();
    let next = reopened.take_next("general", None).await.unwrap().unwrap();
    assert_eq!(next.idempotency_key, "second");

    let retried = reopened.take_next("general", None).await.unwrap().unwrap();
    assert_eq!(retried.idempotency_key, "first");
    assert_eq!(retried.attempt_count, 1);
    assert!(retried.sequence > old_sequence);
}

#[tokio::test]
async fn test_sequences_keep_growing_after_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("commands.db");

    let earlier = {
        let store = SqliteStore::open(&path).await.unwrap();
        store.try_insert(message("a", "{}")).await.unwrap();
        inserted(store.try_insert(message("b", "{}")).await.unwrap())
    };

    let reopened = SqliteStore::open(&path).await.unwrap();
    let later = inserted(reopened.try_insert(message("c", "{}")).await.unwrap());
    assert!(later.sequence > earlier.sequence);
}

#[derive(Default)]
struct ManifestContext {
    touched: Mutex<Vec<String>>,
}

#[derive(Serialize, Deserialize)]
struct TouchManifest {
    library: String,
}

#[async_trait]
impl Command for TouchManifest {
    type Context = ManifestContext;

    const TYPE_TAG: &'static str = "TouchManifest";
    const QUEUE: &'static str = "general";

    fn idempotency_key(&self) -> String {
        format!("TouchManifest:{}", self.library)
    }

    async fn execute(&self, ctx: &ManifestContext, _attempt: u32) -> CommandResult {
        ctx.touched.lock().push(self.library.clone());
        Ok(Outcome::Done)
    }
}

#[tokio::test]
async fn test_group_executes_from_a_durable_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("commands.db")).await.unwrap());
    let ctx = Arc::new(ManifestContext::default());

    let group = ProcessorGroup::builder(Arc::clone(&store) as Arc<dyn QueueStore>, Arc::clone(&ctx))
        .register::<TouchManifest>()
        .unwrap()
        .processor_with(
            "general",
            ProcessorConfig {
                idle_timeout: Duration::from_millis(25),
                ..ProcessorConfig::default()
            },
        )
        .start()
        .unwrap();

    assert!(group.enqueue(TouchManifest { library: "anime".into() }).await.unwrap());

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if group.pending_count("general").await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue did not drain in time");

    assert_eq!(*ctx.touched.lock(), vec!["anime".to_string()]);
    assert_eq!(store.pending_count("general").await.unwrap(), 0);
    tokio_test::assert_ok!(group.shutdown().await);
}
