//! Fixed named set of processors over one shared store
//!
//! The group is the application-facing surface: commands go in through
//! [`ProcessorGroup::enqueue`], state comes out through statuses and the
//! event stream. The set of processors is declared once at startup; there is
//! no dynamic add or remove.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::{
    Command, CommandDescriptor, CommandRegistry, EligibilityFn, InsertOutcome, ProcessorStatus,
    QueueError, QueueEvent, QueueResult, QueueStore,
};

use super::{ProcessorConfig, ProcessorRuntime, ProcessorShared};

/// Type alias for boxed event streams (stable Rust compatible)
pub type EventStream = Pin<Box<dyn Stream<Item = QueueEvent> + Send + 'static>>;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

struct ProcessorSpec {
    name: String,
    config: ProcessorConfig,
    eligible: Option<Arc<EligibilityFn>>,
}

/// Declares the processors of a [`ProcessorGroup`] before starting them
pub struct GroupBuilder<C> {
    store: Arc<dyn QueueStore>,
    registry: CommandRegistry<C>,
    context: Arc<C>,
    processors: Vec<ProcessorSpec>,
    event_capacity: usize,
}

impl<C: Send + Sync + 'static> GroupBuilder<C> {
    /// Register a command type; unregistered types are rejected at enqueue
    pub fn register<K: Command<Context = C>>(mut self) -> QueueResult<Self> {
        self.registry.register::<K>()?;
        Ok(self)
    }

    /// Add a processor with default configuration
    pub fn processor(self, name: impl Into<String>) -> Self {
        self.processor_with(name, ProcessorConfig::default())
    }

    /// Add a processor with explicit configuration
    pub fn processor_with(mut self, name: impl Into<String>, config: ProcessorConfig) -> Self {
        self.processors.push(ProcessorSpec {
            name: name.into(),
            config,
            eligible: None,
        });
        self
    }

    /// Add a processor that only takes descriptors the predicate accepts
    ///
    /// The predicate is consulted on every scheduling decision, so external
    /// conditions (a provider ban window, a metered connection) are picked up
    /// without restarting anything.
    pub fn processor_with_eligibility<F>(
        mut self,
        name: impl Into<String>,
        config: ProcessorConfig,
        eligible: F,
    ) -> Self
    where
        F: Fn(&CommandDescriptor) -> bool + Send + Sync + 'static,
    {
        self.processors.push(ProcessorSpec {
            name: name.into(),
            config,
            eligible: Some(Arc::new(eligible)),
        });
        self
    }

    /// Capacity of the event broadcast channel
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Spawn every declared processor and hand back the group
    pub fn start(self) -> QueueResult<ProcessorGroup<C>> {
        if self.processors.is_empty() {
            return Err(QueueError::Internal(
                "processor group has no processors".to_string(),
            ));
        }

        let registry = Arc::new(self.registry);
        let (events, _) = broadcast::channel(self.event_capacity);
        let mut processors = HashMap::new();

        for spec in self.processors {
            let ProcessorSpec {
                name,
                config,
                eligible,
            } = spec;
            if processors.contains_key(&name) {
                return Err(QueueError::DuplicateProcessor(name));
            }

            let shared = Arc::new(ProcessorShared::new(name.clone(), config.start_paused));
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let runtime = ProcessorRuntime {
                shared: Arc::clone(&shared),
                store: Arc::clone(&self.store),
                registry: Arc::clone(&registry),
                context: Arc::clone(&self.context),
                config: config.clone(),
                eligible,
                events: events.clone(),
            };
            let join = tokio::spawn(runtime.run(shutdown_rx));

            processors.insert(
                name,
                ProcessorEntry {
                    shared,
                    shutdown_grace: config.shutdown_grace,
                    task: Mutex::new(Some(ProcessorTask { shutdown_tx, join })),
                },
            );
        }

        info!(processors = processors.len(), "Processor group started");

        Ok(ProcessorGroup {
            inner: Arc::new(GroupInner {
                store: self.store,
                registry,
                processors,
                events,
            }),
        })
    }
}

struct ProcessorTask {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

struct ProcessorEntry {
    shared: Arc<ProcessorShared>,
    shutdown_grace: Duration,
    task: Mutex<Option<ProcessorTask>>,
}

struct GroupInner<C> {
    store: Arc<dyn QueueStore>,
    registry: Arc<CommandRegistry<C>>,
    processors: HashMap<String, ProcessorEntry>,
    events: broadcast::Sender<QueueEvent>,
}

/// Handle to a running set of processors
///
/// Cloning is cheap and every clone drives the same group, so a clone can be
/// stashed in the execution context for commands that enqueue follow-up work.
pub struct ProcessorGroup<C> {
    inner: Arc<GroupInner<C>>,
}

impl<C> Clone for ProcessorGroup<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Send + Sync + 'static> ProcessorGroup<C> {
    /// Start declaring a group over the given store and execution context
    pub fn builder(store: Arc<dyn QueueStore>, context: Arc<C>) -> GroupBuilder<C> {
        GroupBuilder {
            store,
            registry: CommandRegistry::new(),
            context,
            processors: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Enqueue a command onto its processor's queue
    ///
    /// Returns `Ok(true)` if the command was accepted, `Ok(false)` if an
    /// equivalent command (same idempotency key) is already pending. Commands
    /// whose type was never registered, or whose queue has no processor in
    /// this group, are rejected here rather than at execution time.
    #[instrument(skip(self, command), fields(type_tag = K::TYPE_TAG, queue = K::QUEUE))]
    pub async fn enqueue<K: Command<Context = C>>(&self, command: K) -> QueueResult<bool> {
        let message = self.inner.registry.message_for(&command)?;
        let entry = self
            .inner
            .processors
            .get(K::QUEUE)
            .ok_or_else(|| QueueError::UnknownProcessor(K::QUEUE.to_string()))?;

        match self.inner.store.try_insert(message).await? {
            InsertOutcome::Inserted(descriptor) => {
                info!(id = %descriptor.id, "Command enqueued");
                self.emit(QueueEvent::Enqueued {
                    id: descriptor.id.clone(),
                    queue: descriptor.queue.clone(),
                    type_tag: descriptor.type_tag.clone(),
                    priority: descriptor.priority,
                    at: Utc::now(),
                });
                entry.shared.wake.notify_one();
                Ok(true)
            }
            InsertOutcome::Duplicate(existing) => {
                debug!(id = %existing.id, "Equivalent command already pending");
                Ok(false)
            }
        }
    }

    /// Pause one processor; the in-flight command, if any, still finishes
    pub fn pause(&self, name: &str) -> QueueResult<()> {
        let entry = self.entry(name)?;
        self.set_processor_paused(name, entry, true);
        Ok(())
    }

    /// Resume one processor
    pub fn resume(&self, name: &str) -> QueueResult<()> {
        let entry = self.entry(name)?;
        self.set_processor_paused(name, entry, false);
        Ok(())
    }

    /// Pause every processor in the group
    pub fn pause_all(&self) {
        for (name, entry) in &self.inner.processors {
            self.set_processor_paused(name, entry, true);
        }
    }

    /// Resume every processor in the group
    pub fn resume_all(&self) {
        for (name, entry) in &self.inner.processors {
            self.set_processor_paused(name, entry, false);
        }
    }

    /// Pause every processor until the guard drops, then restore each
    /// processor's previous flag
    ///
    /// For bulk operations that must not race the processors, like rebuilding
    /// the library from an import. A processor that was already paused before
    /// the guard stays paused after it.
    #[must_use]
    pub fn pause_all_scoped(&self) -> PauseAllGuard<'_, C> {
        let mut prior = Vec::new();
        for (name, entry) in &self.inner.processors {
            let was_paused = entry.shared.set_paused(true);
            if !was_paused {
                info!(processor = %name, "Processor paused");
                self.emit(QueueEvent::Paused {
                    processor: name.clone(),
                    at: Utc::now(),
                });
            }
            prior.push((name.clone(), was_paused));
        }
        PauseAllGuard { group: self, prior }
    }

    /// Advisory status of one processor
    pub fn status(&self, name: &str) -> QueueResult<ProcessorStatus> {
        Ok(self.entry(name)?.shared.status())
    }

    /// Advisory status of every processor
    pub fn statuses(&self) -> HashMap<String, ProcessorStatus> {
        self.inner
            .processors
            .iter()
            .map(|(name, entry)| (name.clone(), entry.shared.status()))
            .collect()
    }

    /// Pending descriptors for one processor's queue, in scheduling order
    pub async fn pending(&self, name: &str) -> QueueResult<Vec<CommandDescriptor>> {
        self.entry(name)?;
        self.inner.store.pending(name).await
    }

    /// Number of pending descriptors for one processor's queue
    pub async fn pending_count(&self, name: &str) -> QueueResult<usize> {
        self.entry(name)?;
        self.inner.store.pending_count(name).await
    }

    /// True while any processor is unable to reach the store
    pub fn is_degraded(&self) -> bool {
        self.inner
            .processors
            .values()
            .any(|entry| entry.shared.is_degraded())
    }

    /// Names of the group's processors, sorted
    pub fn processor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.processors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Subscribe to queue events; slow subscribers miss events rather than
    /// back-pressuring the processors
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Queue events as a stream
    pub fn event_stream(&self) -> EventStream {
        let receiver = self.inner.events.subscribe();
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    /// The store this group schedules from
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.inner.store
    }

    /// The command registry this group revives descriptors with
    pub fn registry(&self) -> &CommandRegistry<C> {
        &self.inner.registry
    }

    /// Stop every processor
    ///
    /// Each processor gets its configured grace period to finish the command
    /// it is executing; one that overruns is aborted and reported in the
    /// error. Idempotent, and safe to call from any clone.
    pub async fn shutdown(&self) -> QueueResult<()> {
        info!("Shutting down processor group");

        let mut stopping = Vec::new();
        for (name, entry) in &self.inner.processors {
            let Some(task) = entry.task.lock().take() else {
                continue;
            };
            let ProcessorTask { shutdown_tx, join } = task;
            let _ = shutdown_tx.send(());
            stopping.push((name.clone(), entry.shutdown_grace, join));
        }

        let mut stuck = Vec::new();
        for (name, grace, mut join) in stopping {
            match tokio::time::timeout(grace, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    error!(processor = %name, %join_error, "Processor task ended abnormally");
                }
                Err(_) => {
                    error!(
                        processor = %name,
                        "Processor did not stop within the grace period, aborting"
                    );
                    join.abort();
                    stuck.push(name);
                }
            }
        }

        if stuck.is_empty() {
            Ok(())
        } else {
            stuck.sort();
            Err(QueueError::ShutdownTimeout { processors: stuck })
        }
    }

    fn entry(&self, name: &str) -> QueueResult<&ProcessorEntry> {
        self.inner
            .processors
            .get(name)
            .ok_or_else(|| QueueError::UnknownProcessor(name.to_string()))
    }

    fn set_processor_paused(&self, name: &str, entry: &ProcessorEntry, paused: bool) {
        let prior = entry.shared.set_paused(paused);
        if prior == paused {
            return;
        }
        if paused {
            info!(processor = %name, "Processor paused");
            self.emit(QueueEvent::Paused {
                processor: name.to_string(),
                at: Utc::now(),
            });
        } else {
            info!(processor = %name, "Processor resumed");
            entry.shared.wake.notify_one();
            self.emit(QueueEvent::Resumed {
                processor: name.to_string(),
                at: Utc::now(),
            });
        }
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.inner.events.send(event);
    }
}

/// Restores every processor's previous pause flag when dropped
pub struct PauseAllGuard<'a, C: Send + Sync + 'static> {
    group: &'a ProcessorGroup<C>,
    prior: Vec<(String, bool)>,
}

impl<C: Send + Sync + 'static> Drop for PauseAllGuard<'_, C> {
    fn drop(&mut self) {
        for (name, was_paused) in self.prior.drain(..) {
            if was_paused {
                continue;
            }
            if let Some(entry) = self.group.inner.processors.get(&name) {
                self.group.set_processor_paused(&name, entry, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    struct NoContext;

    fn store() -> Arc<dyn QueueStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn builder_rejects_duplicate_processor_names() {
        let result = ProcessorGroup::builder(store(), Arc::new(NoContext))
            .processor("general")
            .processor("general")
            .start();

        assert!(matches!(result, Err(QueueError::DuplicateProcessor(name)) if name == "general"));
    }

    #[tokio::test]
    async fn builder_rejects_empty_groups() {
        let result = ProcessorGroup::builder(store(), Arc::new(NoContext)).start();
        assert!(matches!(result, Err(QueueError::Internal(_))));
    }

    #[tokio::test]
    async fn pause_of_unknown_processor_is_an_error() {
        let group = ProcessorGroup::builder(store(), Arc::new(NoContext))
            .processor("general")
            .start()
            .unwrap();

        assert!(matches!(
            group.pause("hasher"),
            Err(QueueError::UnknownProcessor(name)) if name == "hasher"
        ));

        group.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn scoped_pause_restores_prior_flags() {
        let group = ProcessorGroup::builder(store(), Arc::new(NoContext))
            .processor("general")
            .processor_with(
                "hasher",
                ProcessorConfig {
                    start_paused: true,
                    ..ProcessorConfig::default()
                },
            )
            .start()
            .unwrap();

        {
            let _guard = group.pause_all_scoped();
            assert_eq!(group.status("general").unwrap(), ProcessorStatus::Paused);
            assert_eq!(group.status("hasher").unwrap(), ProcessorStatus::Paused);
        }

        assert_eq!(group.status("general").unwrap(), ProcessorStatus::Idle);
        assert_eq!(group.status("hasher").unwrap(), ProcessorStatus::Paused);

        group.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let group = ProcessorGroup::builder(store(), Arc::new(NoContext))
            .processor("general")
            .start()
            .unwrap();

        group.shutdown().await.unwrap();
        group.shutdown().await.unwrap();
    }
}
