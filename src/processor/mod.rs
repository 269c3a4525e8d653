//! Per-resource-class execution loops
//!
//! One processor owns one resource class ("general", "hasher", "images" in
//! the cataloging service) and runs exactly one command at a time, so a
//! command may assume uncontended access to whatever budget its class scopes:
//! the metadata provider's single connection, the disk, the artwork CDN.

pub mod group;

pub use group::{GroupBuilder, PauseAllGuard, ProcessorGroup};

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::{
    CommandDescriptor, CommandError, CommandRegistry, EligibilityFn, Outcome, Priority,
    ProcessorStatus, QueueEvent, QueueStore,
};

/// Configuration for one processor loop
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Upper bound on idle sleep between store polls; also bounds how stale
    /// an eligibility predicate's last verdict can get
    pub idle_timeout: Duration,

    /// Start with the pause flag already set
    pub start_paused: bool,

    /// Delay before retrying the store after an I/O failure
    pub store_retry_backoff: Duration,

    /// How long shutdown waits for the in-flight command before aborting
    pub shutdown_grace: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(500),
            start_paused: false,
            store_retry_backoff: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// State shared between a processor loop and the group handle
pub(crate) struct ProcessorShared {
    pub(crate) name: String,
    paused: AtomicBool,
    degraded: AtomicBool,
    pub(crate) wake: Notify,
    current: RwLock<Option<ExecutingInfo>>,
}

struct ExecutingInfo {
    type_tag: String,
    priority: Priority,
    description: String,
}

impl ProcessorShared {
    pub(crate) fn new(name: String, start_paused: bool) -> Self {
        Self {
            name,
            paused: AtomicBool::new(start_paused),
            degraded: AtomicBool::new(false),
            wake: Notify::new(),
            current: RwLock::new(None),
        }
    }

    /// Derive the advisory status; `Executing` wins over the pause flag
    /// because pausing mid-run lets the current command finish first.
    pub(crate) fn status(&self) -> ProcessorStatus {
        if let Some(info) = &*self.current.read() {
            return ProcessorStatus::Executing {
                type_tag: info.type_tag.clone(),
                priority: info.priority,
                description: info.description.clone(),
            };
        }
        if self.is_paused() {
            ProcessorStatus::Paused
        } else {
            ProcessorStatus::Idle
        }
    }

    /// Set the pause flag, returning its prior value
    pub(crate) fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::SeqCst)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    pub(crate) fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn begin_execution(&self, descriptor: &CommandDescriptor, description: String) {
        *self.current.write() = Some(ExecutingInfo {
            type_tag: descriptor.type_tag.clone(),
            priority: descriptor.priority,
            description,
        });
    }

    fn end_execution(&self) {
        *self.current.write() = None;
    }
}

/// Aborts the wrapped task when dropped early; a no-op once it finished
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The spawned half of one processor
pub(crate) struct ProcessorRuntime<C> {
    pub(crate) shared: Arc<ProcessorShared>,
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) registry: Arc<CommandRegistry<C>>,
    pub(crate) context: Arc<C>,
    pub(crate) config: ProcessorConfig,
    pub(crate) eligible: Option<Arc<EligibilityFn>>,
    pub(crate) events: broadcast::Sender<QueueEvent>,
}

impl<C: Send + Sync + 'static> ProcessorRuntime<C> {
    /// Run until shutdown is signaled
    ///
    /// Shutdown is only observed at the loop's suspension points, never while
    /// a command is mid-execution: the in-flight command always finishes, and
    /// force-termination belongs to the group's grace timer alone.
    pub(crate) async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(processor = %self.shared.name, "Processor started");

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                break;
            }

            if self.shared.is_paused() {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = self.shared.wake.notified() => {}
                }
                continue;
            }

            match self
                .store
                .take_next(&self.shared.name, self.eligible.as_deref())
                .await
            {
                Ok(Some(descriptor)) => {
                    self.shared.set_degraded(false);
                    self.run_one(descriptor).await;
                }
                Ok(None) => {
                    self.shared.set_degraded(false);
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        _ = self.shared.wake.notified() => {}
                        _ = tokio::time::sleep(self.config.idle_timeout) => {}
                    }
                }
                Err(error) => {
                    // Dequeuing stops here; behaving as if the queue were
                    // empty would silently drop work on the floor.
                    self.shared.set_degraded(true);
                    error!(
                        processor = %self.shared.name,
                        %error,
                        "Store unavailable, processor degraded"
                    );
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        _ = tokio::time::sleep(self.config.store_retry_backoff) => {}
                    }
                }
            }
        }

        info!(processor = %self.shared.name, "Processor stopped");
    }

    async fn run_one(&self, mut descriptor: CommandDescriptor) {
        let command = match self.registry.revive(&descriptor) {
            Ok(command) => command,
            Err(error) => {
                error!(
                    id = %descriptor.id,
                    type_tag = %descriptor.type_tag,
                    %error,
                    "Dropping descriptor that cannot be revived"
                );
                self.emit(QueueEvent::Dropped {
                    id: descriptor.id.clone(),
                    queue: descriptor.queue.clone(),
                    type_tag: descriptor.type_tag.clone(),
                    reason: error.to_string(),
                    at: Utc::now(),
                });
                self.finalize_remove(&descriptor).await;
                return;
            }
        };

        let description = command.describe();
        self.shared.begin_execution(&descriptor, description);
        self.emit(QueueEvent::Started {
            id: descriptor.id.clone(),
            queue: descriptor.queue.clone(),
            type_tag: descriptor.type_tag.clone(),
            at: Utc::now(),
        });
        debug!(
            id = %descriptor.id,
            type_tag = %descriptor.type_tag,
            attempt = descriptor.attempt_count,
            "Executing command"
        );
        let started = Instant::now();

        // Run inside its own task so a panicking command unwinds that task,
        // not the processor loop.
        let context = Arc::clone(&self.context);
        let attempt = descriptor.attempt_count;
        let mut execution =
            tokio::spawn(async move { command.execute(context.as_ref(), attempt).await });
        let abort_guard = AbortOnDrop(execution.abort_handle());
        let verdict = match (&mut execution).await {
            Ok(verdict) => verdict,
            Err(join_error) if join_error.is_panic() => Err(CommandError::Permanent(format!(
                "panicked: {}",
                panic_message(join_error.into_panic())
            ))),
            Err(_) => Err(CommandError::Permanent("execution task canceled".to_string())),
        };
        drop(abort_guard);
        self.shared.end_execution();

        match verdict {
            Ok(Outcome::Done) => {
                info!(
                    id = %descriptor.id,
                    type_tag = %descriptor.type_tag,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Command done"
                );
                self.emit(QueueEvent::Completed {
                    id: descriptor.id.clone(),
                    queue: descriptor.queue.clone(),
                    at: Utc::now(),
                });
                self.finalize_remove(&descriptor).await;
            }
            Ok(Outcome::Skipped) => {
                debug!(
                    id = %descriptor.id,
                    type_tag = %descriptor.type_tag,
                    "Command skipped, work not yet due"
                );
                self.emit(QueueEvent::Skipped {
                    id: descriptor.id.clone(),
                    queue: descriptor.queue.clone(),
                    at: Utc::now(),
                });
                self.finalize_remove(&descriptor).await;
            }
            Err(error) if error.is_retryable() => {
                descriptor.record_retry();
                warn!(
                    id = %descriptor.id,
                    type_tag = %descriptor.type_tag,
                    attempt_count = descriptor.attempt_count,
                    error = %error.message(),
                    "Command failed, reinserting at band tail"
                );
                self.emit(QueueEvent::Retrying {
                    id: descriptor.id.clone(),
                    queue: descriptor.queue.clone(),
                    attempt_count: descriptor.attempt_count,
                    error: error.message().to_string(),
                    at: Utc::now(),
                });
                if let Err(store_error) = self.store.reinsert(descriptor.clone()).await {
                    self.shared.set_degraded(true);
                    error!(
                        id = %descriptor.id,
                        error = %store_error,
                        "Failed to reinsert descriptor; it stays put and retries after restart"
                    );
                }
            }
            Err(error) => {
                // attempt_count only counts runs that ended retryable; the
                // final run still happened, so report it.
                error!(
                    id = %descriptor.id,
                    type_tag = %descriptor.type_tag,
                    attempts = descriptor.attempt_count + 1,
                    error = %error.message(),
                    "Command failed permanently"
                );
                self.emit(QueueEvent::Failed {
                    id: descriptor.id.clone(),
                    queue: descriptor.queue.clone(),
                    error: error.message().to_string(),
                    at: Utc::now(),
                });
                self.finalize_remove(&descriptor).await;
            }
        }
    }

    async fn finalize_remove(&self, descriptor: &CommandDescriptor) {
        if let Err(error) = self.store.remove(&descriptor.id).await {
            self.shared.set_degraded(true);
            error!(
                id = %descriptor.id,
                %error,
                "Failed to remove descriptor; it may run again after restart"
            );
        }
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }
}
