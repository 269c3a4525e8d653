//! Storage backends for queued descriptors
//!
//! The store is the only state shared between processors and producers, so
//! every operation here is atomic with respect to the others: insert-if-absent
//! against the dedup index, ordered take, removal, tail reinsertion.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::{CommandDescriptor, CommandMessage, DescriptorId, QueueResult};

/// Predicate restricting which pending descriptors may currently be taken
///
/// Supplied by the owning processor; lets a command type make itself
/// ineligible (say, while an external request budget is exhausted) instead of
/// being dequeued only to busy-fail.
pub type EligibilityFn = dyn Fn(&CommandDescriptor) -> bool + Send + Sync;

/// Result of offering a message to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// No pending descriptor shared the idempotency key; this one is now
    /// persisted
    Inserted(CommandDescriptor),

    /// An equivalent action was already pending; carries the existing
    /// descriptor, nothing was written
    Duplicate(CommandDescriptor),
}

impl InsertOutcome {
    /// Check whether the offer was accepted
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    /// The persisted descriptor: the new one, or the pending duplicate
    pub fn descriptor(&self) -> &CommandDescriptor {
        match self {
            Self::Inserted(d) | Self::Duplicate(d) => d,
        }
    }
}

/// Durable repository for descriptors
///
/// Contract, shared by every implementation:
/// - `try_insert` is atomic with respect to the idempotency check: under
///   concurrent producers, at most one descriptor per key ever becomes
///   pending. A successful insert is persisted before the call returns.
/// - `take_next` returns the lowest `(priority, sequence)` eligible
///   descriptor of a queue and marks it running. The mark is process-local
///   bookkeeping, never persisted: a crash between take and remove leaves the
///   descriptor in place, and a restarted process sees it as pending again.
/// - `remove` is the only way a descriptor leaves the store.
/// - `reinsert` returns a taken descriptor to its priority band's tail by
///   assigning the next sequence number.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Offer a message; insert-if-absent keyed by idempotency key
    async fn try_insert(&self, message: CommandMessage) -> QueueResult<InsertOutcome>;

    /// Take the next eligible descriptor of a queue, marking it running
    async fn take_next(
        &self,
        queue: &str,
        eligible: Option<&EligibilityFn>,
    ) -> QueueResult<Option<CommandDescriptor>>;

    /// Remove a descriptor for good (done, skipped, permanently failed)
    async fn remove(&self, id: &DescriptorId) -> QueueResult<()>;

    /// Return a taken descriptor to the tail of its priority band
    ///
    /// The caller has already refreshed `updated_at` and bumped
    /// `attempt_count`; the store assigns a fresh sequence and clears the
    /// running mark.
    async fn reinsert(&self, descriptor: CommandDescriptor) -> QueueResult<()>;

    /// Dedup-index lookup
    async fn find_by_key(&self, idempotency_key: &str) -> QueueResult<Option<CommandDescriptor>>;

    /// Ordered snapshot of a queue's pending descriptors (running included)
    async fn pending(&self, queue: &str) -> QueueResult<Vec<CommandDescriptor>>;

    /// Number of descriptors currently in a queue (running included)
    async fn pending_count(&self, queue: &str) -> QueueResult<usize>;
}
