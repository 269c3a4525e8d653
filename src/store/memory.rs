//! In-process store
//!
//! Reference implementation of the store contract; also what the test suite
//! drives. Holds everything under one lock so the compound operations
//! (dedup-check-then-insert, scan-then-mark) are serialized exactly the way
//! the durable store serializes them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    CommandDescriptor, CommandMessage, DescriptorId, EligibilityFn, InsertOutcome, QueueError,
    QueueResult, QueueStore,
};

#[derive(Default)]
struct StoreState {
    /// Every live descriptor, running ones included
    descriptors: HashMap<DescriptorId, CommandDescriptor>,

    /// Per-queue ids kept sorted by (priority, sequence)
    queues: HashMap<String, VecDeque<DescriptorId>>,

    /// Dedup index: idempotency key -> pending descriptor
    by_key: HashMap<String, DescriptorId>,

    /// Process-local running marks; a descriptor stays in `queues` and
    /// `by_key` while running so dedup keeps holding its key
    running: HashSet<DescriptorId>,

    /// Monotonic insertion counter
    next_sequence: u64,
}

/// In-memory queue store
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

/// Insert an id into its queue keeping (priority, sequence) order
///
/// New sequences are always the largest, so the scan only ever moves an id
/// ahead of lower-urgency bands, never inside its own band.
fn insert_ordered(state: &mut StoreState, descriptor: &CommandDescriptor) {
    let key = descriptor.order_key();
    let deque = state.queues.entry(descriptor.queue.clone()).or_default();
    let position = deque.iter().position(|queued| {
        state
            .descriptors
            .get(queued)
            .map(|d| d.order_key() > key)
            .unwrap_or(false)
    });
    match position {
        Some(index) => deque.insert(index, descriptor.id.clone()),
        None => deque.push_back(descriptor.id.clone()),
    }
}

fn unlink(state: &mut StoreState, descriptor: &CommandDescriptor) {
    if let Some(deque) = state.queues.get_mut(&descriptor.queue) {
        if let Some(position) = deque.iter().position(|queued| queued == &descriptor.id) {
            deque.remove(position);
        }
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn try_insert(&self, message: CommandMessage) -> QueueResult<InsertOutcome> {
        let state = &mut *self.state.lock();

        if let Some(existing_id) = state.by_key.get(&message.idempotency_key) {
            let existing = state
                .descriptors
                .get(existing_id)
                .cloned()
                .ok_or_else(|| QueueError::Internal("dedup index out of sync".to_string()))?;
            debug!(
                idempotency_key = %message.idempotency_key,
                existing_id = %existing.id,
                "Rejected duplicate enqueue"
            );
            return Ok(InsertOutcome::Duplicate(existing));
        }

        state.next_sequence += 1;
        let descriptor =
            CommandDescriptor::from_message(message, DescriptorId::new(), state.next_sequence);

        insert_ordered(state, &descriptor);
        state
            .by_key
            .insert(descriptor.idempotency_key.clone(), descriptor.id.clone());
        state
            .descriptors
            .insert(descriptor.id.clone(), descriptor.clone());

        debug!(
            id = %descriptor.id,
            queue = %descriptor.queue,
            type_tag = %descriptor.type_tag,
            priority = %descriptor.priority,
            sequence = descriptor.sequence,
            "Inserted descriptor"
        );
        Ok(InsertOutcome::Inserted(descriptor))
    }

    async fn take_next(
        &self,
        queue: &str,
        eligible: Option<&EligibilityFn>,
    ) -> QueueResult<Option<CommandDescriptor>> {
        let state = &mut *self.state.lock();

        let taken = match state.queues.get(queue) {
            Some(deque) => deque.iter().find_map(|id| {
                if state.running.contains(id) {
                    return None;
                }
                let descriptor = state.descriptors.get(id)?;
                match eligible {
                    Some(predicate) if !predicate(descriptor) => None,
                    _ => Some(descriptor.clone()),
                }
            }),
            None => None,
        };

        if let Some(descriptor) = taken {
            state.running.insert(descriptor.id.clone());
            debug!(
                id = %descriptor.id,
                queue = %descriptor.queue,
                type_tag = %descriptor.type_tag,
                "Took descriptor"
            );
            Ok(Some(descriptor))
        } else {
            Ok(None)
        }
    }

    async fn remove(&self, id: &DescriptorId) -> QueueResult<()> {
        let state = &mut *self.state.lock();

        let descriptor = state
            .descriptors
            .remove(id)
            .ok_or_else(|| QueueError::DescriptorNotFound(id.to_string()))?;
        state.by_key.remove(&descriptor.idempotency_key);
        state.running.remove(id);
        unlink(state, &descriptor);
        Ok(())
    }

    async fn reinsert(&self, descriptor: CommandDescriptor) -> QueueResult<()> {
        let state = &mut *self.state.lock();

        if !state.descriptors.contains_key(&descriptor.id) {
            return Err(QueueError::DescriptorNotFound(descriptor.id.to_string()));
        }

        let mut descriptor = descriptor;
        state.next_sequence += 1;
        descriptor.sequence = state.next_sequence;
        state.running.remove(&descriptor.id);
        unlink(state, &descriptor);
        insert_ordered(state, &descriptor);
        state
            .descriptors
            .insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    async fn find_by_key(&self, idempotency_key: &str) -> QueueResult<Option<CommandDescriptor>> {
        let state = self.state.lock();
        Ok(state
            .by_key
            .get(idempotency_key)
            .and_then(|id| state.descriptors.get(id))
            .cloned())
    }

    async fn pending(&self, queue: &str) -> QueueResult<Vec<CommandDescriptor>> {
        let state = self.state.lock();
        Ok(state
            .queues
            .get(queue)
            .map(|deque| {
                deque
                    .iter()
                    .filter_map(|id| state.descriptors.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn pending_count(&self, queue: &str) -> QueueResult<usize> {
        let state = self.state.lock();
        Ok(state.queues.get(queue).map(|deque| deque.len()).unwrap_or(0))
    }
}
