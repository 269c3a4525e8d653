pub mod registry;

pub use registry::{CommandFactory, CommandRegistry};

use crate::{CommandError, Priority, QueueResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// How a finished execution ended when the descriptor should be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The work was carried out
    Done,

    /// The command decided its work is not yet due; no attempt is counted
    Skipped,
}

/// What `execute` returns: an outcome that removes the descriptor, or an
/// error whose retryability decides between tail-of-band reinsertion and
/// removal.
pub type CommandResult = Result<Outcome, CommandError>;

/// Trait for defining commands that can be queued and executed
///
/// A command's fields are its entire persisted identity: they serialize into
/// the descriptor's `parameters` text and must round-trip losslessly, because
/// after a restart the command is rebuilt from nothing else.
#[async_trait]
pub trait Command: Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Shared services handed to every execution (repositories, API clients)
    type Context: Send + Sync + 'static;

    /// Stable tag identifying this command implementation for dispatch;
    /// never reused for a semantically different command across versions
    const TYPE_TAG: &'static str;

    /// Name of the resource class (processor) that runs this command
    const QUEUE: &'static str;

    /// Default urgency band
    const PRIORITY: Priority = Priority::NORMAL;

    /// Deterministic identity of the logical action, e.g.
    /// `"HashFile:/library/ep-03.mkv"`. Two commands with equal keys are the
    /// same action; only one may be pending at a time.
    fn idempotency_key(&self) -> String;

    /// Execute the command
    ///
    /// `attempt` is the number of earlier runs that failed retryable; a
    /// command may inspect it and downgrade its next verdict to permanent.
    async fn execute(&self, ctx: &Self::Context, attempt: u32) -> CommandResult;

    /// Progress text published while this command runs
    fn describe(&self) -> String {
        Self::TYPE_TAG.to_string()
    }

    /// Urgency band for this instance (default: the type's band)
    fn priority(&self) -> Priority {
        Self::PRIORITY
    }

    /// Get the type tag for dispatch
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    /// Get the owning resource class name
    fn queue(&self) -> &'static str {
        Self::QUEUE
    }
}

/// Type-erased command, as processors see it after registry dispatch
///
/// Blanket-implemented for every [`Command`]; the only way the engine touches
/// heterogeneous command types at runtime.
#[async_trait]
pub trait AnyCommand<C>: Send + Sync {
    /// Stable tag identifying the command implementation
    fn type_tag(&self) -> &'static str;

    /// Name of the owning resource class
    fn queue(&self) -> &'static str;

    /// Deterministic identity of the logical action
    fn idempotency_key(&self) -> String;

    /// Urgency band of this instance
    fn priority(&self) -> Priority;

    /// Progress text published while running
    fn describe(&self) -> String;

    /// Serialize the command's own fields to descriptor parameters
    fn parameters(&self) -> QueueResult<String>;

    /// Execute the command
    async fn execute(&self, ctx: &C, attempt: u32) -> CommandResult;
}

/// Boxed erased command, the registry's dispatch currency
pub type BoxedCommand<C> = Box<dyn AnyCommand<C>>;

#[async_trait]
impl<K: Command> AnyCommand<K::Context> for K {
    fn type_tag(&self) -> &'static str {
        K::TYPE_TAG
    }

    fn queue(&self) -> &'static str {
        K::QUEUE
    }

    fn idempotency_key(&self) -> String {
        Command::idempotency_key(self)
    }

    fn priority(&self) -> Priority {
        Command::priority(self)
    }

    fn describe(&self) -> String {
        Command::describe(self)
    }

    fn parameters(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    async fn execute(&self, ctx: &K::Context, attempt: u32) -> CommandResult {
        Command::execute(self, ctx, attempt).await
    }
}
