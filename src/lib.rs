//! # shelf-queue: Durable Command Processing for Media Catalogs
//!
//! **Priority-ordered background commands with at-most-one-pending dedup**
//!
//! shelf-queue is the execution engine behind a personal media catalog's
//! background work: every mutation of the library (hash this file, refresh
//! that series, fetch missing artwork) is a durable command that survives
//! restarts and replays in a predictable order.
//!
//! ## 🎯 Queue Semantics
//!
//! - **Durable by Default**: commands persist before `enqueue` returns; after a crash they simply run again
//! - **Priority Bands**: lower value runs first, FIFO inside a band via a monotonic sequence
//! - **Idempotent Enqueue**: at most one pending command per idempotency key, enforced atomically in the store
//! - **Resource Classes**: one single-threaded processor per contended resource ("general", "hasher", "images")
//! - **Panic Containment**: a panicking command fails permanently while its processor keeps running
//! - **Pause and Resume**: per-processor flags plus a scoped all-stop guard for bulk imports
//! - **Structured Observability**: queue events over a broadcast stream, tracing spans throughout
//!
//! ## 🚀 Quick Start
//!
//! ```no_run
//! use shelf_queue::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! struct CatalogContext {
//!     library_root: std::path::PathBuf,
//! }
//!
//! #[derive(Serialize, Deserialize)]
//! struct HashFile {
//!     path: String,
//! }
//!
//! #[async_trait]
//! impl Command for HashFile {
//!     type Context = CatalogContext;
//!
//!     const TYPE_TAG: &'static str = "HashFile";
//!     const QUEUE: &'static str = "hasher";
//!
//!     fn idempotency_key(&self) -> String {
//!         format!("HashFile:{}", self.path)
//!     }
//!
//!     async fn execute(&self, ctx: &CatalogContext, _attempt: u32) -> CommandResult {
//!         let _file = ctx.library_root.join(&self.path);
//!         // hash the file, record the digest
//!         Ok(Outcome::Done)
//!     }
//! }
//!
//! # async fn demo() -> QueueResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let context = Arc::new(CatalogContext {
//!     library_root: "/library".into(),
//! });
//!
//! let group = ProcessorGroup::builder(store, context)
//!     .register::<HashFile>()?
//!     .processor("hasher")
//!     .start()?;
//!
//! let accepted = group
//!     .enqueue(HashFile { path: "shows/ep-01.mkv".into() })
//!     .await?;
//! assert!(accepted);
//!
//! group.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod error;
pub mod processor;
pub mod store;
pub mod types;

// Core API exports
pub use command::{
    AnyCommand, BoxedCommand, Command, CommandFactory, CommandRegistry, CommandResult, Outcome,
};
pub use error::{CommandError, QueueError, QueueResult};
pub use processor::group::EventStream;
pub use processor::{GroupBuilder, PauseAllGuard, ProcessorConfig, ProcessorGroup};
pub use types::{
    CommandDescriptor, CommandMessage, DescriptorId, Priority, ProcessorStatus, QueueEvent,
};

// Store contract and implementations
pub use store::{EligibilityFn, InsertOutcome, MemoryStore, QueueStore};

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

/// Everything needed to define commands and run a group
pub mod prelude {
    // Commands and outcomes
    pub use crate::{Command, CommandError, CommandResult, Outcome};

    // Group surface
    pub use crate::{GroupBuilder, ProcessorConfig, ProcessorGroup, ProcessorStatus};

    // Stores
    pub use crate::{MemoryStore, QueueStore};

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteStore;

    // Essential types
    pub use crate::{
        CommandDescriptor, DescriptorId, Priority, QueueError, QueueEvent, QueueResult,
    };

    // Essential traits
    pub use async_trait::async_trait;
}
