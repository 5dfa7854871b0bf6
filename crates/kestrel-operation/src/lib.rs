//! Kestrel Operation Engine
//!
//! Durable, phase-oriented state for long-running provisioning workflows.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Operation                           │
//! │   phaseOrder ─▶ phases (pending ... completed)       │
//! │   context (typed keys + free-form map)               │
//! │   cleanup (append-only LIFO stack)                   │
//! └─────────────────────────────────────────────────────┘
//!                        │ save after every transition
//!                        ▼
//! ┌─────────────────────────────────────────────────────┐
//! │               OperationStore                         │
//! │   operations/{id}.json   leases/{id}.json            │
//! │   put_json / get_json for other durable documents    │
//! └─────────────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌─────────────────────────────────────────────────────┐
//! │       ObjectStore (Memory | ReDB | S3)               │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! On abort, [`CleanupRegistry::execute_lifo`] replays an operation's cleanup
//! actions newest first, continuing through failures.
//!
//! # Example
//!
//! ```ignore
//! use kestrel_operation::{Operation, OperationStore, OperationType};
//!
//! let store = OperationStore::new(objects);
//! let mut op = Operation::new(
//!     Operation::generate_id(),
//!     OperationType::CreateCluster,
//!     "production",
//!     ["init", "provision", "verify"],
//! )?;
//! store.save(&op).await?;
//!
//! op.start_phase("init")?;
//! store.save(&op).await?;
//! ```

pub mod cleanup;
pub mod context;
pub mod error;
pub mod lease;
pub mod operation;
pub mod store;

pub use cleanup::*;
pub use context::{keys, ContextKey};
pub use error::*;
pub use lease::OperationLease;
pub use operation::*;
pub use store::*;
