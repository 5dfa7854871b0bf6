//! Kestrel Workflow Driver
//!
//! Runs an operation's phases in order, persisting after every transition so
//! an interrupted run resumes from the first unfinished phase.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               OperationDriver                        │
//! │   acquire ─▶ run ─▶ (completed | failed | cancelled) │
//! │   abort  ─▶ CleanupRegistry::execute_lifo            │
//! │   reset  ─▶ Operation::reset_from_phase              │
//! └─────────────────────────────────────────────────────┘
//!        │ run_phase             │ OperationEvent stream
//!        ▼                       ▼
//! ┌──────────────────┐   ┌──────────────────────────────┐
//! │   PhaseRunner    │   │  broadcast subscribers        │
//! │  Provisioner     │   └──────────────────────────────┘
//! │  NodeBootstrapper│
//! │  poll_until      │
//! └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use kestrel_workflow::{Cancellation, OperationDriver, OperationRequest};
//!
//! let driver = OperationDriver::new(store).with_lease("runner-1", Duration::from_secs(3600));
//! let request = OperationRequest::new(OperationType::AddNode, "production", ["init", "provision"])
//!     .with_context("nodeName", "worker-3");
//! let mut op = driver.acquire(&request).await?;
//! driver.run(&mut op, &runner, &Cancellation::never()).await?;
//! ```

pub mod cancel;
pub mod collaborator;
pub mod driver;
pub mod error;
pub mod wait;

pub use cancel::{CancelHandle, Cancellation};
pub use collaborator::*;
pub use driver::*;
pub use error::*;
pub use wait::*;
