//! Kestrel
//!
//! Resumable operation engine for bare-metal Kubernetes provisioning.
//!
//! This crate re-exports the workspace crates so embedding applications
//! depend on one package:
//!
//! - [`objstore`]: durable object storage (memory, redb, S3)
//! - [`operation`]: operations, phases, cleanup and leases
//! - [`inventory`]: per-cluster node inventory and drift detection
//! - [`workflow`]: the operation driver, waits and collaborator traits
//!
//! # Example
//!
//! ```ignore
//! kestrel::logging::init_tracing(false)?;
//!
//! let objects = kestrel::objstore::create_object_store(&config.state).await?;
//! let driver = kestrel::workflow::OperationDriver::new(OperationStore::new(objects));
//! let mut op = driver.acquire(&request).await?;
//! driver.run(&mut op, &runner, &cancel).await?;
//! ```

pub mod logging;

pub use kestrel_inventory as inventory;
pub use kestrel_objstore as objstore;
pub use kestrel_operation as operation;
pub use kestrel_workflow as workflow;

pub use kestrel_inventory::{NodeStore, NodesState};
pub use kestrel_objstore::{create_object_store, ObjectStore, ObjectStoreConfig};
pub use kestrel_operation::{CleanupRegistry, Operation, OperationStore, OperationType};
pub use kestrel_workflow::{Cancellation, OperationDriver, OperationRequest, PhaseRunner};
