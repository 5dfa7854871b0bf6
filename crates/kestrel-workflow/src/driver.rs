//! Operation driver
//!
//! Drives an [`Operation`] through its phases, persisting after every
//! transition. A failed or interrupted run is resumed by acquiring the same
//! operation again; completed and skipped phases are never re-run.

use crate::cancel::Cancellation;
use crate::error::{Result, WorkflowError};
use async_trait::async_trait;
use kestrel_inventory::{NodeRole, NodeState, NodeStatus, NodeStore};
use kestrel_operation::{keys, CleanupRegistry, Operation, OperationStore, OperationType};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Reason recorded on the resume phase when an operator aborts
pub const ABORT_REASON: &str = "aborted by operator";

/// Domain logic for the phases of one workflow type
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    /// Run one phase. The returned value is recorded as the phase's data.
    ///
    /// Phase logic may read and write the operation context and append
    /// cleanup actions. Long waits should observe `cancel`.
    async fn run_phase(
        &self,
        phase: &str,
        op: &mut Operation,
        cancel: &Cancellation,
    ) -> anyhow::Result<Option<Value>>;
}

/// Event emitted while driving operations
#[derive(Debug, Clone, PartialEq)]
pub enum OperationEvent {
    /// Operation created or picked up for resume
    Acquired { operation: String, resumed: bool },
    PhaseStarted { operation: String, phase: String },
    PhaseCompleted { operation: String, phase: String },
    PhaseFailed {
        operation: String,
        phase: String,
        error: String,
    },
    /// Run stopped on request with `phase` still in progress
    Cancelled { operation: String, phase: String },
    /// Every phase completed or skipped
    Completed { operation: String },
    /// Cleanup ran and the resume phase was marked failed
    Aborted {
        operation: String,
        cleanup_failures: usize,
    },
}

/// Parameters for [`OperationDriver::acquire`]
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub operation_type: OperationType,
    pub cluster: String,
    pub phases: Vec<String>,
    /// Context fields that must not change across resumes
    pub fixed_context: Vec<(String, String)>,
}

impl OperationRequest {
    pub fn new<I, S>(operation_type: OperationType, cluster: impl Into<String>, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operation_type,
            cluster: cluster.into(),
            phases: phases.into_iter().map(Into::into).collect(),
            fixed_context: Vec::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fixed_context.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
struct LeaseConfig {
    holder: String,
    ttl: Duration,
}

/// Runs, aborts and resets operations against an [`OperationStore`]
pub struct OperationDriver {
    store: OperationStore,
    track_nodes: bool,
    lease: Option<LeaseConfig>,
    event_sender: broadcast::Sender<OperationEvent>,
}

impl OperationDriver {
    pub fn new(store: OperationStore) -> Self {
        let (event_sender, _) = broadcast::channel(1024);
        Self {
            store,
            track_nodes: true,
            lease: None,
            event_sender,
        }
    }

    /// Take an advisory lease around `run` and `abort`
    pub fn with_lease(mut self, holder: impl Into<String>, ttl: Duration) -> Self {
        self.lease = Some(LeaseConfig {
            holder: holder.into(),
            ttl,
        });
        self
    }

    /// Whether a failed phase marks the in-flight node failed in the inventory
    pub fn with_node_tracking(mut self, enabled: bool) -> Self {
        self.track_nodes = enabled;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.event_sender.subscribe()
    }

    pub fn store(&self) -> &OperationStore {
        &self.store
    }

    fn emit(&self, event: OperationEvent) {
        let _ = self.event_sender.send(event);
    }

    /// Resume the newest incomplete operation of this type and cluster, or
    /// create and persist a new one
    ///
    /// A resumed operation must agree with every fixed context field;
    /// a different value is a `ContextConflict`.
    pub async fn acquire(&self, request: &OperationRequest) -> Result<Operation> {
        if let Some(mut op) = self
            .store
            .check_resume(&request.operation_type, &request.cluster)
            .await?
        {
            for (key, value) in &request.fixed_context {
                op.ensure_context(key, value)?;
            }
            self.store.save(&op).await?;

            info!(
                operation = %op.id(),
                kind = %request.operation_type,
                phase = op.resume_phase().unwrap_or_default(),
                "Resuming operation"
            );
            self.emit(OperationEvent::Acquired {
                operation: op.id().to_string(),
                resumed: true,
            });
            return Ok(op);
        }

        let mut op = Operation::new(
            Operation::generate_id(),
            request.operation_type.clone(),
            request.cluster.clone(),
            request.phases.iter().cloned(),
        )?;
        for (key, value) in &request.fixed_context {
            op.ensure_context(key, value)?;
        }
        self.store.save(&op).await?;

        info!(
            operation = %op.id(),
            kind = %request.operation_type,
            cluster = %request.cluster,
            "Created operation"
        );
        self.emit(OperationEvent::Acquired {
            operation: op.id().to_string(),
            resumed: false,
        });
        Ok(op)
    }

    async fn take_lease(&self, id: &str) -> Result<()> {
        if let Some(lease) = &self.lease {
            self.store.acquire_lease(id, &lease.holder, lease.ttl).await?;
        }
        Ok(())
    }

    async fn drop_lease(&self, id: &str) {
        if let Some(lease) = &self.lease {
            if let Err(e) = self.store.release_lease(id, &lease.holder).await {
                warn!(operation = %id, error = %e, "Failed to release operation lease");
            }
        }
    }

    /// Run phases from the resume point until done, failed or cancelled
    pub async fn run(
        &self,
        op: &mut Operation,
        runner: &dyn PhaseRunner,
        cancel: &Cancellation,
    ) -> Result<()> {
        self.take_lease(op.id()).await?;
        let result = self.run_phases(op, runner, cancel).await;
        self.drop_lease(op.id()).await;
        result
    }

    async fn run_phases(
        &self,
        op: &mut Operation,
        runner: &dyn PhaseRunner,
        cancel: &Cancellation,
    ) -> Result<()> {
        while let Some(phase) = op.resume_phase().map(str::to_string) {
            if cancel.is_cancelled() {
                return Err(self.cancelled(op, &phase));
            }

            op.start_phase(&phase)?;
            self.store.save(op).await?;
            info!(operation = %op.id(), phase = %phase, "Phase started");
            self.emit(OperationEvent::PhaseStarted {
                operation: op.id().to_string(),
                phase: phase.clone(),
            });

            match runner.run_phase(&phase, op, cancel).await {
                Ok(data) => {
                    op.complete_phase(&phase, data)?;
                    self.store.save(op).await?;
                    info!(operation = %op.id(), phase = %phase, "Phase completed");
                    self.emit(OperationEvent::PhaseCompleted {
                        operation: op.id().to_string(),
                        phase,
                    });
                }
                Err(e) if cancel.is_cancelled() || WorkflowError::is_cancellation(&e) => {
                    return Err(self.cancelled(op, &phase));
                }
                Err(e) => {
                    error!(operation = %op.id(), phase = %phase, error = %e, "Phase failed");
                    op.fail_phase(&phase, format!("{:#}", e))?;
                    if let Err(save_err) = self.store.save(op).await {
                        error!(
                            operation = %op.id(),
                            error = %save_err,
                            "Failed to persist phase failure"
                        );
                    }
                    self.mark_node_failed(op).await;
                    self.emit(OperationEvent::PhaseFailed {
                        operation: op.id().to_string(),
                        phase: phase.clone(),
                        error: format!("{:#}", e),
                    });
                    return Err(WorkflowError::PhaseFailed { phase, source: e });
                }
            }
        }

        self.store.save(op).await?;
        info!(operation = %op.id(), "Operation completed");
        self.emit(OperationEvent::Completed {
            operation: op.id().to_string(),
        });
        Ok(())
    }

    fn cancelled(&self, op: &Operation, phase: &str) -> WorkflowError {
        info!(operation = %op.id(), phase = %phase, "Operation cancelled");
        self.emit(OperationEvent::Cancelled {
            operation: op.id().to_string(),
            phase: phase.to_string(),
        });
        WorkflowError::Cancelled
    }

    /// Best-effort inventory update for the node an operation was working on
    async fn mark_node_failed(&self, op: &Operation) {
        if !self.track_nodes {
            return;
        }
        let Some(patch) = node_patch_from_context(op, NodeStatus::Failed) else {
            debug!(operation = %op.id(), "No node in context, skipping inventory update");
            return;
        };

        let nodes = NodeStore::new(self.store.clone(), op.cluster());
        if let Err(e) = nodes.upsert(patch).await {
            warn!(operation = %op.id(), error = %e, "Failed to mark node failed");
        }
    }

    /// Undo an operation's side effects and mark its resume phase failed
    ///
    /// Cleanup runs newest first and continues past failures. The operation
    /// is saved before any cleanup failure is reported.
    pub async fn abort(&self, id: &str, registry: &CleanupRegistry) -> Result<Operation> {
        self.take_lease(id).await?;
        let result = self.abort_operation(id, registry).await;
        self.drop_lease(id).await;
        result
    }

    async fn abort_operation(&self, id: &str, registry: &CleanupRegistry) -> Result<Operation> {
        let mut op = self.store.load(id).await?;
        info!(
            operation = %id,
            actions = op.cleanup_actions().len(),
            "Aborting operation"
        );

        let failures = registry.execute_lifo(op.cleanup_actions()).await;

        if let Some(phase) = op.resume_phase().map(str::to_string) {
            op.fail_phase(&phase, ABORT_REASON)?;
        }
        self.store.save(&op).await?;

        self.emit(OperationEvent::Aborted {
            operation: id.to_string(),
            cleanup_failures: failures.len(),
        });
        failures.into_result()?;
        Ok(op)
    }

    /// Reset `phase` and everything after it to pending
    pub async fn reset(&self, id: &str, phase: &str) -> Result<Operation> {
        let mut op = self.store.load(id).await?;
        op.reset_from_phase(phase)?;
        self.store.save(&op).await?;
        info!(operation = %id, phase = %phase, "Operation reset");
        Ok(op)
    }
}

impl std::fmt::Debug for OperationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDriver")
            .field("store", &self.store)
            .field("track_nodes", &self.track_nodes)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

/// Inventory patch for the node named in an operation's context
///
/// Returns `None` when the context has no node name.
pub fn node_patch_from_context(op: &Operation, status: NodeStatus) -> Option<NodeState> {
    let name = op.get_context_string(keys::NODE_NAME.name()).trim();
    if name.is_empty() {
        return None;
    }

    let mut patch = NodeState::new(name)
        .with_status(status)
        .with_pool(op.get_context_string(keys::POOL_NAME.name()))
        .with_server_id(op.get_context_string(keys::SERVER_ID.name()))
        .with_public_ip(op.get_context_string(keys::PUBLIC_IP.name()))
        .with_private_ip(op.get_context_string(keys::PRIVATE_IP.name()));
    patch.role = NodeRole::parse(op.get_context_string(keys::ROLE.name()));
    Some(patch)
}
