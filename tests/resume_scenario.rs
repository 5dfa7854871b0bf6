use anyhow::Result;
use async_trait::async_trait;
use kestrel::inventory::{detect_inventory_drift, NodeState, NodeStatus};
use kestrel::objstore::DEFAULT_BUCKET;
use kestrel::operation::keys;
use kestrel::workflow::{Cancellation, OperationEvent};
use kestrel::{
    create_object_store, NodeStore, Operation, OperationDriver, OperationRequest, OperationStore,
    OperationType, ObjectStoreConfig, PhaseRunner,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

const PHASES: [&str; 3] = ["init", "provision", "verify"];

async fn open_store(path: &Path) -> Result<OperationStore> {
    let config = ObjectStoreConfig::Redb {
        path: path.to_path_buf(),
        bucket: DEFAULT_BUCKET.to_string(),
    };
    Ok(OperationStore::new(create_object_store(&config).await?))
}

#[tokio::test]
async fn test_operation_survives_restart() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("state.redb");

    let id = {
        let store = open_store(&path).await?;
        let mut op = Operation::new(
            Operation::generate_id(),
            OperationType::CreateCluster,
            "production",
            PHASES,
        )?;
        store.save(&op).await?;
        op.start_phase("init")?;
        store.save(&op).await?;
        op.complete_phase("init", None)?;
        store.save(&op).await?;
        op.id().to_string()
    };

    let store = open_store(&path).await?;
    let reloaded = store.load(&id).await?;
    assert_eq!(reloaded.resume_phase(), Some("provision"));
    assert_eq!(reloaded.current_phase(), "provision");
    Ok(())
}

/// Provisions one worker; can be told to stop mid-provision
struct WorkerRunner {
    stop_in_provision: bool,
    ran: Mutex<Vec<String>>,
    nodes: NodeStore,
}

#[async_trait]
impl PhaseRunner for WorkerRunner {
    async fn run_phase(
        &self,
        phase: &str,
        op: &mut Operation,
        cancel: &Cancellation,
    ) -> anyhow::Result<Option<Value>> {
        self.ran.lock().unwrap().push(phase.to_string());
        let node = op.get_context_string(keys::NODE_NAME.name()).to_string();

        match phase {
            "init" => {
                self.nodes
                    .upsert(NodeState::new(&node).with_status(NodeStatus::Provisioning))
                    .await?;
            }
            "provision" => {
                op.set_context_value(keys::SERVER_ID, &"srv-42".to_string())?;
                if self.stop_in_provision {
                    cancel.cancelled().await;
                    return Err(kestrel::workflow::WorkflowError::Cancelled.into());
                }
                op.set_context_value(keys::PUBLIC_IP, &"51.15.0.42".to_string())?;
            }
            "verify" => {
                self.nodes
                    .upsert(
                        NodeState::new(&node)
                            .with_server_id(op.get_context_string(keys::SERVER_ID.name()))
                            .with_public_ip(op.get_context_string(keys::PUBLIC_IP.name()))
                            .with_status(NodeStatus::Ready),
                    )
                    .await?;
            }
            other => anyhow::bail!("unexpected phase {}", other),
        }
        Ok(None)
    }
}

fn add_worker_request() -> OperationRequest {
    OperationRequest::new(OperationType::AddNode, "production", PHASES)
        .with_context(keys::NODE_NAME.name(), "worker-1")
        .with_context(keys::POOL_NAME.name(), "workers")
}

#[tokio::test]
async fn test_interrupted_run_resumes_after_restart() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("state.redb");

    let id = {
        let store = open_store(&path).await?;
        let driver = OperationDriver::new(store.clone()).with_lease("runner-1", std::time::Duration::from_secs(60));
        let (handle, cancel) = Cancellation::new();
        let runner = WorkerRunner {
            stop_in_provision: true,
            ran: Mutex::new(Vec::new()),
            nodes: NodeStore::new(store.clone(), "production"),
        };

        let mut op = driver.acquire(&add_worker_request()).await?;
        let run = driver.run(&mut op, &runner, &cancel);
        let stop = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(run, stop);
        assert!(matches!(result, Err(kestrel::workflow::WorkflowError::Cancelled)));
        assert_eq!(*runner.ran.lock().unwrap(), vec!["init", "provision"]);
        op.id().to_string()
    };

    let store = open_store(&path).await?;
    assert!(store.lease(&id).await?.is_none());

    let driver = OperationDriver::new(store.clone());
    let mut events = driver.subscribe();
    let runner = WorkerRunner {
        stop_in_provision: false,
        ran: Mutex::new(Vec::new()),
        nodes: NodeStore::new(store.clone(), "production"),
    };

    let mut op = driver.acquire(&add_worker_request()).await?;
    assert_eq!(op.id(), id);
    assert_eq!(op.resume_phase(), Some("provision"));
    assert_eq!(
        events.recv().await?,
        OperationEvent::Acquired {
            operation: id.clone(),
            resumed: true
        }
    );

    driver.run(&mut op, &runner, &Cancellation::never()).await?;
    assert_eq!(*runner.ran.lock().unwrap(), vec!["provision", "verify"]);
    assert!(store.load(&id).await?.is_complete());
    assert!(store
        .find_incomplete(Some(&OperationType::AddNode), Some("production"))
        .await?
        .is_empty());

    let inventory = runner.nodes.load().await?;
    let worker = inventory.get("worker-1").expect("worker recorded");
    assert_eq!(worker.status, Some(NodeStatus::Ready));
    assert_eq!(worker.server_id, "srv-42");

    let live = HashMap::from([("worker-1".to_string(), "51.15.0.42".to_string())]);
    assert!(!detect_inventory_drift(&inventory, &live).has_drift());

    let moved = HashMap::from([("worker-1".to_string(), "51.15.0.99".to_string())]);
    let drift = detect_inventory_drift(&inventory, &moved);
    assert_eq!(drift.ip_mismatches.len(), 1);
    assert_eq!(
        drift.to_string(),
        "Drift detected:\n  - IP mismatch for worker-1: expected 51.15.0.42, got 51.15.0.99"
    );
    Ok(())
}
