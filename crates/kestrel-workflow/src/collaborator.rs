//! External collaborator contracts
//!
//! Phase logic talks to the machine provider, the node OS, the secrets vault,
//! DNS and the identity provider through these traits. Implementations live in the embedding application.

use crate::cancel::Cancellation;
use crate::error::Result;
use crate::wait::{poll_until, retry_with_backoff, Poll, RetryConfig, WaitConfig};
use anyhow::Context;
use async_trait::async_trait;
use kestrel_operation::{keys, CleanupHandler, Operation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Cleanup action type recorded after a machine is ordered
pub const DELETE_SERVER: &str = "delete-server";

/// What to order from the machine provider
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    pub name: String,
    pub zone: String,
    /// Provider offer or commercial type
    pub offer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Provider-side lifecycle of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Provisioning,
    Ready,
    Error,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    pub state: MachineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
}

/// Bare-metal machine provider
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Order a machine and return its provider ID
    async fn order_machine(&self, spec: &MachineSpec) -> anyhow::Result<String>;

    async fn machine_status(&self, server_id: &str, zone: &str) -> anyhow::Result<MachineStatus>;

    async fn delete_machine(&self, server_id: &str, zone: &str) -> anyhow::Result<()>;
}

/// Node operating system control plane
#[async_trait]
pub trait NodeBootstrapper: Send + Sync {
    /// True once the node answers on its maintenance API
    async fn maintenance_reachable(&self, ip: &str) -> anyhow::Result<bool>;

    async fn apply_configuration(&self, ip: &str, config: &[u8]) -> anyhow::Result<()>;

    /// Initialize the cluster on the first control plane node
    async fn bootstrap(&self, ip: &str) -> anyhow::Result<()>;

    async fn upgrade(&self, ip: &str, version: &str) -> anyhow::Result<()>;
}

/// Location of a group of secrets in the vault
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretPath {
    pub project: String,
    pub environment: String,
    pub path: String,
}

impl SecretPath {
    pub fn new(
        project: impl Into<String>,
        environment: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            environment: environment.into(),
            path: path.into(),
        }
    }
}

impl std::fmt::Display for SecretPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}{}", self.project, self.environment, self.path)
    }
}

/// Secrets vault holding generated credentials and configs
#[async_trait]
pub trait SecretsVault: Send + Sync {
    /// `None` means the secret has not been generated yet
    async fn get_secret(&self, path: &SecretPath, key: &str) -> anyhow::Result<Option<String>>;

    async fn set_secret(&self, path: &SecretPath, key: &str, value: &str) -> anyhow::Result<()>;

    async fn ensure_path(&self, path: &SecretPath) -> anyhow::Result<()>;
}

/// DNS provider
#[async_trait]
pub trait DnsClient: Send + Sync {
    async fn resolve_zone(&self, name: &str) -> anyhow::Result<String>;

    /// Idempotent: a record that already points at `ip` is left alone
    async fn upsert_a_record(&self, zone_id: &str, name: &str, ip: &str) -> anyhow::Result<()>;
}

/// Identity provider role binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBinding {
    pub organization: String,
    pub team: String,
    pub role: String,
}

/// Identity provider access policy
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Create or update the binding. Returns true if anything changed, or
    /// would have changed when `verify_only` is set; verify-only never mutates.
    async fn ensure_role(&self, binding: &RoleBinding, verify_only: bool) -> anyhow::Result<bool>;
}

/// Read a secret, generating and storing it on first use
///
/// Re-running a phase returns the stored value instead of generating a new one.
pub async fn get_or_generate_secret<F>(
    vault: &dyn SecretsVault,
    path: &SecretPath,
    key: &str,
    generate: F,
) -> anyhow::Result<String>
where
    F: FnOnce() -> anyhow::Result<String> + Send,
{
    if let Some(existing) = vault
        .get_secret(path, key)
        .await
        .with_context(|| format!("read secret {} at {}", key, path))?
    {
        return Ok(existing);
    }

    let value = generate()?;
    vault.ensure_path(path).await?;
    vault
        .set_secret(path, key, &value)
        .await
        .with_context(|| format!("store secret {} at {}", key, path))?;
    info!(path = %path, key = %key, "Stored generated secret");
    Ok(value)
}

/// Wait until a machine is ready. Error and locked states are terminal.
pub async fn wait_ready(
    provisioner: &dyn Provisioner,
    server_id: &str,
    zone: &str,
    config: &WaitConfig,
    cancel: &Cancellation,
) -> Result<MachineStatus> {
    let what = format!("server {}", server_id);
    let status = poll_until(&what, config, cancel, || async {
        let status = provisioner.machine_status(server_id, zone).await?;
        Ok::<_, anyhow::Error>(match status.state {
            MachineState::Ready => Poll::Ready(status),
            MachineState::Provisioning => Poll::Pending,
            MachineState::Error => Poll::Terminal("provider reported error".to_string()),
            MachineState::Locked => Poll::Terminal("server is locked".to_string()),
        })
    })
    .await?;

    info!(server = %server_id, zone = %zone, "Server ready");
    Ok(status)
}

/// Order a machine and record it on the operation
///
/// The server ID and zone land in the context, and a `delete-server` cleanup
/// action is pushed so an abort releases the machine.
pub async fn order_machine_recorded(
    provisioner: &dyn Provisioner,
    op: &mut Operation,
    spec: &MachineSpec,
) -> Result<String> {
    let server_id = provisioner
        .order_machine(spec)
        .await
        .with_context(|| format!("order server {}", spec.name))?;

    op.set_context_value(keys::SERVER_ID, &server_id)?;
    op.set_context_value(keys::ZONE, &spec.zone)?;
    op.add_cleanup(
        DELETE_SERVER,
        &DeleteServerPayload {
            server_id: server_id.clone(),
            zone: spec.zone.clone(),
        },
    )?;

    info!(operation = %op.id(), server = %server_id, zone = %spec.zone, "Ordered server");
    Ok(server_id)
}

/// Apply the node configuration unless an earlier run already did
///
/// Returns false when the node OS was already activated. Once activated the
/// node leaves maintenance mode and would reject a second apply.
pub async fn apply_configuration_once(
    bootstrapper: &dyn NodeBootstrapper,
    op: &mut Operation,
    ip: &str,
    config: &[u8],
) -> Result<bool> {
    if op.context_value(keys::TALOS_ACTIVATED)?.unwrap_or(false) {
        debug!(operation = %op.id(), ip = %ip, "Node OS already activated");
        return Ok(false);
    }

    bootstrapper
        .apply_configuration(ip, config)
        .await
        .with_context(|| format!("apply configuration to {}", ip))?;
    op.set_context_value(keys::TALOS_ACTIVATED, &true)?;
    Ok(true)
}

/// Wait until a node answers on its maintenance API
pub async fn wait_maintenance(
    bootstrapper: &dyn NodeBootstrapper,
    ip: &str,
    config: &WaitConfig,
    cancel: &Cancellation,
) -> Result<()> {
    let what = format!("maintenance API on {}", ip);
    poll_until(&what, config, cancel, || async {
        Ok::<_, anyhow::Error>(if bootstrapper.maintenance_reachable(ip).await? {
            Poll::Ready(())
        } else {
            Poll::Pending
        })
    })
    .await
}

/// Bootstrap the cluster, retrying while the node settles
pub async fn bootstrap_with_retry(
    bootstrapper: &dyn NodeBootstrapper,
    ip: &str,
    config: &RetryConfig,
    cancel: &Cancellation,
) -> Result<()> {
    retry_with_backoff("cluster bootstrap", config, cancel, || bootstrapper.bootstrap(ip)).await
}

/// Payload of a `delete-server` cleanup action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteServerPayload {
    pub server_id: String,
    pub zone: String,
}

struct DeleteServerHandler {
    provisioner: Arc<dyn Provisioner>,
}

#[async_trait]
impl CleanupHandler for DeleteServerHandler {
    async fn cleanup(&self, data: &Value) -> anyhow::Result<()> {
        let payload: DeleteServerPayload =
            serde_json::from_value(data.clone()).context("decode delete-server payload")?;
        info!(server = %payload.server_id, zone = %payload.zone, "Deleting server");
        self.provisioner
            .delete_machine(&payload.server_id, &payload.zone)
            .await
            .with_context(|| format!("delete server {}", payload.server_id))
    }
}

/// Cleanup handler deleting servers recorded under [`DELETE_SERVER`]
pub fn delete_server_handler(provisioner: Arc<dyn Provisioner>) -> Arc<dyn CleanupHandler> {
    Arc::new(DeleteServerHandler { provisioner })
}
