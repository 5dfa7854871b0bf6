//! Operation and phase model
//!
//! An [`Operation`] is one durable workflow instance: an ordered list of
//! named phases, a context map that carries values between phases, and a
//! stack of cleanup actions that undo side effects on abort.
//!
//! The resume point is always re-derived from phase statuses
//! ([`Operation::resume_phase`]); it is never cached.

use crate::error::{OperationError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Kind of workflow an operation runs
///
/// Unknown kinds written by newer versions decode as `Other` rather than
/// failing the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationType {
    CreateCluster,
    AddNode,
    RemoveNode,
    UpgradeTalos,
    UpgradeK8s,
    Other(String),
}

impl OperationType {
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::CreateCluster => "create-cluster",
            OperationType::AddNode => "add-node",
            OperationType::RemoveNode => "remove-node",
            OperationType::UpgradeTalos => "upgrade-talos",
            OperationType::UpgradeK8s => "upgrade-k8s",
            OperationType::Other(kind) => kind,
        }
    }
}

impl From<String> for OperationType {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "create-cluster" => OperationType::CreateCluster,
            "add-node" => OperationType::AddNode,
            "remove-node" => OperationType::RemoveNode,
            "upgrade-talos" => OperationType::UpgradeTalos,
            "upgrade-k8s" => OperationType::UpgradeK8s,
            _ => OperationType::Other(kind),
        }
    }
}

impl From<&str> for OperationType {
    fn from(kind: &str) -> Self {
        OperationType::from(kind.to_string())
    }
}

impl From<OperationType> for String {
    fn from(kind: OperationType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    /// Retryable: the operation resumes into a failed phase
    Failed,
    Skipped,
}

impl PhaseStatus {
    /// Completed or skipped phases are never re-run
    pub fn is_done(self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in-progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// State of one phase within an operation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    #[serde(default)]
    pub status: PhaseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Failure message, set on failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Result payload recorded on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Phase {
    fn reset(&mut self) {
        *self = Phase::default();
    }
}

/// A compensating action recorded while a phase causes side effects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupAction {
    /// Handler discriminator, e.g. "delete-server"
    #[serde(rename = "type")]
    pub action_type: String,

    /// Payload decoded by the matching handler
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Full state of a resumable provisioning operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    id: String,
    #[serde(rename = "type")]
    operation_type: OperationType,
    cluster: String,
    #[serde(default = "unix_epoch")]
    created_at: DateTime<Utc>,
    #[serde(default = "unix_epoch")]
    updated_at: DateTime<Utc>,
    #[serde(default)]
    current_phase: String,
    #[serde(default, deserialize_with = "null_as_default")]
    phase_order: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    phases: HashMap<String, Phase>,
    #[serde(default, deserialize_with = "null_as_default")]
    context: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    cleanup: Vec<CleanupAction>,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Older writers store empty lists and maps as `null`
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Operation {
    /// Create a new operation with every phase pending
    ///
    /// Phase names must be unique.
    pub fn new<I, S>(
        id: impl Into<String>,
        operation_type: OperationType,
        cluster: impl Into<String>,
        phases: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        let phase_order: Vec<String> = phases.into_iter().map(Into::into).collect();
        let mut phases = HashMap::with_capacity(phase_order.len());
        for name in &phase_order {
            if phases.insert(name.clone(), Phase::default()).is_some() {
                return Err(OperationError::DuplicatePhase(name.clone()));
            }
        }
        let current_phase = phase_order.first().cloned().unwrap_or_default();

        Ok(Self {
            id: id.into(),
            operation_type,
            cluster: cluster.into(),
            created_at: now,
            updated_at: now,
            current_phase,
            phase_order,
            phases,
            context: Map::new(),
            cleanup: Vec::new(),
        })
    }

    /// Generate a unique, time-ordered operation ID
    pub fn generate_id() -> String {
        format!("op-{}", Uuid::now_v7())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation_type(&self) -> &OperationType {
        &self.operation_type
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Name of the phase last started or next to run
    pub fn current_phase(&self) -> &str {
        &self.current_phase
    }

    pub fn phase_order(&self) -> &[String] {
        &self.phase_order
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.get(name)
    }

    /// Phases in execution order
    pub fn phases(&self) -> impl Iterator<Item = (&str, &Phase)> {
        self.phase_order
            .iter()
            .filter_map(|name| self.phases.get(name).map(|phase| (name.as_str(), phase)))
    }

    pub fn cleanup_actions(&self) -> &[CleanupAction] {
        &self.cleanup
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// Check that `phases` holds exactly the names in `phaseOrder`
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| OperationError::InvalidDocument {
            id: self.id.clone(),
            reason,
        };

        if self.id.is_empty() {
            return Err(invalid("missing id".to_string()));
        }
        if let Some(missing) = self.phase_order.iter().find(|n| !self.phases.contains_key(*n)) {
            return Err(invalid(format!("phase {:?} has no state", missing)));
        }
        if self.phases.len() != self.phase_order.len() {
            return Err(invalid("phases do not match phase order".to_string()));
        }
        Ok(())
    }

    fn phase_mut(&mut self, name: &str) -> Result<&mut Phase> {
        self.phases
            .get_mut(name)
            .ok_or_else(|| OperationError::UnknownPhase(name.to_string()))
    }

    /// True if every phase is completed or skipped
    pub fn is_complete(&self) -> bool {
        self.resume_phase().is_none()
    }

    /// The first phase, in order, that is neither completed nor skipped
    pub fn resume_phase(&self) -> Option<&str> {
        self.phase_order
            .iter()
            .find(|name| {
                !self
                    .phases
                    .get(name.as_str())
                    .map(|phase| phase.status.is_done())
                    .unwrap_or(false)
            })
            .map(String::as_str)
    }

    /// Mark a phase as in-progress
    pub fn start_phase(&mut self, name: &str) -> Result<()> {
        let now = Utc::now();
        let phase = self.phase_mut(name)?;
        phase.status = PhaseStatus::InProgress;
        phase.started_at = Some(now);
        self.current_phase = name.to_string();
        self.updated_at = now;
        Ok(())
    }

    /// Mark a phase as completed, recording optional result data
    ///
    /// Advances `current_phase` to the next phase in order; it stays put if
    /// `name` is the last phase.
    pub fn complete_phase(&mut self, name: &str, data: Option<Value>) -> Result<()> {
        let now = Utc::now();
        let phase = self.phase_mut(name)?;
        phase.status = PhaseStatus::Completed;
        phase.completed_at = Some(now);
        if data.is_some() {
            phase.data = data;
        }
        self.updated_at = now;

        if let Some(pos) = self.phase_order.iter().position(|n| n == name) {
            if let Some(next) = self.phase_order.get(pos + 1) {
                self.current_phase = next.clone();
            }
        }
        Ok(())
    }

    /// Complete a phase with a serializable result payload
    pub fn complete_phase_with<T: Serialize>(&mut self, name: &str, data: &T) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.complete_phase(name, Some(value))
    }

    /// Mark a phase as failed. `current_phase` is left unchanged.
    pub fn fail_phase(&mut self, name: &str, err: impl fmt::Display) -> Result<()> {
        let now = Utc::now();
        let phase = self.phase_mut(name)?;
        phase.status = PhaseStatus::Failed;
        phase.error = Some(err.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Mark a phase as skipped. Skipped phases carry no timestamps.
    pub fn skip_phase(&mut self, name: &str) -> Result<()> {
        let now = Utc::now();
        let phase = self.phase_mut(name)?;
        phase.reset();
        phase.status = PhaseStatus::Skipped;
        self.updated_at = now;
        Ok(())
    }

    /// Reset `name` and every later phase to pending
    ///
    /// Earlier phases are untouched. Used to force re-execution after an
    /// out-of-band fix.
    pub fn reset_from_phase(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OperationError::EmptyPhase);
        }
        let start = self
            .phase_order
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| OperationError::UnknownPhase(name.to_string()))?;

        for phase_name in &self.phase_order[start..] {
            if let Some(phase) = self.phases.get_mut(phase_name) {
                phase.reset();
            }
        }

        self.current_phase = name.to_string();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Decode the result data recorded by a completed phase
    pub fn phase_data<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let phase = self
            .phases
            .get(name)
            .ok_or_else(|| OperationError::UnknownPhase(name.to_string()))?;
        match &phase.data {
            Some(data) => Ok(Some(serde_json::from_value(data.clone())?)),
            None => Ok(None),
        }
    }

    /// Append a cleanup action. Existing actions are never reordered.
    pub fn add_cleanup<T: Serialize>(&mut self, action_type: impl Into<String>, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        self.cleanup.push(CleanupAction {
            action_type: action_type.into(),
            data,
        });
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Store a value in the operation context
    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.insert(key.into(), value.into());
        self.updated_at = Utc::now();
    }

    pub fn get_context(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// String context value; empty for missing or non-string values
    pub fn get_context_string(&self, key: &str) -> &str {
        self.context
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Set a fixed context field, refusing to silently change it
    ///
    /// An unset (or empty) field takes `value`. An equal value is a no-op.
    /// A different value is a `ContextConflict`.
    pub fn ensure_context(&mut self, key: &str, value: &str) -> Result<()> {
        let existing = self.get_context_string(key).trim();
        if existing.is_empty() {
            if !value.trim().is_empty() {
                self.set_context(key, value.trim());
            }
            return Ok(());
        }
        if existing != value.trim() {
            return Err(OperationError::ContextConflict {
                key: key.to_string(),
                existing: existing.to_string(),
                requested: value.trim().to_string(),
            });
        }
        Ok(())
    }
}
