//! Cleanup registry
//!
//! Maps cleanup action types to compensating handlers and replays an
//! operation's cleanup stack in reverse on abort.

use crate::operation::CleanupAction;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Undoes the side effect recorded by one cleanup action
#[async_trait]
pub trait CleanupHandler: Send + Sync {
    async fn cleanup(&self, data: &Value) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CleanupHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn cleanup(&self, data: &Value) -> anyhow::Result<()> {
        (self.0)(data.clone()).await
    }
}

/// A cleanup action that could not be completed
#[derive(Debug)]
pub struct CleanupFailure {
    pub action_type: String,
    pub error: anyhow::Error,
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup {}: {:#}", self.action_type, self.error)
    }
}

/// Every failure collected by one cleanup pass, in execution order
#[derive(Debug, Default)]
pub struct CleanupErrors(pub Vec<CleanupFailure>);

impl CleanupErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CleanupFailure> {
        self.0.iter()
    }

    /// `Ok` when nothing failed
    pub fn into_result(self) -> Result<(), CleanupErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CleanupErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cleanup action(s) failed", self.0.len())?;
        for failure in &self.0 {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for CleanupErrors {}

/// Registry of cleanup handlers keyed by action type
#[derive(Default, Clone)]
pub struct CleanupRegistry {
    handlers: HashMap<String, Arc<dyn CleanupHandler>>,
}

impl fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("CleanupRegistry")
            .field("handlers", &types)
            .finish()
    }
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration for the same type wins.
    pub fn register(&mut self, action_type: impl Into<String>, handler: Arc<dyn CleanupHandler>) {
        let action_type = action_type.into();
        debug!(action_type = %action_type, "Registered cleanup handler");
        self.handlers.insert(action_type, handler);
    }

    /// Register an async closure taking the action payload
    pub fn register_fn<F, Fut>(&mut self, action_type: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(action_type, Arc::new(FnHandler(f)));
    }

    pub fn has_handler(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Run cleanup actions from last to first
    ///
    /// Never stops early: a missing handler or a failing handler is recorded
    /// and the remaining actions still run.
    pub async fn execute_lifo(&self, actions: &[CleanupAction]) -> CleanupErrors {
        let mut errors = CleanupErrors::default();

        for action in actions.iter().rev() {
            let Some(handler) = self.handlers.get(&action.action_type) else {
                warn!(action_type = %action.action_type, "No cleanup handler registered");
                errors.0.push(CleanupFailure {
                    action_type: action.action_type.clone(),
                    error: anyhow::anyhow!("no handler for cleanup type {:?}", action.action_type),
                });
                continue;
            };

            info!(action_type = %action.action_type, "Running cleanup action");
            if let Err(error) = handler.cleanup(&action.data).await {
                warn!(action_type = %action.action_type, error = %error, "Cleanup action failed");
                errors.0.push(CleanupFailure {
                    action_type: action.action_type.clone(),
                    error,
                });
            }
        }

        errors
    }
}
