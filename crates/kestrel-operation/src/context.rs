//! Typed access to well-known operation context fields
//!
//! The context is a free-form JSON map so documents stay readable and
//! forward compatible. [`ContextKey`] pins the JSON name and Rust type of the
//! fields the engine itself reads.

use crate::error::Result;
use crate::operation::Operation;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// A named context field holding values of type `T`
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

/// Context fields shared by the workflows and the inventory bookkeeping
pub mod keys {
    use super::ContextKey;

    pub const NODE_NAME: ContextKey<String> = ContextKey::new("nodeName");
    pub const ROLE: ContextKey<String> = ContextKey::new("role");
    pub const POOL_NAME: ContextKey<String> = ContextKey::new("poolName");
    pub const SERVER_ID: ContextKey<String> = ContextKey::new("serverId");
    pub const ZONE: ContextKey<String> = ContextKey::new("zone");
    pub const PUBLIC_IP: ContextKey<String> = ContextKey::new("publicIP");
    pub const PRIVATE_IP: ContextKey<String> = ContextKey::new("privateIP");
    /// Reserved control plane slot, stored as a decimal string
    pub const CONTROL_PLANE_SLOT: ContextKey<String> = ContextKey::new("controlPlaneSlot");
    /// Set once the bootstrapper has activated the node OS
    pub const TALOS_ACTIVATED: ContextKey<bool> = ContextKey::new("talosActivated");
}

impl Operation {
    /// Read a typed context value
    ///
    /// Returns `Ok(None)` when the field is absent or null, and a
    /// serialization error when it holds a value of the wrong shape.
    pub fn context_value<T: DeserializeOwned>(&self, key: ContextKey<T>) -> Result<Option<T>> {
        match self.get_context(key.name()) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Write a typed context value
    pub fn set_context_value<T: Serialize>(&mut self, key: ContextKey<T>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set_context(key.name(), value);
        Ok(())
    }
}
