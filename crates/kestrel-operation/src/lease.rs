//! Advisory operation leases
//!
//! A lease at `leases/{id}.json` names the executor currently driving an
//! operation. The object store offers no compare-and-swap, so the lease only
//! keeps cooperating executors apart; it is not a lock.

use crate::error::{OperationError, Result};
use crate::store::OperationStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key prefix for lease documents
pub const LEASES_PREFIX: &str = "leases/";

/// Ownership record for one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLease {
    pub operation_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OperationLease {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

fn lease_key(id: &str) -> String {
    format!("{}{}.json", LEASES_PREFIX, id)
}

impl OperationStore {
    /// Current lease on an operation, if any
    pub async fn lease(&self, id: &str) -> Result<Option<OperationLease>> {
        match self.get_json(&lease_key(id)).await {
            Ok(lease) => Ok(Some(lease)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Take or renew the lease on an operation
    ///
    /// Succeeds when no lease exists, the existing lease expired, or `holder`
    /// already owns it. Otherwise returns `LeaseHeld`.
    pub async fn acquire_lease(&self, id: &str, holder: &str, ttl: Duration) -> Result<OperationLease> {
        let now = Utc::now();

        if let Some(existing) = self.lease(id).await? {
            if existing.holder != holder && !existing.is_expired_at(now) {
                return Err(OperationError::LeaseHeld {
                    id: id.to_string(),
                    holder: existing.holder,
                    expires_at: existing.expires_at,
                });
            }
            if existing.holder != holder {
                warn!(
                    operation = %id,
                    previous = %existing.holder,
                    "Taking over expired operation lease"
                );
            }
        }

        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let lease = OperationLease {
            operation_id: id.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.put_json(&lease_key(id), &lease).await?;
        info!(operation = %id, holder = %holder, expires_at = %lease.expires_at, "Acquired operation lease");
        Ok(lease)
    }

    /// Drop a lease held by `holder`. Leases held by others are left alone.
    pub async fn release_lease(&self, id: &str, holder: &str) -> Result<()> {
        match self.lease(id).await? {
            Some(existing) if existing.holder == holder => {
                self.delete_key(&lease_key(id)).await?;
                debug!(operation = %id, holder = %holder, "Released operation lease");
            }
            Some(existing) => {
                debug!(
                    operation = %id,
                    holder = %existing.holder,
                    "Lease belongs to another executor, not releasing"
                );
            }
            None => {}
        }
        Ok(())
    }
}
