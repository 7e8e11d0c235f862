// src/broker/leader.rs
//! Best-effort primary selection from heartbeat rows
//!
//! Among instances whose heartbeat is newer than the liveness window, the
//! earliest-registered one is primary; ties go to the store's row order.
//! This is not consensus. Two processes can briefly both see themselves
//! as primary; the condition clears once the stale heartbeat ages out.

use crate::recording::models::ServiceInstance;
use crate::recording::storage::MockStore;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Outcome of a primary check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryStatus {
    pub is_primary: bool,
    /// The current primary, if any live instance exists
    pub primary: Option<ServiceInstance>,
}

impl PrimaryStatus {
    fn unknown() -> Self {
        Self {
            is_primary: false,
            primary: None,
        }
    }
}

/// Pick the primary among `instances` (given in row order)
pub fn select_primary(instances: &[ServiceInstance], cutoff: DateTime<Utc>) -> Option<&ServiceInstance> {
    instances
        .iter()
        .filter(|instance| instance.last_seen_at > cutoff)
        .min_by_key(|instance| instance.registered_at)
}

/// Decides whether the local process is primary
pub struct LeaderSelector {
    store: Arc<MockStore>,
    local_address: String,
    liveness_window: Duration,
}

impl LeaderSelector {
    pub fn new(store: Arc<MockStore>, local_address: impl Into<String>, liveness_window: Duration) -> Self {
        Self {
            store,
            local_address: local_address.into(),
            liveness_window,
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub async fn is_primary(&self) -> PrimaryStatus {
        self.is_primary_at(Utc::now()).await
    }

    /// Primary check against store state as of `now`. A store error is
    /// reported as "no primary known", never as "local is primary".
    pub async fn is_primary_at(&self, now: DateTime<Utc>) -> PrimaryStatus {
        let instances = match self.store.active_instances(self.cutoff(now)).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!("Could not determine primary service: {}", e);
                return PrimaryStatus::unknown();
            }
        };

        match select_primary(&instances, self.cutoff(now)) {
            Some(primary) => PrimaryStatus {
                is_primary: primary.address == self.local_address,
                primary: Some(primary.clone()),
            },
            None => PrimaryStatus::unknown(),
        }
    }

    /// All live instances, in row order
    pub async fn active_instances(&self) -> Result<Vec<ServiceInstance>> {
        self.store.active_instances(self.cutoff(Utc::now())).await
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::milliseconds(self.liveness_window.as_millis() as i64)
    }
}
