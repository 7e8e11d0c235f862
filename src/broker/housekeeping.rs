// src/broker/housekeeping.rs
//! Periodic sweep that drains pending calls nobody is watching
//!
//! The last interactive observer drains the registry when it leaves, but a
//! call can register just after that drain. The sweep catches those within
//! one interval.

use crate::broker::event_bus::EventBus;
use crate::broker::pending::PendingRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct Housekeeper {
    bus: Arc<EventBus>,
    registry: Arc<PendingRegistry>,
    interval: Duration,
}

impl Housekeeper {
    pub fn new(bus: Arc<EventBus>, registry: Arc<PendingRegistry>, interval: Duration) -> Self {
        Self {
            bus,
            registry,
            interval,
        }
    }

    /// Drain the registry if no interactive observer is connected.
    /// Returns the number of calls force-resolved.
    pub fn sweep(&self) -> usize {
        if self.registry.is_empty() || self.bus.interactive_count() > 0 {
            return 0;
        }

        let drained = self.registry.drain_all();
        if drained > 0 {
            info!("Housekeeping drained {} unattended calls", drained);
        }
        drained
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep();
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Housekeeping stopped");
                        return;
                    }
                }
            }
        })
    }
}
