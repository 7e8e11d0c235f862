// src/broker/heartbeat.rs
//! Periodic heartbeat keeping this instance's leadership row fresh

use crate::recording::storage::MockStore;
use crate::utils::errors::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registers the local instance and refreshes its heartbeat row
pub struct Heartbeat {
    store: Arc<MockStore>,
    address: String,
    protocol: String,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(
        store: Arc<MockStore>,
        address: impl Into<String>,
        protocol: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            address: address.into(),
            protocol: protocol.into(),
            interval,
        }
    }

    /// Upsert the instance row now
    pub async fn beat(&self) -> Result<()> {
        self.store
            .upsert_instance(&self.address, &self.protocol, Utc::now())
            .await
    }

    /// Initial registration; failure here is fatal to startup
    pub async fn register(&self) -> Result<()> {
        self.beat().await?;
        info!("Service instance {} ({}) registered", self.address, self.protocol);
        Ok(())
    }

    /// Delete the instance row on graceful shutdown
    pub async fn deregister(&self) -> Result<()> {
        self.store.remove_instance(&self.address).await?;
        info!("Service instance {} de-registered", self.address);
        Ok(())
    }

    /// Refresh the row every interval until `shutdown` fires
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            // first tick completes immediately; registration already did it
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.beat().await {
                            Ok(()) => debug!("Heartbeat for {}", self.address),
                            Err(e) => warn!("Heartbeat failed for {}: {}", self.address, e),
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("Stopping heartbeat for {}", self.address);
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_deregister() {
        let store = Arc::new(MockStore::in_memory().await.unwrap());
        let heartbeat = Heartbeat::new(Arc::clone(&store), "a:1", "http", Duration::from_secs(5));

        heartbeat.register().await.unwrap();
        assert!(store.get_instance("a:1").await.unwrap().is_some());

        heartbeat.deregister().await.unwrap();
        assert!(store.get_instance("a:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawned_heartbeat_refreshes_row() {
        let store = Arc::new(MockStore::in_memory().await.unwrap());
        let heartbeat = Arc::new(Heartbeat::new(
            Arc::clone(&store),
            "a:1",
            "http",
            Duration::from_millis(20),
        ));
        heartbeat.register().await.unwrap();
        let first = store.get_instance("a:1").await.unwrap().unwrap();

        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&heartbeat).spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(120)).await;

        let refreshed = store.get_instance("a:1").await.unwrap().unwrap();
        assert!(refreshed.last_seen_at > first.last_seen_at);
        assert_eq!(refreshed.registered_at, first.registered_at);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
