// src/app.rs
//! Process wiring
//!
//! Builds the shared broker state once and hands it to every transport:
//!
//! ```text
//! MockStore ─┬─ LeaderSelector ─┐
//!            ├─ Heartbeat       ├─ HttpInterceptor ─► /api/*, intercepted calls
//!            └─ Interceptor ────┘
//!                 │  EventBus, PendingRegistry, Housekeeper
//!                 └─ TerminalServer (own registry per connection)
//! ```

use crate::broker::{EventBus, Heartbeat, Housekeeper, LeaderSelector, PendingRegistry};
use crate::interception::{ForwardingProxy, HttpInterceptor, Interceptor, InterceptorConfig, InterceptorSettings};
use crate::recording::storage::MockStore;
use crate::terminal::{load_host_key, TerminalServer};
use crate::utils::config::MockConfig;
use crate::utils::errors::{MockError, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Protocol recorded for this instance in the heartbeat table
const INSTANCE_PROTOCOL: &str = "http";

/// A fully wired mock-server process
pub struct MockApp {
    config: MockConfig,
    local_address: String,
    store: Arc<MockStore>,
    bus: Arc<EventBus>,
    registry: Arc<PendingRegistry>,
    interceptor: Arc<Interceptor>,
    heartbeat: Arc<Heartbeat>,
    front: Arc<HttpInterceptor>,
    shutdown: CancellationToken,
}

impl MockApp {
    /// Open the configured store and wire every component
    pub async fn build(config: MockConfig) -> Result<Self> {
        let store = Arc::new(MockStore::open(&config.storage.db_path).await?);
        Self::with_store(config, store)
    }

    /// Wire every component around an existing store
    pub fn with_store(config: MockConfig, store: Arc<MockStore>) -> Result<Self> {
        let local_address = config.server.advertised_address()?;
        let broker = &config.broker;

        let bus = Arc::new(EventBus::new(broker.observer_queue_capacity));
        let registry = Arc::new(PendingRegistry::new());
        let interceptor = Arc::new(Interceptor::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&registry),
            InterceptorSettings {
                wait_timeout: broker.wait_timeout(),
                fallback_response: broker.fallback_response.clone(),
                reject_empty_body: config.server.reject_empty_body,
            },
        ));

        let leader = Arc::new(LeaderSelector::new(
            Arc::clone(&store),
            local_address.clone(),
            broker.liveness_window(),
        ));
        let forwarder = Arc::new(ForwardingProxy::new(local_address.clone(), broker.forward_timeout()));
        let heartbeat = Arc::new(Heartbeat::new(
            Arc::clone(&store),
            local_address.clone(),
            INSTANCE_PROTOCOL,
            broker.heartbeat_interval(),
        ));

        let front = Arc::new(HttpInterceptor::new(
            InterceptorConfig {
                response_content_type: config.server.response_content_type.clone(),
                keepalive_interval: broker.keepalive_interval(),
            },
            Arc::clone(&interceptor),
            leader,
            forwarder,
        ));

        Ok(Self {
            config,
            local_address,
            store,
            bus,
            registry,
            interceptor,
            heartbeat,
            front,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address registered for this instance
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn store(&self) -> &Arc<MockStore> {
        &self.store
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    /// Token that stops `run` when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the configured HTTP listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.server.listen_socket_addr()?;
        TcpListener::bind(addr)
            .await
            .map_err(|e| MockError::ConfigError(format!("Failed to bind {}: {}", addr, e)))
    }

    /// Register this instance, start the background tasks and serve HTTP on
    /// `listener` until shutdown. The instance row is removed on the way out.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        let terminal = match &self.config.terminal.listen_addr {
            Some(addr) => Some(self.bind_terminal(addr).await?),
            None => None,
        };

        self.heartbeat.register().await?;

        let mut tasks = vec![
            Arc::clone(&self.heartbeat).spawn(self.shutdown.child_token()),
            Housekeeper::new(
                Arc::clone(&self.bus),
                Arc::clone(&self.registry),
                self.config.broker.housekeeping_interval(),
            )
            .spawn(self.shutdown.child_token()),
        ];

        if let Some((terminal, terminal_listener)) = terminal {
            let shutdown = self.shutdown.child_token();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = terminal.serve(terminal_listener, shutdown).await {
                    warn!("Terminal server failed: {}", e);
                }
            }));
        }

        info!("Mock server instance {} started", self.local_address);
        let result = Arc::clone(&self.front)
            .serve(listener, self.shutdown.clone())
            .await;

        self.shutdown.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task failed: {}", e);
            }
        }

        if let Err(e) = self.heartbeat.deregister().await {
            warn!("Failed to de-register {}: {}", self.local_address, e);
        }
        result
    }

    async fn bind_terminal(&self, addr: &str) -> Result<(Arc<TerminalServer>, TcpListener)> {
        let host_key = load_host_key(self.config.terminal.host_key_path.as_deref())?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MockError::ConfigError(format!("Failed to bind terminal {}: {}", addr, e)))?;
        let terminal = Arc::new(TerminalServer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            self.config.terminal.wait_timeout(),
            host_key,
        ));
        Ok((terminal, listener))
    }

    /// Stop serving and background tasks
    pub fn shutdown(&self) {
        info!("Shutting down mock server instance {}", self.local_address);
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(port: u16) -> MockConfig {
        let mut config = MockConfig::default();
        config.server.listen_addr = format!("127.0.0.1:{}", port);
        config
    }

    #[tokio::test]
    async fn test_run_registers_and_deregisters() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let store = Arc::new(MockStore::in_memory().await.unwrap());
        let app = Arc::new(MockApp::with_store(test_config(port), Arc::clone(&store)).unwrap());
        assert_eq!(app.local_address(), format!("127.0.0.1:{}", port));

        let handle = {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.run(listener).await })
        };

        let mut registered = false;
        for _ in 0..50 {
            if store.get_instance(app.local_address()).await.unwrap().is_some() {
                registered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registered);

        app.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(store.get_instance(app.local_address()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_listen_address_rejected() {
        let mut config = MockConfig::default();
        config.server.listen_addr = "not-an-address".to_string();
        let store = Arc::new(MockStore::in_memory().await.unwrap());
        assert!(MockApp::with_store(config, store).is_err());
    }
}
