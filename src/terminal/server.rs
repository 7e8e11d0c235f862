// src/terminal/server.rs
//! SSH listener for interactive terminal sessions
//!
//! Any password is accepted. Only `session` channels are opened; `pty-req`
//! and `shell` are acknowledged and the shell request starts a
//! `TerminalSession` over the channel. Every shell gets its own pending
//! registry.

use crate::broker::event_bus::EventBus;
use crate::recording::storage::MockStore;
use crate::terminal::session::{TerminalDispatcher, TerminalSession};
use crate::utils::errors::{MockError, Result};
use async_trait::async_trait;
use russh::server::{Auth, Config, Handler, Msg, Session};
use russh::{Channel, ChannelId, MethodSet, Pty};
use russh_keys::key::KeyPair;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Load the host key at `path`, or generate an ephemeral ed25519 key
pub fn load_host_key(path: Option<&Path>) -> Result<KeyPair> {
    match path {
        Some(path) => russh_keys::load_secret_key(path, None).map_err(|e| {
            MockError::ConfigError(format!("Failed to load host key {}: {}", path.display(), e))
        }),
        None => {
            warn!("No terminal host key configured, generating an ephemeral ed25519 key");
            KeyPair::generate_ed25519()
                .ok_or_else(|| MockError::ConfigError("Failed to generate host key".to_string()))
        }
    }
}

pub struct TerminalServer {
    store: Arc<MockStore>,
    bus: Arc<EventBus>,
    wait_timeout: Duration,
    config: Arc<Config>,
}

impl TerminalServer {
    pub fn new(store: Arc<MockStore>, bus: Arc<EventBus>, wait_timeout: Duration, host_key: KeyPair) -> Self {
        let config = Config {
            methods: MethodSet::PASSWORD,
            auth_rejection_time: Duration::from_millis(100),
            auth_rejection_time_initial: Some(Duration::ZERO),
            keys: vec![host_key],
            ..Default::default()
        };

        Self {
            store,
            bus,
            wait_timeout,
            config: Arc::new(config),
        }
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Terminal server listening on {}", addr);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept terminal connection: {}", e);
                        continue;
                    }
                },
                _ = shutdown.cancelled() => {
                    info!("Terminal server on {} stopped", addr);
                    return Ok(());
                }
            };

            info!("New terminal connection from {}", peer);
            let handler = ShellHandler {
                store: Arc::clone(&self.store),
                bus: Arc::clone(&self.bus),
                wait_timeout: self.wait_timeout,
                peer,
                channels: HashMap::new(),
            };
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                let session = match russh::server::run_stream(config, stream, handler).await {
                    Ok(session) => session,
                    Err(e) => {
                        debug!("SSH handshake with {} failed: {}", peer, e);
                        return;
                    }
                };
                match session.await {
                    Ok(()) => debug!("Terminal connection {} closed", peer),
                    Err(e) => debug!("Terminal connection {} ended: {}", peer, e),
                }
            });
        }
    }
}

/// Per-connection SSH handler
struct ShellHandler {
    store: Arc<MockStore>,
    bus: Arc<EventBus>,
    wait_timeout: Duration,
    peer: SocketAddr,
    /// Session channels opened but not yet running a shell
    channels: HashMap<ChannelId, Channel<Msg>>,
}

#[async_trait]
impl Handler for ShellHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, _password: &str) -> std::result::Result<Auth, Self::Error> {
        debug!("Accepting {} from {}", user, self.peer);
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> std::result::Result<(), Self::Error> {
        let Some(opened) = self.channels.remove(&channel) else {
            session.channel_failure(channel);
            return Ok(());
        };
        session.channel_success(channel);

        let handle = session.handle();
        let peer = self.peer;
        let dispatcher = TerminalDispatcher::new(Arc::clone(&self.store), Arc::clone(&self.bus), self.wait_timeout);
        tokio::spawn(async move {
            match TerminalSession::new(opened.into_stream(), dispatcher).run().await {
                Ok(()) => debug!("Shell for {} finished", peer),
                Err(e) => debug!("Shell for {} ended: {}", peer, e),
            }
            let _ = handle.close(channel).await;
        });
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        _name: &str,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::models::CallStatus;
    use crate::terminal::session::{FAREWELL, PROMPT};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct AcceptAnyHostKey;

    #[async_trait]
    impl russh::client::Handler for AcceptAnyHostKey {
        type Error = russh::Error;

        async fn check_server_key(
            &mut self,
            _server_public_key: &russh_keys::key::PublicKey,
        ) -> std::result::Result<bool, Self::Error> {
            Ok(true)
        }
    }

    async fn read_until<R: tokio::io::AsyncRead + Unpin>(stream: &mut R, needle: &str) -> String {
        let mut seen = Vec::new();
        let mut buf = [0u8; 256];
        tokio::time::timeout(Duration::from_secs(5), async {
            while !String::from_utf8_lossy(&seen).contains(needle) {
                let n = stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "stream closed before {:?}", needle);
                seen.extend_from_slice(&buf[..n]);
            }
        })
        .await
        .unwrap();
        String::from_utf8_lossy(&seen).into_owned()
    }

    #[test]
    fn test_missing_host_key_file_rejected() {
        let err = load_host_key(Some(Path::new("/nonexistent/mockhub_host_key"))).unwrap_err();
        assert!(matches!(err, MockError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_shell_over_ssh_until_exit() {
        let store = Arc::new(MockStore::in_memory().await.unwrap());
        let server = Arc::new(TerminalServer::new(
            Arc::clone(&store),
            Arc::new(EventBus::new(1)),
            Duration::ZERO,
            load_host_key(None).unwrap(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&server).serve(listener, shutdown.clone()));

        let config = Arc::new(russh::client::Config::default());
        let mut client = russh::client::connect(config, addr, AcceptAnyHostKey).await.unwrap();
        assert!(client.authenticate_password("tester", "any password").await.unwrap());

        let channel = client.channel_open_session().await.unwrap();
        channel.request_pty(true, "xterm", 80, 24, 0, 0, &[]).await.unwrap();
        channel.request_shell(true).await.unwrap();
        let mut stream = channel.into_stream();

        read_until(&mut stream, PROMPT).await;
        stream.write_all(b"uptime\r").await.unwrap();
        read_until(&mut stream, "Command 'uptime' not found.").await;
        stream.write_all(b"exit\r").await.unwrap();
        read_until(&mut stream, FAREWELL).await;

        let page = store.list_ssh_events(&Default::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].status, CallStatus::AutoResponded);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
