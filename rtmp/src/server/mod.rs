//! The TCP acceptor and the embedder-facing server handle.

mod connection;

use crate::auth::{AcceptAllVerifier, SignatureVerifier};
use crate::config::ServerConfig;
use crate::hub::{self, HubMessage, RtmpEvent, SessionId, SessionInfo, StreamHubHandle, StreamInfo};
use crate::sessions::ServerSessionConfig;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind the RTMP listener: {0}")]
    Bind(#[source] io::Error),
}

/// A running (or startable) RTMP server: one TCP listener, one hub, and a
/// session task per accepted connection.
///
/// `stop` is idempotent and may be called from any task; it closes the
/// listener and tears down every session.
pub struct RtmpServer {
    config: ServerConfig,
    hub: StreamHubHandle,
    verifier: Arc<dyn SignatureVerifier>,
    cancellation: CancellationToken,
    next_session_id: AtomicU64,
}

impl RtmpServer {
    pub fn new(config: ServerConfig, verifier: Arc<dyn SignatureVerifier>) -> RtmpServer {
        let hub = hub::start(config.rtmp.gop_cache);

        RtmpServer {
            config,
            hub,
            verifier,
            cancellation: CancellationToken::new(),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// A server that accepts every publish and play attempt, for embedders
    /// that do not enable auth.
    pub fn with_defaults(config: ServerConfig) -> RtmpServer {
        RtmpServer::new(config, Arc::new(AcceptAllVerifier))
    }

    /// Binds the configured port and serves connections until [`RtmpServer::stop`]
    /// is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        let bind_address = format!("0.0.0.0:{}", self.config.rtmp.port);
        let listener = TcpListener::bind(&bind_address)
            .await
            .map_err(ServerError::Bind)?;

        info!(address = %bind_address, "RTMP server listening");

        let session_config = self.session_config();
        let ping_interval = Duration::from_secs(self.config.rtmp.ping);
        let idle_timeout = Duration::from_secs(self.config.rtmp.ping_timeout);

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    info!("RTMP server stopping");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_address)) => {
                            let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                            info!(session_id, peer = %peer_address, "Connection accepted");

                            let settings = connection::ConnectionSettings {
                                session_config: session_config.clone(),
                                ping_interval,
                                idle_timeout,
                            };

                            tokio::spawn(connection::run(
                                session_id,
                                stream,
                                peer_address,
                                self.hub.clone(),
                                settings,
                                self.verifier.clone(),
                                self.cancellation.child_token(),
                            ));
                        }

                        Err(error) => {
                            warn!(%error, "Failed to accept a connection");
                        }
                    }
                }
            }
        }
    }

    /// Closes the listener and cancels every session.  Safe to call more than
    /// once and from any task.
    pub fn stop(&self) {
        self.cancellation.cancel();
    }

    /// Subscribes to the hub's lifecycle event bus
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<RtmpEvent> {
        self.hub.subscribe()
    }

    /// Looks up a session by id
    pub async fn session_info(&self, session_id: SessionId) -> Option<SessionInfo> {
        self.hub.session_info(session_id).await
    }

    /// Looks up an actively published stream path
    pub async fn stream_info(&self, stream_path: &str) -> Option<StreamInfo> {
        self.hub.stream_info(stream_path).await
    }

    /// Tears down a single session
    pub fn kill_session(&self, session_id: SessionId) {
        self.hub.send(HubMessage::KillSession { session_id });
    }

    /// Direct access to the hub handle, for embedders wiring in their own
    /// delivery surfaces
    pub fn hub(&self) -> &StreamHubHandle {
        &self.hub
    }

    fn session_config(&self) -> ServerSessionConfig {
        let mut session_config = ServerSessionConfig::new();
        session_config.chunk_size = self.config.rtmp.chunk_size;
        session_config.auth_publish = self.config.auth.publish;
        session_config.auth_play = self.config.auth.play;
        session_config.auth_secret = self.config.auth.secret.clone();
        session_config
    }
}
