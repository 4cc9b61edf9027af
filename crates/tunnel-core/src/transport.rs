//! Seams between the supervisor and the SSH wire protocol.
//!
//! The supervisor only ever talks to [`Transport`] and [`Session`]; the
//! russh-backed implementations live here, and the integration tests drive
//! the supervisor with mock implementations instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::PrivateKeyWithHashAlg;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use warren_types::Endpoint;

use crate::error::{TunnelError, TunnelResult};
use crate::hostkeys::{HostKeyPolicy, HostKeyVerifier, TunnelHandler};
use crate::server::ServerIdentity;

/// Trait bound for streams handed to the byte-copy tasks.
pub trait SessionStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> SessionStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A bidirectional byte stream opened through the session.
pub type SessionStream = Box<dyn SessionStreamIo>;

/// One authenticated SSH session.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Open a stream to `remote` through the session.
    async fn open_stream(&self, remote: &Endpoint) -> TunnelResult<SessionStream>;

    /// Send one keep-alive probe and wait for the reply.
    async fn keep_alive(&self) -> TunnelResult<()>;

    /// Resolve once the session has terminated, yielding the reason.
    async fn wait_closed(&self) -> TunnelError;

    /// Close the session.
    async fn close(&self);
}

/// Dials authenticated sessions to one server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    /// Establish and authenticate one session. The timeout covers the
    /// initial handshake only.
    async fn dial(&self, server: &ServerIdentity, timeout: Duration) -> TunnelResult<Self::Session>;
}

/// russh-backed transport.
pub struct RusshTransport {
    policy: HostKeyPolicy,
}

impl RusshTransport {
    /// Build a transport for `server`, resolving the host-key policy up
    /// front so configuration errors surface at construction.
    pub fn for_server(server: &ServerIdentity) -> TunnelResult<Self> {
        Ok(Self {
            policy: HostKeyPolicy::for_tunnel(server.insecure)?,
        })
    }
}

#[async_trait]
impl Transport for RusshTransport {
    type Session = RusshSession;

    async fn dial(&self, server: &ServerIdentity, timeout: Duration) -> TunnelResult<RusshSession> {
        let (host, port) = split_authority(&server.address);
        let verifier = HostKeyVerifier::new(self.policy.clone(), host, port);
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let handler = TunnelHandler::new(verifier, closed_tx);

        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: None,
            ..Default::default()
        });

        let mut handle = tokio::time::timeout(
            timeout,
            client::connect(config, server.address.as_str(), handler),
        )
        .await
        .map_err(|_| TunnelError::ConnectionFailed {
            address: server.address.clone(),
            reason: format!("handshake timed out after {timeout:?}"),
        })??;

        let signer = server.signer();
        let rsa_hash = if signer.algorithm().is_rsa() {
            handle
                .best_supported_rsa_hash()
                .await
                .unwrap_or(None)
                .flatten()
        } else {
            None
        };
        let auth = handle
            .authenticate_publickey(
                server.user.clone(),
                PrivateKeyWithHashAlg::new(signer, rsa_hash),
            )
            .await?;
        if !auth.success() {
            return Err(TunnelError::AuthFailed {
                user: server.user.clone(),
                method: "publickey".to_string(),
            });
        }
        debug!(server = %server, "ssh session authenticated");

        Ok(RusshSession {
            handle: Arc::new(handle),
            closed_rx: Mutex::new(closed_rx),
        })
    }
}

/// A live russh session plus the channel its handler reports death on.
pub struct RusshSession {
    handle: Arc<client::Handle<TunnelHandler>>,
    closed_rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

#[async_trait]
impl Session for RusshSession {
    async fn open_stream(&self, remote: &Endpoint) -> TunnelResult<SessionStream> {
        let port: u32 = remote
            .port
            .parse()
            .map_err(|_| TunnelError::MissingRemotePort {
                address: remote.to_string(),
            })?;
        let channel = self
            .handle
            .channel_open_direct_tcpip(remote.host.clone(), port, "127.0.0.1", 0)
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn keep_alive(&self) -> TunnelResult<()> {
        self.handle.send_keepalive(true).await?;
        Ok(())
    }

    async fn wait_closed(&self) -> TunnelError {
        let mut closed_rx = self.closed_rx.lock().await;
        match closed_rx.recv().await {
            Some(reason) => TunnelError::SessionClosed(reason),
            None => TunnelError::SessionClosed("ssh transport terminated".to_string()),
        }
    }

    async fn close(&self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
    }
}

fn split_authority(address: &str) -> (&str, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(22)),
        None => (address, 22),
    }
}
