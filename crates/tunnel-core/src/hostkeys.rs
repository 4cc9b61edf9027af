//! Host-key verification against the user's known_hosts file.
//!
//! The verifier is consulted through the russh client handler during the
//! handshake. Insecure mode accepts any key; otherwise the presented key
//! must match a known_hosts entry for the target authority.

use std::path::PathBuf;
use std::sync::Arc;

use russh::client::{self, DisconnectReason};
use russh::keys::{HashAlg, PublicKey, check_known_hosts_path};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{TunnelError, TunnelResult};

/// How a presented server key is judged.
#[derive(Clone, Debug)]
pub enum HostKeyPolicy {
    /// Verify against the known_hosts file at the given path.
    KnownHosts(PathBuf),
    /// Accept any key without verification.
    AcceptAll,
}

impl HostKeyPolicy {
    /// The policy for a tunnel: permissive iff `insecure`, otherwise the
    /// conventional `~/.ssh/known_hosts` file.
    pub fn for_tunnel(insecure: bool) -> TunnelResult<Self> {
        if insecure {
            return Ok(Self::AcceptAll);
        }
        let home = dirs::home_dir().ok_or(TunnelError::NoHomeDir)?;
        Ok(Self::KnownHosts(home.join(".ssh").join("known_hosts")))
    }
}

/// Checks a server's presented public key for one authority.
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
    host: String,
    port: u16,
}

impl HostKeyVerifier {
    pub fn new(policy: HostKeyPolicy, host: impl Into<String>, port: u16) -> Self {
        Self {
            policy,
            host: host.into(),
            port,
        }
    }

    fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Verify `key` under the configured policy.
    pub fn verify(&self, key: &PublicKey) -> TunnelResult<bool> {
        let path = match &self.policy {
            HostKeyPolicy::AcceptAll => {
                warn!(
                    authority = %self.authority(),
                    "host key validation is disabled, accepting any server key"
                );
                return Ok(true);
            }
            HostKeyPolicy::KnownHosts(path) => path,
        };
        debug!(file = %path.display(), "known_hosts file used");

        match check_known_hosts_path(&self.host, self.port, key, path) {
            Ok(true) => {
                debug!(authority = %self.authority(), "host key verified against known_hosts");
                Ok(true)
            }
            Ok(false) => Err(TunnelError::HostKeyMismatch {
                authority: self.authority(),
                reason: format!(
                    "no known_hosts entry matches the presented key (SHA256 {})",
                    key.fingerprint(HashAlg::Sha256)
                ),
            }),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TunnelError::HostKeyMismatch {
                authority: self.authority(),
                reason: format!(
                    "key changed, known_hosts line {line} no longer matches (received SHA256 {})",
                    key.fingerprint(HashAlg::Sha256)
                ),
            }),
            Err(err) => Err(TunnelError::KnownHostsUnreadable {
                path: path.clone(),
                reason: err.to_string(),
            }),
        }
    }
}

/// russh client handler: host-key checks plus session-death notification.
///
/// The handler owns the sending side of the closed-channel; the session
/// wrapper blocks on the receiving side to implement its disconnect watch.
pub struct TunnelHandler {
    verifier: Arc<HostKeyVerifier>,
    closed_tx: mpsc::UnboundedSender<String>,
}

impl TunnelHandler {
    pub fn new(verifier: HostKeyVerifier, closed_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            verifier: Arc::new(verifier),
            closed_tx,
        }
    }
}

impl client::Handler for TunnelHandler {
    type Error = TunnelError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        let verifier = Arc::clone(&self.verifier);
        let key = server_public_key.clone();
        async move { verifier.verify(&key) }
    }

    fn disconnected(
        &mut self,
        reason: DisconnectReason<Self::Error>,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        let closed_tx = self.closed_tx.clone();
        async move {
            match reason {
                DisconnectReason::ReceivedDisconnect(_) => {
                    info!("ssh server sent a disconnect message");
                    let _ = closed_tx.send("server closed the connection".to_string());
                    Ok(())
                }
                DisconnectReason::Error(err) => {
                    let _ = closed_tx.send(err.to_string());
                    Err(err)
                }
            }
        }
    }
}
