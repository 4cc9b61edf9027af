//! Server identity reconciliation.
//!
//! Fuses explicitly given connection attributes with the user's ssh-config
//! stanza, applying built-in defaults last: explicit value > config value
//! > default.

use std::fmt;
use std::sync::Arc;

use russh::keys::PrivateKey;

use crate::config::{self, SshConfig};
use crate::error::{TunnelError, TunnelResult};
use crate::keys::SecretsProvider;

const DEFAULT_SSH_PORT: &str = "22";

/// First-non-empty merge of a primary and a secondary value.
pub fn reconcile<'a>(primary: &'a str, secondary: &'a str) -> &'a str {
    if !primary.is_empty() { primary } else { secondary }
}

/// The reconciled connection target: resolved address, user, signer, and
/// host-key policy. Constructed once per tunnel run and immutable after.
#[derive(Clone)]
pub struct ServerIdentity {
    /// The host alias the identity was resolved from.
    pub name: String,
    /// Dial address, `hostname:port`, using the resolved hostname.
    pub address: String,
    /// User to authenticate as.
    pub user: String,
    /// Accept any host key instead of consulting known_hosts.
    pub insecure: bool,
    signer: Arc<PrivateKey>,
}

impl ServerIdentity {
    /// The parsed signer used for public-key authentication.
    pub fn signer(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.signer)
    }

    /// Toggle host-key verification off for this identity.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[name={}, address={}, user={}]",
            self.name, self.address, self.user
        )
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("user", &self.user)
            .field("insecure", &self.insecure)
            .finish_non_exhaustive()
    }
}

/// Build a [`ServerIdentity`] from explicit attributes, resolving whatever
/// is missing through the ssh configuration and built-in defaults.
///
/// `address` is `host[:port]`; `user` and `key_path` may be empty.
pub fn new_server(
    user: &str,
    address: &str,
    key_path: &str,
    secrets: &dyn SecretsProvider,
    ssh_config: &SshConfig,
) -> TunnelResult<ServerIdentity> {
    let (host, port) = match address.split_once(':') {
        Some((host, port)) => (host, port),
        None => (address, ""),
    };

    if host.is_empty() {
        return Err(TunnelError::MissingHost);
    }

    let stanza = ssh_config.get(host);
    let hostname = reconcile(&stanza.hostname, host);
    let port = reconcile(port, &stanza.port);
    let user = reconcile(user, &stanza.user);
    let key_path = reconcile(key_path, &stanza.identity_file);

    if hostname.is_empty() {
        return Err(TunnelError::UnresolvedHostname {
            host: host.to_string(),
        });
    }
    if user.is_empty() {
        return Err(TunnelError::MissingUser {
            host: host.to_string(),
        });
    }

    let port = if port.is_empty() { DEFAULT_SSH_PORT } else { port };
    let key_path = if key_path.is_empty() {
        let home = dirs::home_dir().ok_or(TunnelError::NoHomeDir)?;
        home.join(".ssh").join("id_rsa")
    } else {
        config::expand_tilde(key_path)?
    };

    let signer = secrets.load_signer(&key_path)?;

    Ok(ServerIdentity {
        name: host.to_string(),
        address: format!("{hostname}:{port}"),
        user: user.to_string(),
        insecure: false,
        signer,
    })
}
