use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or running a tunnel.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The ssh configuration file could not be opened or parsed.
    #[error("error accessing ssh config {path}: {reason}")]
    ConfigUnavailable { path: PathBuf, reason: String },

    /// The user home directory could not be determined.
    #[error("could not obtain user home directory")]
    NoHomeDir,

    /// No server host was given in the server address.
    #[error("server host has to be provided as part of the server address")]
    MissingHost,

    /// Reconciliation produced no hostname for the server.
    #[error("no server hostname could be found for server {host}")]
    UnresolvedHostname { host: String },

    /// Reconciliation produced no user for the server.
    #[error("no user could be found for server {host}")]
    MissingUser { host: String },

    /// The private key file could not be read.
    #[error("error while reading key {path}: {source}")]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The private key is encrypted and no passphrase was available.
    #[error("key {path} is encrypted and requires a passphrase")]
    PassphraseRequired { path: PathBuf },

    /// The private key could not be parsed.
    #[error("error while parsing key {path}: {reason}")]
    KeyParseFailed { path: PathBuf, reason: String },

    /// The known-hosts file could not be read or parsed.
    #[error("error while reading known_hosts file {path}: {reason}")]
    KnownHostsUnreadable { path: PathBuf, reason: String },

    /// The server presented a host key that failed verification.
    #[error("host key verification failed for {authority}: {reason}")]
    HostKeyMismatch { authority: String, reason: String },

    /// A local listener could not be bound.
    #[error("failed to listen on {address}: {source}")]
    ListenFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// A channel was constructed with an empty local or remote address.
    #[error("invalid ssh channel: local={local}, remote={remote}")]
    InvalidChannel { local: String, remote: String },

    /// More local than remote addresses were given, with no remote at all.
    #[error("cannot create a tunnel without at least one remote address")]
    NoRemoteGiven,

    /// A remote endpoint has no port to dial.
    #[error("missing port in remote address: {address}")]
    MissingRemotePort { address: String },

    /// No LocalForward stanza was available to derive a channel from.
    #[error("LocalForward could not be found or has invalid syntax for host {host}")]
    LocalForwardMissing { host: String },

    /// The configured number of connection attempts was used up.
    #[error("could not connect to the ssh server after {attempts} attempt(s)")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        source: Box<TunnelError>,
    },

    /// A connection attempt failed before the SSH handshake completed.
    #[error("failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    /// Authentication was rejected by the ssh server.
    #[error("ssh server rejected {method} authentication for user {user}")]
    AuthFailed { user: String, method: String },

    /// An accept loop or remote dial failed while serving a channel.
    #[error("{0}")]
    ChannelFailed(String),

    /// The ssh session terminated.
    #[error("ssh session closed: {0}")]
    SessionClosed(String),

    /// SSH protocol error.
    #[error("ssh protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

impl TunnelError {
    /// Create a channel failure with context, used inside accept loops.
    pub fn channel(message: impl Into<String>) -> Self {
        Self::ChannelFailed(message.into())
    }
}
