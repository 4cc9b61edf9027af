use serde::{Deserialize, Serialize};

/// A persisted tunnel invocation, keyed by name.
///
/// The record carries the same named options the CLI recognises so a saved
/// alias and an explicit invocation reconcile through the same code path.
/// Durations are stored in whole seconds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AliasRecord {
    /// Server address: `[user@]host[:port]`.
    pub server: String,
    /// Source endpoint addresses: `[host]:port`.
    pub source: Vec<String>,
    /// Destination endpoint addresses: `[host]:port`.
    pub destination: Vec<String>,
    /// Path to the private key used to authenticate.
    pub key: String,
    /// Increase log verbosity.
    pub verbose: bool,
    /// Skip host key validation when connecting to the ssh server.
    pub insecure: bool,
    /// Run the process in the background (accepted for compatibility).
    pub detach: bool,
    /// Interval between keep-alive packets, in seconds.
    pub keep_alive_interval: Option<u64>,
    /// Maximum number of connection retries; 0 retries forever, negative
    /// disables retrying.
    pub connection_retries: Option<i32>,
    /// Seconds to wait before reconnecting to the ssh server.
    pub retry_wait: Option<u64>,
    /// Unix socket of an ssh agent (accepted for compatibility).
    pub ssh_agent: String,
    /// SSH server connection timeout, in seconds.
    pub timeout: Option<u64>,
    /// Path to the ssh client configuration file.
    pub config: String,
}
