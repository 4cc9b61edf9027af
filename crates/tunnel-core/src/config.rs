//! Minimal OpenSSH client-config reader.
//!
//! Only the keys the tunnel engine consumes are recognised: `Host`,
//! `HostName`, `Port`, `User`, `IdentityFile`, and `LocalForward`. Every
//! other directive is ignored. Lookups never fail: an unknown alias yields
//! an all-empty stanza so the reconciler can apply defaults uniformly.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{TunnelError, TunnelResult};

/// A `LocalForward` directive: local bind address paired with the remote
/// target it forwards to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalForward {
    pub local: String,
    pub remote: String,
}

/// Read-only snapshot of one `Host` stanza.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigHost {
    pub hostname: String,
    pub port: String,
    pub user: String,
    pub identity_file: String,
    pub local_forward: Option<LocalForward>,
}

/// Parsed ssh client configuration, indexed by host alias.
#[derive(Clone, Debug, Default)]
pub struct SshConfig {
    hosts: HashMap<String, ConfigHost>,
}

impl SshConfig {
    /// A configuration with no stanzas; every lookup yields empty fields.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read and parse the configuration file at `path`.
    pub fn open(path: &Path) -> TunnelResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| TunnelError::ConfigUnavailable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Self::parse_content(path, &content)
    }

    /// Open an explicitly given path, or fall back to `~/.ssh/config`. A
    /// missing default file is not an error; an explicit path must exist.
    pub fn open_or_default(path: Option<&Path>) -> TunnelResult<Self> {
        match path {
            Some(path) => Self::open(path),
            None => {
                let path = default_path()?;
                if path.exists() {
                    Self::open(&path)
                } else {
                    Ok(Self::empty())
                }
            }
        }
    }

    /// Parse configuration text. Exposed for callers that already hold the
    /// content in memory.
    pub fn parse(content: &str) -> TunnelResult<Self> {
        Self::parse_content(Path::new("<memory>"), content)
    }

    fn parse_content(path: &Path, content: &str) -> TunnelResult<Self> {
        let mut hosts: HashMap<String, ConfigHost> = HashMap::new();
        let mut current: Vec<String> = Vec::new();

        for (number, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (keyword, value) = split_directive(line).ok_or_else(|| {
                TunnelError::ConfigUnavailable {
                    path: path.to_path_buf(),
                    reason: format!("line {}: missing value for {line:?}", number + 1),
                }
            })?;

            if keyword.eq_ignore_ascii_case("host") {
                current = value.split_whitespace().map(str::to_string).collect();
                for alias in &current {
                    hosts.entry(alias.clone()).or_default();
                }
                continue;
            }

            // Directives outside of a Host block are not consumed here.
            for alias in &current {
                let stanza = hosts.entry(alias.clone()).or_default();
                apply_directive(stanza, keyword, value);
            }
        }

        Ok(Self { hosts })
    }

    /// Look up the stanza for `alias`. Unknown aliases yield a stanza with
    /// all fields empty rather than an error.
    pub fn get(&self, alias: &str) -> ConfigHost {
        self.hosts.get(alias).cloned().unwrap_or_default()
    }
}

/// The conventional location of the user ssh configuration file.
pub fn default_path() -> TunnelResult<PathBuf> {
    let home = dirs::home_dir().ok_or(TunnelError::NoHomeDir)?;
    Ok(home.join(".ssh").join("config"))
}

/// Expand a leading `~/` to the user home directory.
pub fn expand_tilde(path: &str) -> TunnelResult<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or(TunnelError::NoHomeDir)?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}

fn split_directive(line: &str) -> Option<(&str, &str)> {
    let (keyword, rest) = line.split_once(|c: char| c.is_whitespace() || c == '=')?;
    let value = rest.trim_start_matches(['=', ' ', '\t']).trim();
    if keyword.is_empty() || value.is_empty() {
        return None;
    }
    Some((keyword, value))
}

fn apply_directive(stanza: &mut ConfigHost, keyword: &str, value: &str) {
    // The first obtained value wins, as in OpenSSH.
    match keyword.to_ascii_lowercase().as_str() {
        "hostname" if stanza.hostname.is_empty() => stanza.hostname = value.to_string(),
        "port" if stanza.port.is_empty() => stanza.port = value.to_string(),
        "user" if stanza.user.is_empty() => stanza.user = value.to_string(),
        "identityfile" if stanza.identity_file.is_empty() => {
            stanza.identity_file = value.to_string();
        }
        "localforward" if stanza.local_forward.is_none() => {
            stanza.local_forward = parse_local_forward(value);
        }
        _ => {}
    }
}

/// Parse a `LocalForward` value: `<bind-address> <remote-host>:<remote-port>`.
/// A bare port in the bind position binds the loopback interface. Invalid
/// syntax is treated as an absent directive.
fn parse_local_forward(value: &str) -> Option<LocalForward> {
    let mut parts = value.split_whitespace();
    let bind = parts.next()?;
    let remote = parts.next()?;
    if parts.next().is_some() || !remote.contains(':') {
        return None;
    }
    let local = if bind.contains(':') {
        bind.to_string()
    } else {
        format!("127.0.0.1:{bind}")
    };
    Some(LocalForward {
        local,
        remote: remote.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# staging bastion
Host bastion staging
    HostName bastion.acme.internal
    Port 2222
    User deploy
    IdentityFile ~/.ssh/acme_ed25519
    LocalForward 5432 db.acme.internal:5432
    ServerAliveInterval 30

Host db
    HostName db.acme.internal

Host forward-only
    LocalForward 127.0.0.1:8080 app.acme.internal:80
"#;

    #[test]
    fn resolves_a_full_stanza() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        let host = config.get("bastion");
        assert_eq!(host.hostname, "bastion.acme.internal");
        assert_eq!(host.port, "2222");
        assert_eq!(host.user, "deploy");
        assert_eq!(host.identity_file, "~/.ssh/acme_ed25519");
        assert_eq!(
            host.local_forward,
            Some(LocalForward {
                local: "127.0.0.1:5432".into(),
                remote: "db.acme.internal:5432".into(),
            })
        );
    }

    #[test]
    fn stanza_is_shared_between_aliases() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.get("staging"), config.get("bastion"));
    }

    #[test]
    fn unknown_alias_yields_empty_stanza() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        let host = config.get("nope");
        assert_eq!(host, ConfigHost::default());
        assert!(host.local_forward.is_none());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        // ServerAliveInterval did not corrupt any recognised field.
        assert_eq!(config.get("bastion").port, "2222");
    }

    #[test]
    fn local_forward_with_explicit_bind_address() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        let forward = config.get("forward-only").local_forward.unwrap();
        assert_eq!(forward.local, "127.0.0.1:8080");
        assert_eq!(forward.remote, "app.acme.internal:80");
    }

    #[test]
    fn invalid_local_forward_is_treated_as_absent() {
        let config = SshConfig::parse("Host h\n  LocalForward 8080\n").unwrap();
        assert!(config.get("h").local_forward.is_none());
    }

    #[test]
    fn directive_without_value_is_a_parse_error() {
        let err = SshConfig::parse("Host h\n  HostName\n").unwrap_err();
        assert!(matches!(err, TunnelError::ConfigUnavailable { .. }));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = SshConfig::open(Path::new("/nonexistent/ssh/config")).unwrap_err();
        assert!(matches!(err, TunnelError::ConfigUnavailable { .. }));
    }

    #[test]
    fn first_value_wins_within_a_stanza() {
        let config = SshConfig::parse("Host h\n  Port 22\n  Port 2222\n").unwrap();
        assert_eq!(config.get("h").port, "22");
    }

    #[test]
    fn accepts_equals_separated_directives() {
        let config = SshConfig::parse("Host h\nHostName=h.example.net\n").unwrap();
        assert_eq!(config.get("h").hostname, "h.example.net");
    }
}
