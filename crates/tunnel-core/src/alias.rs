//! Alias expansion: turn a persisted record into everything `start` needs.
//!
//! Purely compositional — the record is resolved through the same
//! reconciliation paths as a direct CLI invocation, so a saved alias and
//! an explicit command line cannot drift apart.

use std::time::Duration;

use warren_types::{AliasRecord, ChannelSpec, ServerAddress, TunnelSettings};

use crate::channel::build_channels;
use crate::config::SshConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::keys::SecretsProvider;
use crate::server::{ServerIdentity, new_server};

/// Everything required to construct and start a tunnel.
#[derive(Debug)]
pub struct ExpandedAlias {
    pub server: ServerIdentity,
    pub channels: Vec<ChannelSpec>,
    pub settings: TunnelSettings,
}

/// Resolve `record` into a tunnel specification.
pub fn expand_alias(
    record: &AliasRecord,
    secrets: &dyn SecretsProvider,
) -> TunnelResult<ExpandedAlias> {
    if record.server.is_empty() {
        return Err(TunnelError::MissingHost);
    }
    let address = ServerAddress::parse(&record.server).map_err(|_| TunnelError::MissingHost)?;

    let config_path = if record.config.is_empty() {
        None
    } else {
        Some(crate::config::expand_tilde(&record.config)?)
    };
    let ssh_config = SshConfig::open_or_default(config_path.as_deref())?;

    let server = new_server(
        &address.user,
        &address.address(),
        &record.key,
        secrets,
        &ssh_config,
    )?
    .insecure(record.insecure);

    let channels = build_channels(
        &server.name,
        record.source.clone(),
        record.destination.clone(),
        &ssh_config,
    )?;

    let defaults = TunnelSettings::default();
    let settings = TunnelSettings {
        connection_retries: record.connection_retries.unwrap_or(defaults.connection_retries),
        wait_and_retry: record
            .retry_wait
            .map(Duration::from_secs)
            .unwrap_or(defaults.wait_and_retry),
        keep_alive_interval: record
            .keep_alive_interval
            .map(Duration::from_secs)
            .unwrap_or(defaults.keep_alive_interval),
        dial_timeout: record
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(defaults.dial_timeout),
    };

    Ok(ExpandedAlias {
        server,
        channels,
        settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;
    use std::sync::Arc;

    use rand_core::OsRng;
    use russh::keys::{Algorithm, PrivateKey};

    struct StaticKeyProvider(Arc<PrivateKey>);

    impl SecretsProvider for StaticKeyProvider {
        fn load_signer(&self, _path: &Path) -> TunnelResult<Arc<PrivateKey>> {
            Ok(Arc::clone(&self.0))
        }
    }

    fn provider() -> StaticKeyProvider {
        StaticKeyProvider(Arc::new(
            PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap(),
        ))
    }

    #[test]
    fn expands_a_complete_record() {
        let record = AliasRecord {
            server: "alice@bastion.test:2222".into(),
            source: vec![":8080".into()],
            destination: vec!["app.internal:80".into()],
            insecure: true,
            connection_retries: Some(0),
            retry_wait: Some(5),
            keep_alive_interval: Some(15),
            timeout: Some(7),
            config: "/nonexistent-but-unused".into(),
            ..AliasRecord::default()
        };
        // An explicit but missing config file must fail loudly.
        assert!(matches!(
            expand_alias(&record, &provider()).unwrap_err(),
            TunnelError::ConfigUnavailable { .. }
        ));

        let record = AliasRecord {
            config: String::new(),
            ..record
        };
        let expanded = expand_alias(&record, &provider()).unwrap();
        assert_eq!(expanded.server.address, "bastion.test:2222");
        assert_eq!(expanded.server.user, "alice");
        assert!(expanded.server.insecure);
        assert_eq!(expanded.channels.len(), 1);
        assert_eq!(expanded.channels[0].local.to_string(), "127.0.0.1:8080");
        assert_eq!(expanded.settings.connection_retries, 0);
        assert_eq!(expanded.settings.wait_and_retry, Duration::from_secs(5));
        assert_eq!(expanded.settings.keep_alive_interval, Duration::from_secs(15));
        assert_eq!(expanded.settings.dial_timeout, Duration::from_secs(7));
    }

    #[test]
    fn empty_server_is_rejected() {
        let record = AliasRecord::default();
        assert!(matches!(
            expand_alias(&record, &provider()).unwrap_err(),
            TunnelError::MissingHost
        ));
    }
}
