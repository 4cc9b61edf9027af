//! Private-key loading behind the secrets-provider seam.
//!
//! The engine only ever sees a parsed signer; raw key bytes stay inside
//! the provider and are zeroized on drop by the underlying key types.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use russh::keys::{self, PrivateKey};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{TunnelError, TunnelResult};

/// Source of parsed signers for public-key authentication.
pub trait SecretsProvider: Send + Sync {
    /// Load and parse the private key at `path`, prompting for a
    /// passphrase if the provider supports it and the key is encrypted.
    fn load_signer(&self, path: &Path) -> TunnelResult<Arc<PrivateKey>>;
}

/// Reads private keys from disk, optionally asking for a passphrase on the
/// terminal when a key turns out to be encrypted.
pub struct FileKeyProvider {
    prompt_passphrase: bool,
}

impl FileKeyProvider {
    pub fn new(prompt_passphrase: bool) -> Self {
        Self { prompt_passphrase }
    }
}

impl Default for FileKeyProvider {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SecretsProvider for FileKeyProvider {
    fn load_signer(&self, path: &Path) -> TunnelResult<Arc<PrivateKey>> {
        let data = fs::read_to_string(path).map_err(|source| TunnelError::KeyUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        if let Ok(key) = PrivateKey::from_openssh(&data) {
            return Ok(Arc::new(key));
        }

        match keys::decode_secret_key(&data, None) {
            Ok(key) => Ok(Arc::new(key)),
            Err(keys::Error::KeyIsEncrypted) => {
                if !self.prompt_passphrase {
                    return Err(TunnelError::PassphraseRequired {
                        path: path.to_path_buf(),
                    });
                }
                let passphrase = read_passphrase(path)?;
                keys::decode_secret_key(&data, Some(passphrase.expose_secret()))
                    .map(Arc::new)
                    .map_err(|err| TunnelError::KeyParseFailed {
                        path: path.to_path_buf(),
                        reason: err.to_string(),
                    })
            }
            Err(err) => Err(TunnelError::KeyParseFailed {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
        }
    }
}

fn read_passphrase(path: &Path) -> TunnelResult<SecretString> {
    let prompt = format!("Enter passphrase for {}: ", path.display());
    rpassword::prompt_password(prompt)
        .map(|input| SecretString::new(input.into_boxed_str()))
        .map_err(|source| TunnelError::KeyUnreadable {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_file_is_unreadable() {
        let provider = FileKeyProvider::new(false);
        let err = provider
            .load_signer(Path::new("/nonexistent/id_ed25519"))
            .unwrap_err();
        assert!(matches!(err, TunnelError::KeyUnreadable { .. }));
    }

    #[test]
    fn garbage_key_data_fails_to_parse() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("warren-bad-key-{}", std::process::id()));
        fs::write(&path, "this is not a private key").unwrap();
        let provider = FileKeyProvider::new(false);
        let err = provider.load_signer(&path).unwrap_err();
        assert!(matches!(err, TunnelError::KeyParseFailed { .. }));
        let _ = fs::remove_file(&path);
    }
}
