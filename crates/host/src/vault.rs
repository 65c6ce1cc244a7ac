//! Credential vault
//!
//! Symmetric authenticated encryption for stored SSH secrets. Each field is
//! encrypted independently with AES-256-GCM under a key derived from the
//! operator-supplied process secret; a fresh random nonce is generated per
//! field and stored alongside the ciphertext. Plaintext exists in memory only
//! between decryption and the SSH handshake, and is never logged.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix marking vault-encrypted opaque strings.
const CIPHERTEXT_PREFIX: &str = "gcm:";

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("ciphertext is not vault-encoded")]
    NotEncrypted,
    #[error("ciphertext is malformed")]
    Malformed,
    #[error("decryption failed (wrong key or tampered data)")]
    DecryptFailed,
    #[error("decrypted data is not UTF-8")]
    NotUtf8,
}

/// Which way [`Vault::process_secrets`] transforms the credential fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// The credential fields of a connection descriptor, processed as a unit.
/// A decrypt failure on any field fails the whole set; the gateway never
/// attempts an SSH connection with partially decrypted credentials.
#[derive(Debug, Default, Clone)]
pub struct ConnectionSecrets {
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

/// Process-wide symmetric vault. Cheap to clone; key material is immutable.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
    /// HMAC key for the token signer, derived from the same secret with a
    /// distinct domain label so vault and signer keys never coincide.
    token_key: [u8; 32],
}

impl Vault {
    /// Derive the vault from operator key material.
    pub fn new(secret: &str) -> Self {
        let key_bytes = derive_key(secret, "vault");
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
            token_key: derive_key(secret, "token"),
        }
    }

    pub fn token_key(&self) -> [u8; 32] {
        self.token_key
    }

    /// Encrypt one field into an opaque string.
    pub fn encrypt(&self, plain: &[u8]) -> String {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain)
            .expect("AES-GCM encryption is infallible for in-memory buffers");
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        format!("{CIPHERTEXT_PREFIX}{}", B64.encode(blob))
    }

    /// Decrypt one opaque string.
    pub fn decrypt(&self, opaque: &str) -> Result<Vec<u8>, VaultError> {
        let encoded = opaque
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or(VaultError::NotEncrypted)?;
        let blob = B64.decode(encoded).map_err(|_| VaultError::Malformed)?;
        if blob.len() <= NONCE_LEN {
            return Err(VaultError::Malformed);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::DecryptFailed)
    }

    /// Decrypt straight into a [`SecretString`] so the plaintext is zeroed
    /// on drop.
    pub fn decrypt_secret(&self, opaque: &str) -> Result<SecretString, VaultError> {
        let plain = self.decrypt(opaque)?;
        let s = String::from_utf8(plain).map_err(|_| VaultError::NotUtf8)?;
        Ok(SecretString::new(s))
    }

    /// Selectively transform the `password`, `privateKey` and `passphrase`
    /// fields. Absent fields pass through untouched.
    pub fn process_secrets(
        &self,
        mut secrets: ConnectionSecrets,
        direction: Direction,
    ) -> Result<ConnectionSecrets, VaultError> {
        for field in [
            &mut secrets.password,
            &mut secrets.private_key,
            &mut secrets.passphrase,
        ] {
            if let Some(value) = field.take() {
                *field = Some(match direction {
                    Direction::Encrypt => self.encrypt(value.as_bytes()),
                    Direction::Decrypt => {
                        let plain = self.decrypt(&value)?;
                        String::from_utf8(plain).map_err(|_| VaultError::NotUtf8)?
                    }
                });
            }
        }
        Ok(secrets)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Vault(..)")
    }
}

/// SHA-256 over the secret plus a domain label.
fn derive_key(secret: &str, label: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = Vault::new("test-secret");
        let opaque = vault.encrypt(b"hunter2");
        assert!(opaque.starts_with("gcm:"));
        assert_eq!(vault.decrypt(&opaque).unwrap(), b"hunter2");
    }

    #[test]
    fn test_fresh_nonce_per_field() {
        let vault = Vault::new("test-secret");
        assert_ne!(vault.encrypt(b"same"), vault.encrypt(b"same"));
    }

    #[test]
    fn test_tamper_detection() {
        let vault = Vault::new("test-secret");
        let opaque = vault.encrypt(b"data");
        let mut blob = B64.decode(&opaque[4..]).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        let tampered = format!("gcm:{}", B64.encode(blob));
        assert!(matches!(
            vault.decrypt(&tampered),
            Err(VaultError::DecryptFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = Vault::new("key-a");
        let b = Vault::new("key-b");
        let opaque = a.encrypt(b"data");
        assert!(b.decrypt(&opaque).is_err());
    }

    #[test]
    fn test_not_encrypted_marker() {
        let vault = Vault::new("k");
        assert!(matches!(
            vault.decrypt("plaintext-password"),
            Err(VaultError::NotEncrypted)
        ));
    }

    #[test]
    fn test_process_secrets_both_directions() {
        let vault = Vault::new("k");
        let secrets = ConnectionSecrets {
            password: Some("pw".into()),
            private_key: None,
            passphrase: Some("pp".into()),
        };
        let enc = vault
            .process_secrets(secrets, Direction::Encrypt)
            .unwrap();
        assert!(enc.password.as_ref().unwrap().starts_with("gcm:"));
        assert!(enc.private_key.is_none());
        let dec = vault.process_secrets(enc, Direction::Decrypt).unwrap();
        assert_eq!(dec.password.as_deref(), Some("pw"));
        assert_eq!(dec.passphrase.as_deref(), Some("pp"));
    }

    #[test]
    fn test_token_key_distinct_from_vault_key() {
        let vault = Vault::new("k");
        assert_ne!(vault.token_key().to_vec(), derive_key("k", "vault").to_vec());
    }
}
