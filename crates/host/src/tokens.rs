//! Token issuance and the in-memory session cache
//!
//! A bearer token is `base64url(claims JSON) . hex(HMAC-SHA256)`. Issuance
//! records the token in a TTL map and appends it to the principal's session
//! set; `verify` is the single authority consulted on every authenticated
//! call. `logout_all` flips every live entry to a `remote-logout` tombstone
//! with a short TTL so in-flight requests fail with a distinguishable reason.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// How long a remote-logout tombstone stays visible.
const TOMBSTONE_TTL: Duration = Duration::from_secs(60);

/// Signed token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Principal id.
    pub sub: i64,
    /// Issued-at, unix seconds.
    pub iat: u64,
    /// Expiry, unix seconds.
    pub exp: u64,
}

/// Why verification failed. `RemoteLogout` is surfaced distinctly so clients
/// can tell a forced logout from an expired or forged token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    Invalid,
    Expired,
    RemoteLogout,
}

struct Entry {
    principal_id: i64,
    valid: bool,
    remote_logout: bool,
    expires_at: SystemTime,
}

/// Token cache: token → entry, principal → set of active tokens.
pub struct TokenCache {
    key: [u8; 32],
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
    sessions: Mutex<HashMap<i64, HashSet<String>>>,
}

impl TokenCache {
    pub fn new(key: [u8; 32], ttl: Duration) -> Self {
        Self {
            key,
            ttl,
            entries: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a new bearer for the principal.
    pub fn issue(&self, principal_id: i64) -> String {
        let now = unix_now();
        let claims = Claims {
            sub: principal_id,
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).expect("claims encode"));
        let token = format!("{payload}.{}", hex::encode(self.sign(payload.as_bytes())));

        let expires_at = SystemTime::now() + self.ttl;
        self.entries.lock().unwrap().insert(
            token.clone(),
            Entry {
                principal_id,
                valid: true,
                remote_logout: false,
                expires_at,
            },
        );
        self.sessions
            .lock()
            .unwrap()
            .entry(principal_id)
            .or_default()
            .insert(token.clone());
        token
    }

    /// Verify a bearer: signature, expiry, cache presence, principal match.
    pub fn verify(&self, token: &str) -> Result<i64, AuthRejection> {
        let claims = self.parse(token)?;
        if claims.exp <= unix_now() {
            return Err(AuthRejection::Expired);
        }

        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get(token).ok_or(AuthRejection::Invalid)?;
        if entry.expires_at <= SystemTime::now() {
            entries.remove(token);
            return Err(AuthRejection::Expired);
        }
        if !entry.valid {
            return Err(if entry.remote_logout {
                AuthRejection::RemoteLogout
            } else {
                AuthRejection::Invalid
            });
        }
        if entry.principal_id != claims.sub {
            return Err(AuthRejection::Invalid);
        }
        Ok(claims.sub)
    }

    /// Invalidate every token of the principal with a remote-logout reason,
    /// then clear the session set.
    pub fn logout_all(&self, principal_id: i64) -> usize {
        let tokens = self
            .sessions
            .lock()
            .unwrap()
            .remove(&principal_id)
            .unwrap_or_default();
        let mut entries = self.entries.lock().unwrap();
        let tombstone_until = SystemTime::now() + TOMBSTONE_TTL;
        let mut count = 0;
        for token in &tokens {
            if let Some(entry) = entries.get_mut(token) {
                entry.valid = false;
                entry.remote_logout = true;
                entry.expires_at = tombstone_until;
                count += 1;
            }
        }
        tracing::info!(principal_id, revoked = count, "remote logout");
        count
    }

    /// Drop expired entries. Called opportunistically from the API layer.
    pub fn purge_expired(&self) {
        let now = SystemTime::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, e| e.expires_at > now);
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    fn parse(&self, token: &str) -> Result<Claims, AuthRejection> {
        let (payload, sig_hex) = token.split_once('.').ok_or(AuthRejection::Invalid)?;
        let sig = hex::decode(sig_hex).map_err(|_| AuthRejection::Invalid)?;
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| AuthRejection::Invalid)?;
        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthRejection::Invalid)?;
        serde_json::from_slice(&raw).map_err(|_| AuthRejection::Invalid)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TokenCache {
        TokenCache::new([7u8; 32], Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_verify_roundtrip() {
        let cache = cache();
        let token = cache.issue(42);
        assert_eq!(cache.verify(&token), Ok(42));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let cache = cache();
        let token = cache.issue(42);
        let mut forged = token.clone();
        forged.pop();
        forged.push('0');
        assert_eq!(cache.verify(&forged), Err(AuthRejection::Invalid));
    }

    #[test]
    fn test_unknown_token_rejected() {
        let a = cache();
        let b = TokenCache::new([9u8; 32], Duration::from_secs(3600));
        // Valid signature from another process key
        let token = b.issue(1);
        assert_eq!(a.verify(&token), Err(AuthRejection::Invalid));
        // Valid signature but absent from the cache (e.g. process restart)
        let orphan = {
            let c = cache();
            c.issue(1)
        };
        assert_eq!(a.verify(&orphan), Err(AuthRejection::Invalid));
    }

    #[test]
    fn test_expired_claims_rejected() {
        let cache = TokenCache::new([7u8; 32], Duration::from_secs(0));
        let token = cache.issue(1);
        assert_eq!(cache.verify(&token), Err(AuthRejection::Expired));
    }

    #[test]
    fn test_logout_all_fences_every_token() {
        let cache = cache();
        let t1 = cache.issue(5);
        let t2 = cache.issue(5);
        let other = cache.issue(6);

        assert_eq!(cache.logout_all(5), 2);
        assert_eq!(cache.verify(&t1), Err(AuthRejection::RemoteLogout));
        assert_eq!(cache.verify(&t2), Err(AuthRejection::RemoteLogout));
        // Unrelated principal is untouched
        assert_eq!(cache.verify(&other), Ok(6));
        // Session set is cleared; a second logout finds nothing
        assert_eq!(cache.logout_all(5), 0);
    }

    #[test]
    fn test_purge_expired() {
        let cache = TokenCache::new([7u8; 32], Duration::from_secs(0));
        let _ = cache.issue(1);
        cache.purge_expired();
        assert!(cache.entries.lock().unwrap().is_empty());
    }
}
