//! Pending-connection handout
//!
//! Bridges the HTTP layer and the first stream frame: the API hands the
//! client an opaque `connectionId` keyed to a descriptor, and the stream
//! handshake consumes it. Credentials therefore never appear in the upgrade
//! URL. Entries expire after 30 minutes and are single-use.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::store::ConnectionDescriptor;

/// How long an unclaimed handout stays valid.
const PENDING_TTL: Duration = Duration::from_secs(30 * 60);

struct PendingEntry {
    descriptor: ConnectionDescriptor,
    created_at: Instant,
}

/// Short-lived `connectionId → descriptor` map.
pub struct PendingConnections {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingConnections {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store a descriptor and hand back its one-time key.
    pub fn insert(&self, descriptor: ConnectionDescriptor) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, e| e.created_at.elapsed() < PENDING_TTL);
        entries.insert(
            id.clone(),
            PendingEntry {
                descriptor,
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Consume a handout. Expired or unknown ids return `None`.
    pub fn claim(&self, connection_id: &str) -> Option<ConnectionDescriptor> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.remove(connection_id)?;
        if entry.created_at.elapsed() >= PENDING_TTL {
            return None;
        }
        Some(entry.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingConnections {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            id: 1,
            owner_id: 1,
            name: "dev".into(),
            host: "example.org".into(),
            port: 22,
            username: "alice".into(),
            auth_type: "password".into(),
            password_enc: Some("gcm:x".into()),
            private_key_enc: None,
            passphrase_enc: None,
            remember_password: true,
            description: None,
            group: None,
            config_json: None,
            sort_order: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_claim_is_single_use() {
        let pending = PendingConnections::new();
        let id = pending.insert(descriptor());
        assert!(pending.claim(&id).is_some());
        assert!(pending.claim(&id).is_none());
    }

    #[test]
    fn test_unknown_id() {
        let pending = PendingConnections::new();
        assert!(pending.claim("nope").is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let pending = PendingConnections::new();
        let a = pending.insert(descriptor());
        let b = pending.insert(descriptor());
        assert_ne!(a, b);
        assert_eq!(pending.len(), 2);
    }
}
