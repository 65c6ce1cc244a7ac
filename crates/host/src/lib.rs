// termgate-host library
// Browser-to-SSH gateway built on tokio and tokio-tungstenite

// Core gateway modules
pub mod session;
pub mod shell;
pub mod sftp;
pub mod ws;

// Monitoring fan-out channel
pub mod monitor;

// Credential vault and admission
pub mod pending;
pub mod tokens;
pub mod totp;
pub mod vault;

// Configuration
pub mod config;

// REST API
pub mod api;

// Persistence
pub mod store;

// Per-session counters and latency samples
pub mod metrics;

use std::sync::Arc;

/// Everything the gateway endpoints share. Constructed once at startup and
/// passed down explicitly; there are no ambient globals.
pub struct Gateway {
    pub config: config::Config,
    pub store: store::Store,
    pub vault: vault::Vault,
    pub tokens: tokens::TokenCache,
    pub pending: pending::PendingConnections,
    pub monitor: monitor::MonitorHub,
    pub sessions: session::SessionRegistry,
}

impl Gateway {
    pub fn new(config: config::Config, store: store::Store, vault: vault::Vault) -> Arc<Self> {
        let tokens = tokens::TokenCache::new(
            vault.token_key(),
            std::time::Duration::from_secs(config.auth.token_ttl_sec),
        );
        Arc::new(Self {
            config,
            store,
            vault,
            tokens,
            pending: pending::PendingConnections::new(),
            monitor: monitor::MonitorHub::new(),
            sessions: session::SessionRegistry::new(),
        })
    }
}
