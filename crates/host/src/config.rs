//! Configuration system for termgate
//!
//! Defaults, then ~/.config/termgate/config.toml (simple key = value lines),
//! then `TERMGATE_*` environment variables. Every limit from the deployment
//! surface is enumerated here so operators never patch code to tune one.

use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub db_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            http_port: 8080,
            ws_port: 9001,
            db_path: None,
        }
    }
}

/// Token issuance configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub token_ttl_sec: u64,
    /// Key material for the vault and token signer. Required in production;
    /// an ephemeral key is generated (with a warning) when absent.
    pub secret_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_sec: 172_800,
            secret_key: None,
        }
    }
}

/// SSH connection lifecycle configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub connect_timeout_ms: u64,
    pub max_retry: u32,
    pub reconnect_delay_ms: u64,
    pub keepalive_interval_ms: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            max_retry: 3,
            reconnect_delay_ms: 1_000,
            keepalive_interval_ms: 15_000,
        }
    }
}

/// SFTP transfer limits
#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub max_upload_size: u64,
    pub max_file_size: u64,
    pub max_folder_size: u64,
    pub compression_level: u32,
    pub transfer_timeout_ms: u64,
    pub chunk_size: usize,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 100 * 1024 * 1024,
            max_file_size: 100 * 1024 * 1024,
            max_folder_size: 500 * 1024 * 1024,
            compression_level: 6,
            transfer_timeout_ms: 300_000,
            chunk_size: 1024 * 1024,
        }
    }
}

/// Full application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub ssh: SshConfig,
    pub sftp: SftpConfig,
}

impl Config {
    /// Load configuration: defaults, config file, environment.
    pub fn load() -> Self {
        let mut config = Self::load_from_path(&Self::default_config_path()).unwrap_or_default();
        config.apply_env();
        config
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("termgate")
            .join("config.toml")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ssh.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.ssh.keepalive_interval_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.sftp.transfer_timeout_ms)
    }

    /// Load from specific path (simple key=value parsing)
    pub fn load_from_path(path: &PathBuf) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let mut config = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                config.apply_kv(key.trim(), value.trim().trim_matches('"'));
            }
        }
        Some(config)
    }

    /// Environment overrides: `TERMGATE_<OPTION>` wins over the file.
    fn apply_env(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(opt) = key.strip_prefix("TERMGATE_") {
                self.apply_kv(&opt.to_ascii_lowercase(), &value);
            }
        }
    }

    fn apply_kv(&mut self, key: &str, value: &str) {
        match key {
            "bind" => self.server.bind = value.to_string(),
            "http_port" => parse_into(value, &mut self.server.http_port),
            "ws_port" => parse_into(value, &mut self.server.ws_port),
            "db_path" => self.server.db_path = Some(PathBuf::from(value)),
            "secret_key" => self.auth.secret_key = Some(value.to_string()),
            "token_ttl_sec" => parse_into(value, &mut self.auth.token_ttl_sec),
            "connect_timeout_ms" => parse_into(value, &mut self.ssh.connect_timeout_ms),
            "max_retry" => parse_into(value, &mut self.ssh.max_retry),
            "reconnect_delay_ms" => parse_into(value, &mut self.ssh.reconnect_delay_ms),
            "keepalive_interval_ms" => parse_into(value, &mut self.ssh.keepalive_interval_ms),
            "max_upload_size" => parse_into(value, &mut self.sftp.max_upload_size),
            "max_file_size" => parse_into(value, &mut self.sftp.max_file_size),
            "max_folder_size" => parse_into(value, &mut self.sftp.max_folder_size),
            "sftp_compression_level" => parse_into(value, &mut self.sftp.compression_level),
            "sftp_transfer_timeout_ms" => parse_into(value, &mut self.sftp.transfer_timeout_ms),
            "sftp_chunk_size" => parse_into(value, &mut self.sftp.chunk_size),
            _ => {}
        }
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) {
    if let Ok(parsed) = value.parse() {
        *slot = parsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.auth.token_ttl_sec, 172_800);
        assert_eq!(config.ssh.max_retry, 3);
        assert_eq!(config.sftp.max_upload_size, 100 * 1024 * 1024);
        assert_eq!(config.sftp.compression_level, 6);
    }

    #[test]
    fn test_parse_file_values() {
        let dir = std::env::temp_dir();
        let path = dir.join("termgate_config_test.toml");
        std::fs::write(
            &path,
            "# test\n[server]\nws_port = 9100\nmax_retry = 5\nmax_folder_size = 1024\n",
        )
        .unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.server.ws_port, 9100);
        assert_eq!(config.ssh.max_retry, 5);
        assert_eq!(config.sftp.max_folder_size, 1024);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let mut config = Config::default();
        config.apply_kv("nonsense", "1");
        config.apply_kv("ws_port", "not-a-number");
        assert_eq!(config.server.ws_port, 9001);
    }
}
