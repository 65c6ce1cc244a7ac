//! SSH client layer for termgate
//!
//! Wraps a blocking `ssh2` session behind a mutex so the async host can share
//! one SSH connection between the interactive shell pump, exec streams and
//! SFTP transfers. All libssh2 calls go through short critical sections; bulk
//! reads use non-blocking mode so no caller can starve the others.

pub mod client;
pub mod error;

pub use client::{ExecStream, RemoteFile, SshConnection};
pub use error::SshError;

use secrecy::SecretString;

/// Where to connect.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl std::fmt::Display for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// How to authenticate. Key auth is preferred when a key is present;
/// an unusable key fails distinctly instead of silently falling back to
/// password.
pub enum AuthMethod {
    Password(SecretString),
    Key {
        private_key: SecretString,
        passphrase: Option<SecretString>,
    },
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("AuthMethod::Password(..)"),
            Self::Key { .. } => f.write_str("AuthMethod::Key(..)"),
        }
    }
}

/// Remote file metadata as reported by SFTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStat {
    pub is_file: bool,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    /// Unix seconds; 0 when the server does not report one.
    pub mtime: u64,
    /// POSIX mode bits (permission part only).
    pub permissions: u32,
}

impl FileStat {
    /// Wire-facing entry kind: `file`, `dir`, `symlink` or `other`.
    pub fn kind(&self) -> &'static str {
        if self.is_symlink {
            "symlink"
        } else if self.is_dir {
            "dir"
        } else if self.is_file {
            "file"
        } else {
            "other"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        let t = SshTarget {
            host: "example.org".into(),
            port: 2222,
            username: "alice".into(),
        };
        assert_eq!(t.to_string(), "alice@example.org:2222");
    }

    #[test]
    fn test_auth_debug_hides_secrets() {
        let auth = AuthMethod::Password(SecretString::new("hunter2".into()));
        let s = format!("{auth:?}");
        assert!(!s.contains("hunter2"));
    }

    #[test]
    fn test_stat_kind() {
        let dir = FileStat {
            is_dir: true,
            ..FileStat::default()
        };
        assert_eq!(dir.kind(), "dir");
        let link = FileStat {
            is_symlink: true,
            is_file: true,
            ..FileStat::default()
        };
        assert_eq!(link.kind(), "symlink");
        assert_eq!(FileStat::default().kind(), "other");
    }
}
