//! Session-scoped transfer registry
//!
//! Tracks in-flight SFTP operations, enforces the exactly-one-terminal-frame
//! guarantee per operation id, and implements cancellation: cancelling marks
//! the id, fires the operation's cancellation token (tearing down whatever
//! stream it guards), and suppresses any frame that arrives late from the
//! pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// What kind of transfer an operation id names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    FileDownload,
    FolderDownload,
    Metadata,
}

struct ActiveTransfer {
    kind: TransferKind,
    cancel: CancellationToken,
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A live transfer (or pending reassembly) was torn down.
    Cancelled,
    /// Nothing by that id was running.
    NotFound,
}

/// Registry of one session's transfers. Lives on the session object, so
/// operation ids can never collide across sessions.
pub struct TransferRegistry {
    active: Mutex<HashMap<String, ActiveTransfer>>,
    cancelled: Mutex<HashSet<String>>,
    finished: Mutex<HashSet<String>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashSet::new()),
            finished: Mutex::new(HashSet::new()),
        }
    }

    /// Register a transfer and get its cancellation token. Returns `None`
    /// when the id is already live or already saw its terminal frame.
    pub fn register(&self, operation_id: &str, kind: TransferKind) -> Option<CancellationToken> {
        if self.finished.lock().unwrap().contains(operation_id)
            || self.cancelled.lock().unwrap().contains(operation_id)
        {
            return None;
        }
        let mut active = self.active.lock().unwrap();
        if active.contains_key(operation_id) {
            return None;
        }
        let token = CancellationToken::new();
        active.insert(
            operation_id.to_string(),
            ActiveTransfer {
                kind,
                cancel: token.clone(),
            },
        );
        Some(token)
    }

    pub fn kind(&self, operation_id: &str) -> Option<TransferKind> {
        self.active
            .lock()
            .unwrap()
            .get(operation_id)
            .map(|t| t.kind)
    }

    /// Claim the right to emit the terminal frame for an operation. True at
    /// most once per id, and never after cancellation.
    pub fn try_finish(&self, operation_id: &str) -> bool {
        if self.cancelled.lock().unwrap().contains(operation_id) {
            return false;
        }
        if !self.finished.lock().unwrap().insert(operation_id.to_string()) {
            return false;
        }
        self.active.lock().unwrap().remove(operation_id);
        true
    }

    /// True once the id has been cancelled; the session writer consults this
    /// to drop late frames.
    pub fn is_cancelled(&self, operation_id: &str) -> bool {
        self.cancelled.lock().unwrap().contains(operation_id)
    }

    /// Cancel one operation: mark it, fire its token, drop it from the
    /// active set. `had_reassembly` lets the upload path count a pending
    /// reassembly buffer as cancellable work even before any stream opened.
    pub fn cancel(&self, operation_id: &str, had_reassembly: bool) -> CancelOutcome {
        let entry = self.active.lock().unwrap().remove(operation_id);
        let known = entry.is_some() || had_reassembly;
        if !known {
            return CancelOutcome::NotFound;
        }
        self.cancelled
            .lock()
            .unwrap()
            .insert(operation_id.to_string());
        if let Some(entry) = entry {
            entry.cancel.cancel();
        }
        CancelOutcome::Cancelled
    }

    /// Tear down everything (session close).
    pub fn abort_all(&self) {
        let mut active = self.active.lock().unwrap();
        let mut cancelled = self.cancelled.lock().unwrap();
        for (id, entry) in active.drain() {
            entry.cancel.cancel();
            cancelled.insert(id);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_exactly_once() {
        let reg = TransferRegistry::new();
        reg.register("op", TransferKind::Upload).unwrap();
        assert!(reg.try_finish("op"));
        assert!(!reg.try_finish("op"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let reg = TransferRegistry::new();
        assert!(reg.register("op", TransferKind::Upload).is_some());
        assert!(reg.register("op", TransferKind::Upload).is_none());
    }

    #[test]
    fn test_finished_id_cannot_reregister() {
        let reg = TransferRegistry::new();
        reg.register("op", TransferKind::Metadata).unwrap();
        assert!(reg.try_finish("op"));
        assert!(reg.register("op", TransferKind::Metadata).is_none());
    }

    #[test]
    fn test_cancel_fires_token_and_suppresses_terminal() {
        let reg = TransferRegistry::new();
        let token = reg.register("op", TransferKind::FileDownload).unwrap();
        assert_eq!(reg.cancel("op", false), CancelOutcome::Cancelled);
        assert!(token.is_cancelled());
        assert!(reg.is_cancelled("op"));
        // A success racing in after the cancel is dropped
        assert!(!reg.try_finish("op"));
    }

    #[test]
    fn test_cancel_unknown_op() {
        let reg = TransferRegistry::new();
        assert_eq!(reg.cancel("ghost", false), CancelOutcome::NotFound);
        // ...but a pending reassembly with no stream still counts
        assert_eq!(reg.cancel("ghost", true), CancelOutcome::Cancelled);
    }

    #[test]
    fn test_abort_all() {
        let reg = TransferRegistry::new();
        let t1 = reg.register("a", TransferKind::Upload).unwrap();
        let t2 = reg.register("b", TransferKind::FolderDownload).unwrap();
        reg.abort_all();
        assert!(t1.is_cancelled() && t2.is_cancelled());
        assert_eq!(reg.active_count(), 0);
        assert!(reg.is_cancelled("a") && reg.is_cancelled("b"));
    }
}
