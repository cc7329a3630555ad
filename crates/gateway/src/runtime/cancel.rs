//! Per-Run cancellation flags (spec §4.2, §5: "cooperative, idempotent, via
//! a per-Run boolean flag observed at suspension points").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of live cancellation tokens, keyed by Run id. Entries are
/// removed once a Run reaches a terminal state.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, run_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(run_id.to_string(), token.clone());
        token
    }

    /// Flip the flag for a live Run. Returns `false` if the Run is unknown
    /// (already terminal or never registered) — callers treat that as a
    /// no-op rather than an error (spec §5: cancellation is idempotent).
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.tokens.lock().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.tokens.lock().contains_key(run_id)
    }

    pub fn remove(&self, run_id: &str) {
        self.tokens.lock().remove(run_id);
    }
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_not_cancelled() {
        assert!(!CancelToken::new().is_cancelled());
    }

    #[test]
    fn cancel_flips_flag() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn map_cancel_returns_false_for_unknown_run() {
        let map = CancelMap::new();
        assert!(!map.cancel("run_missing"));
    }

    #[test]
    fn map_register_then_cancel_flips_the_registered_token() {
        let map = CancelMap::new();
        let token = map.register("run_1");
        assert!(map.cancel("run_1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn remove_forgets_the_run() {
        let map = CancelMap::new();
        map.register("run_1");
        map.remove("run_1");
        assert!(!map.is_running("run_1"));
        assert!(!map.cancel("run_1"));
    }
}
