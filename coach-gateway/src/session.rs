//! In-memory session store.
//!
//! Each session is a shared, lockable conversation history. The per-session
//! mutex is the exchange lock: holding it while a generation call is in
//! flight serializes concurrent exchanges on the same session, so a history
//! can never interleave turns from two exchanges.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::gemini::Content;

/// A session's conversation history behind its exchange lock.
pub type SessionHistory = Arc<Mutex<Vec<Content>>>;

/// Process-local session registry. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionHistory>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the history for a session, creating it atomically on first use.
    ///
    /// Concurrent callers with the same id always receive handles to the same
    /// history.
    pub async fn history(&self, session_id: &str) -> SessionHistory {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Acquire the exchange lock for a session, creating it on first use.
    ///
    /// The returned guard is always for the handle currently registered in
    /// the map. A reset can remove a history while a caller is queued on its
    /// lock; acquiring such an orphaned lock and mutating through it would
    /// commit turns nothing can ever read back, so the acquisition is
    /// re-checked and retried against a fresh history instead.
    pub async fn lock_history(&self, session_id: &str) -> OwnedMutexGuard<Vec<Content>> {
        loop {
            let history = self.history(session_id).await;
            let guard = history.clone().lock_owned().await;
            let registered = self.sessions.read().await.get(session_id).cloned();
            if let Some(registered) = registered {
                if Arc::ptr_eq(&registered, &history) {
                    return guard;
                }
            }
        }
    }

    /// Drop a session's history. Unknown ids are a no-op.
    ///
    /// Waits for any in-flight exchange on the session to finish first, so an
    /// exchange never commits into a history that was reset underneath it.
    pub async fn reset(&self, session_id: &str) {
        let existing = self.sessions.read().await.get(session_id).cloned();
        if let Some(history) = existing {
            let _guard = history.lock().await;
            self.sessions.write().await.remove(session_id);
        }
    }

    /// Whether a session currently exists.
    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
