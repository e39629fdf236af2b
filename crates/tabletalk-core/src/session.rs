use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

/// One completed question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// In-memory keyed store of dialogue histories.
///
/// Sessions are created lazily on first access and live until explicitly
/// cleared; process restart loses everything. Appends on the same session
/// are serialized through a per-session lock, so concurrent exchanges on
/// distinct sessions never block each other.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Vec<Turn>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn handle(&self, session_id: &str) -> Arc<Mutex<Vec<Turn>>> {
        if let Some(handle) = self.sessions.read().await.get(session_id) {
            return Arc::clone(handle);
        }
        let mut map = self.sessions.write().await;
        Arc::clone(map.entry(session_id.to_string()).or_default())
    }

    /// Snapshot of the session's history, oldest first. Registers the
    /// session if it did not exist yet.
    pub async fn history(&self, session_id: &str) -> Vec<Turn> {
        let handle = self.handle(session_id).await;
        let turns = handle.lock().await;
        turns.clone()
    }

    pub async fn append(&self, session_id: &str, question: &str, answer: &str) {
        let handle = self.handle(session_id).await;
        let mut turns = handle.lock().await;
        turns.push(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
        });
    }

    /// Remove a session entirely. No-op for unknown ids.
    pub async fn clear(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_of_unseen_session_is_empty() {
        let store = SessionStore::new();
        assert!(store.history("fresh").await.is_empty());
    }

    #[tokio::test]
    async fn append_preserves_call_order() {
        let store = SessionStore::new();
        store.append("s1", "q1", "a1").await;
        store.append("s1", "q2", "a2").await;

        let history = store.history("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].question, "q1");
        assert_eq!(history[1].answer, "a2");
    }

    #[tokio::test]
    async fn clear_is_idempotent_and_irreversible() {
        let store = SessionStore::new();
        store.append("s1", "q", "a").await;

        store.clear("s1").await;
        assert!(store.history("s1").await.is_empty());

        // Clearing again, or clearing something that never existed, is fine.
        store.clear("s1").await;
        store.clear("never-seen").await;
        assert!(store.history("s1").await.is_empty());
    }

    #[tokio::test]
    async fn sessions_do_not_cross_contaminate() {
        let store = Arc::new(SessionStore::new());

        let s1 = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.append("s1", "q1", "a1").await })
        };
        let s2 = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.append("s2", "q2", "a2").await })
        };
        s1.await.unwrap();
        s2.await.unwrap();

        let h1 = store.history("s1").await;
        let h2 = store.history("s2").await;
        assert_eq!(h1, vec![Turn { question: "q1".into(), answer: "a1".into() }]);
        assert_eq!(h2, vec![Turn { question: "q2".into(), answer: "a2".into() }]);
    }

    #[tokio::test]
    async fn concurrent_appends_on_same_session_all_land() {
        let store = Arc::new(SessionStore::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .append("shared", &format!("q{i}"), &format!("a{i}"))
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.history("shared").await.len(), 32);
    }
}
