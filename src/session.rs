use std::collections::HashMap;

use tokio::sync::Mutex;

/// Transient wizard state keyed by owner user id. Starting a session replaces
/// whatever that owner had before; nothing is persisted.
pub struct SessionStore<S> {
    sessions: Mutex<HashMap<i64, S>>,
}

impl<S: Clone> SessionStore<S> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(&self, owner_id: i64, session: S) {
        self.sessions.lock().await.insert(owner_id, session);
    }

    pub async fn get(&self, owner_id: i64) -> Option<S> {
        self.sessions.lock().await.get(&owner_id).cloned()
    }

    /// Stores an updated session. Same as `start`, named for the mutate path.
    pub async fn put(&self, owner_id: i64, session: S) {
        self.start(owner_id, session).await;
    }

    pub async fn end(&self, owner_id: i64) -> Option<S> {
        self.sessions.lock().await.remove(&owner_id)
    }
}

impl<S: Clone> Default for SessionStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStore;

    #[tokio::test]
    async fn start_replaces_previous_session() {
        let store = SessionStore::new();
        store.start(1, "first").await;
        store.start(1, "second").await;
        assert_eq!(store.get(1).await, Some("second"));
        assert_eq!(store.get(2).await, None);
    }

    #[tokio::test]
    async fn end_discards_session() {
        let store = SessionStore::new();
        store.start(7, 3u8).await;
        assert_eq!(store.get(7).await, Some(3));
        assert_eq!(store.end(7).await, Some(3));
        assert_eq!(store.get(7).await, None);
        assert_eq!(store.end(7).await, None);
    }
}
