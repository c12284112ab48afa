//! Persistence of destination-acknowledged state.

use crate::message::StateMessage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use uuid::Uuid;

/// Stores state messages the destination has committed.
#[async_trait]
pub trait SyncPersistence: Send + Sync + Debug {
    /// Persists one acknowledged state for a connection.
    async fn persist(&self, connection_id: Uuid, state: &StateMessage) -> anyhow::Result<()>;

    /// Flushes pending writes and releases resources.
    async fn close(&self) -> anyhow::Result<()>;
}

/// A [`SyncPersistence`] that keeps states in memory.
#[derive(Debug, Default)]
pub struct InMemorySyncPersistence {
    states: Mutex<Vec<(Uuid, StateMessage)>>,
    closed: Mutex<bool>,
}

impl InMemorySyncPersistence {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every persisted state in order.
    #[must_use]
    pub fn states(&self) -> Vec<(Uuid, StateMessage)> {
        self.states.lock().clone()
    }

    /// Returns whether `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl SyncPersistence for InMemorySyncPersistence {
    async fn persist(&self, connection_id: Uuid, state: &StateMessage) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("persistence is closed");
        }
        self.states.lock().push((connection_id, state.clone()));
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_persist_and_close() {
        let store = InMemorySyncPersistence::new();
        let connection = Uuid::new_v4();
        let state = StateMessage {
            stream: None,
            data: json!({"cursor": 1}),
        };

        store.persist(connection, &state).await.unwrap();
        assert_eq!(store.states(), vec![(connection, state.clone())]);

        store.close().await.unwrap();
        assert!(store.is_closed());
        assert!(store.persist(connection, &state).await.is_err());
    }
}
