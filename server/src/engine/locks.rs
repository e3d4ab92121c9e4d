use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per event id. Entries nobody holds or waits on are
/// dropped on the next acquire.
#[derive(Default)]
pub struct EventLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EventLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, event_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|id, lock| id == event_id || Arc::strong_count(lock) > 1);
            locks.entry(event_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_same_event_is_exclusive() {
        let locks = EventLocks::new();
        let _held = locks.acquire("evt").await;

        let blocked = timeout(Duration::from_millis(50), locks.acquire("evt")).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_different_events_do_not_contend() {
        let locks = EventLocks::new();
        let _a = locks.acquire("a").await;

        let b = timeout(Duration::from_millis(50), locks.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let locks = EventLocks::new();
        drop(locks.acquire("a").await);
        drop(locks.acquire("b").await);
        drop(locks.acquire("c").await);

        assert_eq!(locks.tracked().await, 1);
    }
}
