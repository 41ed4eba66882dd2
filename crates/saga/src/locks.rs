use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use saga_store::SagaId;
use tokio::sync::OwnedMutexGuard;

/// Prune dead entries once the map grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-saga async locks.
///
/// Events for the same saga are applied one at a time; events for different
/// sagas never wait on each other. Entries are dropped once no guard or
/// waiter holds them.
#[derive(Clone, Default)]
pub struct SagaLocks {
    locks: Arc<Mutex<HashMap<SagaId, Weak<tokio::sync::Mutex<()>>>>>,
}

impl SagaLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to one saga.
    pub async fn lock(&self, saga_id: SagaId) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, lock| lock.strong_count() > 0);
            }
            match locks.get(&saga_id).and_then(Weak::upgrade) {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(saga_id, Arc::downgrade(&mutex));
                    mutex
                }
            }
        };
        mutex.lock_owned().await
    }

    /// Number of tracked entries, live or not yet pruned.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
