//! Per-name async critical sections

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A name's mutex plus the number of callers holding or waiting for it.
#[derive(Debug, Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

type LockMap = HashMap<String, Slot>;

/// Keyed async mutex. Entries exist only while someone holds or waits for a name.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    ///
    /// Dropping the returned future before it completes releases the
    /// caller's claim on the entry.
    pub async fn acquire(&self, name: &str) -> NameGuard {
        let (claim, lock) = Claim::register(&self.locks, name);
        let guard = lock.lock_owned().await;

        NameGuard { guard, claim }
    }

    /// Number of names currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

/// One caller's interest in a name, from registration until drop.
#[derive(Debug)]
struct Claim {
    name: String,
    locks: Arc<Mutex<LockMap>>,
}

impl Claim {
    fn register(locks: &Arc<Mutex<LockMap>>, name: &str) -> (Self, Arc<AsyncMutex<()>>) {
        let lock = {
            let mut map = locks.lock();
            let slot = map.entry(name.to_string()).or_default();
            slot.users += 1;
            slot.lock.clone()
        };

        let claim = Claim {
            name: name.to_string(),
            locks: locks.clone(),
        };
        (claim, lock)
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut map = self.locks.lock();
        if let Some(slot) = map.get_mut(&self.name) {
            slot.users -= 1;
            if slot.users == 0 {
                map.remove(&self.name);
            }
        }
    }
}

/// Exclusive hold on one name. Owned, so it can move into a blocking worker.
#[derive(Debug)]
pub struct NameGuard {
    // Field order matters: the mutex is released before the claim can drop the entry.
    guard: OwnedMutexGuard<()>,
    claim: Claim,
}

impl NameGuard {
    pub fn name(&self) -> &str {
        &self.claim.name
    }
}
