//! Per-key async locks.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Hands out one async lock per key.
///
/// Holders of different keys never wait on each other; holders of the same key
/// run one at a time in arrival order.
#[derive(Default)]
pub struct KeyedLocks {
  locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Releases the key when dropped.
pub struct KeyGuard {
  _permit: OwnedSemaphorePermit,
}

impl KeyedLocks {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn lock(&self, key: &str) -> Result<KeyGuard> {
    let semaphore = {
      let mut locks = self.locks.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      // Forget keys nobody holds so the map doesn't grow with every id ever touched
      locks.retain(|_, s| Arc::strong_count(s) > 1);
      Arc::clone(
        locks
          .entry(key.to_string())
          .or_insert_with(|| Arc::new(Semaphore::new(1))),
      )
    };

    let permit = semaphore
      .acquire_owned()
      .await
      .map_err(|e| eyre!("Lock for {} closed: {}", key, e))?;

    Ok(KeyGuard { _permit: permit })
  }
}
