//! Runtime state shared by every handler of the worker.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::cache::{Collection, EntityStorage};

/// Flags and counters that outlive a single request.
///
/// Loaded once from storage when the worker starts and cleared only by a full
/// reinstall.
#[derive(Debug)]
pub struct WorkerState {
  restaurants_hydrated: AtomicBool,
  reviews_hydrated: AtomicBool,
  next_queue_id: Mutex<i64>,
}

impl WorkerState {
  pub fn load<S: EntityStorage>(storage: &S) -> Result<Self> {
    let hydrated = |c: Collection| -> Result<bool> {
      Ok(storage.get_meta(&init_key(c))?.as_deref() == Some("true"))
    };

    // Databases written before the counter existed only have the queue
    let stored = storage
      .get_meta(NEXT_QUEUE_ID_KEY)?
      .and_then(|v| v.parse::<i64>().ok())
      .unwrap_or(1);
    let next = storage.max_queue_id()?.map_or(stored, |max| stored.max(max + 1));

    Ok(Self {
      restaurants_hydrated: AtomicBool::new(hydrated(Collection::Restaurants)?),
      reviews_hydrated: AtomicBool::new(hydrated(Collection::Reviews)?),
      next_queue_id: Mutex::new(next),
    })
  }

  fn flag(&self, collection: Collection) -> &AtomicBool {
    match collection {
      Collection::Restaurants => &self.restaurants_hydrated,
      Collection::Reviews => &self.reviews_hydrated,
    }
  }

  /// Whether the collection has been bulk-loaded from the network.
  pub fn init_complete(&self, collection: Collection) -> bool {
    self.flag(collection).load(Ordering::SeqCst)
  }

  pub fn mark_init_complete<S: EntityStorage>(&self, storage: &S, collection: Collection) -> Result<()> {
    if !self.flag(collection).swap(true, Ordering::SeqCst) {
      storage.set_meta(&init_key(collection), "true")?;
    }
    Ok(())
  }

  /// Reserve the next queue id and persist the counter past it.
  pub fn next_queue_id<S: EntityStorage>(&self, storage: &S) -> Result<i64> {
    let mut next = self
      .next_queue_id
      .lock()
      .map_err(|e| eyre!("Queue counter lock poisoned: {}", e))?;
    let id = *next;
    storage.set_meta(NEXT_QUEUE_ID_KEY, &(id + 1).to_string())?;
    *next = id + 1;
    Ok(id)
  }

  /// Forget everything; used after the store has been wiped.
  pub fn reset(&self) {
    for collection in Collection::ALL {
      self.flag(collection).store(false, Ordering::SeqCst);
    }
    match self.next_queue_id.lock() {
      Ok(mut next) => *next = 1,
      Err(poisoned) => *poisoned.into_inner() = 1,
    }
  }
}

const NEXT_QUEUE_ID_KEY: &str = "next_queue_id";

fn init_key(collection: Collection) -> String {
  format!("init_complete.{}", collection)
}
