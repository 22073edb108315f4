//! Store-first read path with network fallback and write-back.

use color_eyre::Result;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::EntityStorage;
use super::traits::{CacheResult, Collection, EntityId};
use crate::state::WorkerState;

/// Sits between data reads and the network.
///
/// Reads are answered from the local store when it can, and anything fetched
/// from the network is written back so the next read (or the next offline
/// visit) can be served locally.
pub struct CacheLayer<S: EntityStorage> {
  storage: Arc<S>,
  state: Arc<WorkerState>,
}

impl<S: EntityStorage> CacheLayer<S> {
  pub fn new(storage: Arc<S>, state: Arc<WorkerState>) -> Self {
    Self { storage, state }
  }

  /// Read a single entity.
  ///
  /// A local hit never touches the network. A detail page addressed only by
  /// its referrer fetches the whole collection, which counts as a bulk load.
  pub async fn fetch_one<F, Fut>(
    &self,
    collection: Collection,
    id: &EntityId,
    fetcher: F,
  ) -> Result<CacheResult<Value>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>>,
  {
    if let Some(record) = self.storage.get(collection, id)? {
      debug!(%collection, %id, "served from store");
      return Ok(CacheResult::from_store(record));
    }

    let data = fetcher().await?;
    self.write_back(collection, &data)?;
    if data.is_array() {
      self.state.mark_init_complete(self.storage.as_ref(), collection)?;
    }
    Ok(CacheResult::from_network(data))
  }

  /// Read a whole collection, or the records whose `field` equals `value`.
  ///
  /// Once the collection has been bulk-loaded it is served from the store. The
  /// first unfiltered network read marks it loaded. If the network can't be
  /// reached, whatever the store holds is returned instead.
  pub async fn fetch_list<F, Fut>(
    &self,
    collection: Collection,
    filter: Option<(&str, &EntityId)>,
    fetcher: F,
  ) -> Result<CacheResult<Value>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>>,
  {
    let all = self.storage.get_all(collection)?;
    let hydrated = self.state.init_complete(collection) && !all.is_empty();
    let local: Vec<Value> = match filter {
      Some((field, value)) => all
        .into_iter()
        .filter(|r| field_matches(r, field, value))
        .collect(),
      None => all,
    };

    if hydrated {
      debug!(%collection, count = local.len(), "served from store");
      return Ok(CacheResult::from_store(Value::Array(local)));
    }

    match fetcher().await {
      Ok(data) => {
        self.write_back(collection, &data)?;
        if filter.is_none() && data.is_array() {
          self
            .state
            .mark_init_complete(self.storage.as_ref(), collection)?;
        }
        Ok(CacheResult::from_network(data))
      }
      Err(e) if !local.is_empty() => {
        warn!(%collection, error = %e, "network read failed, serving {} stored records", local.len());
        Ok(CacheResult::offline(Value::Array(local)))
      }
      Err(e) => Err(e),
    }
  }

  fn write_back(&self, collection: Collection, data: &Value) -> Result<()> {
    match data {
      Value::Array(records) => {
        let stored = self.storage.put_all(collection, records)?;
        debug!(%collection, stored, "wrote back network records");
      }
      Value::Object(_) if EntityId::of(data).is_some() => self.storage.put(collection, data)?,
      _ => debug!(%collection, "network payload has no id, not stored"),
    }
    Ok(())
  }
}

fn field_matches(record: &Value, field: &str, value: &EntityId) -> bool {
  match record.get(field) {
    Some(Value::Number(n)) => n.as_i64().map(EntityId::Int).as_ref() == Some(value),
    Some(Value::String(s)) => EntityId::parse(s).as_ref() == Some(value),
    _ => false,
  }
}
