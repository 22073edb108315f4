//! Optimistic writes and the pending mutation queue.
//!
//! A write is applied to the local store first, then sent to the network. If
//! the network can't be reached the write is queued and the page gets the
//! locally applied data back as if the server had accepted it.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{Collection, EntityId, EntityStorage};
use crate::directory::ReviewEdit;
use crate::fetch::{Request, Response};
use crate::locks::KeyedLocks;
use crate::network::Network;
use crate::router::DataRequest;
use crate::state::WorkerState;

/// A write against the data API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
  /// `POST /{collection}`
  Create { collection: Collection, record: Value },
  /// `PUT /restaurants/{id}/?is_favorite={bool}`
  UpdateFavorite { id: EntityId, is_favorite: bool },
  /// `PUT /reviews/{id}`
  UpdateReview { id: EntityId, edit: ReviewEdit },
  /// `DELETE /{collection}/{id}`
  Delete { collection: Collection, id: EntityId },
}

impl Operation {
  /// Work out which write a data request is.
  ///
  /// Creates without an id get one from the current timestamp so the record can
  /// be stored locally before the server has seen it.
  pub fn classify(data: &DataRequest, request: &Request) -> Result<Self> {
    let require_id = || {
      data
        .id
        .clone()
        .ok_or_else(|| eyre!("{} {} needs an entity id", data.method, request.url))
    };

    match data.method {
      Method::POST => {
        let mut record = match request.json_body::<Value>()? {
          Value::Object(map) => map,
          other => return Err(eyre!("Expected a JSON object to create, got {}", other)),
        };

        if EntityId::of(&Value::Object(record.clone())).is_none() {
          record.insert("id".into(), Value::from(Utc::now().timestamp_millis()));
        }
        if data.collection == Collection::Reviews {
          let now = Value::from(Utc::now().timestamp_millis());
          record.entry("createdAt").or_insert_with(|| now.clone());
          record.entry("updatedAt").or_insert(now);
        }

        Ok(Self::Create {
          collection: data.collection,
          record: Value::Object(record),
        })
      }
      Method::PUT if data.has_query => match (data.collection, data.favorite) {
        (Collection::Restaurants, Some(is_favorite)) => Ok(Self::UpdateFavorite {
          id: require_id()?,
          is_favorite,
        }),
        _ => Err(eyre!("Unsupported update {}", request.url)),
      },
      Method::PUT => match data.collection {
        Collection::Reviews => {
          let mut edit: ReviewEdit = request.json_body()?;
          if edit.updated_at.is_none() {
            edit.updated_at = Some(Value::from(Utc::now().timestamp_millis()));
          }
          Ok(Self::UpdateReview {
            id: require_id()?,
            edit,
          })
        }
        Collection::Restaurants => Err(eyre!("Unsupported update {}", request.url)),
      },
      Method::DELETE => Ok(Self::Delete {
        collection: data.collection,
        id: require_id()?,
      }),
      _ => Err(eyre!("{} is not a write", data.method)),
    }
  }

  pub fn method(&self) -> Method {
    match self {
      Self::Create { .. } => Method::POST,
      Self::UpdateFavorite { .. } | Self::UpdateReview { .. } => Method::PUT,
      Self::Delete { .. } => Method::DELETE,
    }
  }

  pub fn collection(&self) -> Collection {
    match self {
      Self::Create { collection, .. } | Self::Delete { collection, .. } => *collection,
      Self::UpdateFavorite { .. } => Collection::Restaurants,
      Self::UpdateReview { .. } => Collection::Reviews,
    }
  }

  pub fn entity_id(&self) -> Option<EntityId> {
    match self {
      Self::Create { record, .. } => EntityId::of(record),
      Self::UpdateFavorite { id, .. } | Self::UpdateReview { id, .. } | Self::Delete { id, .. } => {
        Some(id.clone())
      }
    }
  }

  /// Key under which writes to the same entity are serialized.
  fn lock_key(&self) -> String {
    match self.entity_id() {
      Some(id) => format!("{}/{}", self.collection(), id),
      None => self.collection().to_string(),
    }
  }

  /// Rebuild the network request for this write.
  pub fn to_request(&self, api_origin: &Url) -> Result<Request> {
    let path = match self {
      Self::Create { collection, .. } => collection.to_string(),
      Self::UpdateFavorite { id, is_favorite } => {
        format!("restaurants/{}/?is_favorite={}", id, is_favorite)
      }
      Self::UpdateReview { id, .. } => format!("reviews/{}", id),
      Self::Delete { collection, id } => format!("{}/{}", collection, id),
    };
    let url = api_origin
      .join(&path)
      .map_err(|e| eyre!("Failed to build URL for {}: {}", path, e))?;

    let request = Request::new(self.method(), url);
    match self {
      Self::Create { record, .. } => request.with_json(record),
      Self::UpdateReview { edit, .. } => request.with_json(edit),
      Self::UpdateFavorite { .. } | Self::Delete { .. } => Ok(request),
    }
  }
}

/// A write that is waiting for the network.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
  pub queue_id: i64,
  pub operation: Operation,
}

impl PendingMutation {
  pub fn method(&self) -> Method {
    self.operation.method()
  }

  /// Collection path the write targets, e.g. `restaurants`.
  pub fn path(&self) -> &'static str {
    self.operation.collection().as_str()
  }
}

/// Applies writes locally and queues the ones the network didn't take.
pub struct MutationQueue<S: EntityStorage> {
  storage: Arc<S>,
  state: Arc<WorkerState>,
  locks: KeyedLocks,
}

impl<S: EntityStorage> MutationQueue<S> {
  pub fn new(storage: Arc<S>, state: Arc<WorkerState>) -> Self {
    Self {
      storage,
      state,
      locks: KeyedLocks::new(),
    }
  }

  /// Apply a write locally, then forward the original request.
  ///
  /// Any network response is returned as is. On a transport failure the write
  /// is queued and a synthetic success carrying the local result is returned.
  pub async fn apply<N: Network>(
    &self,
    operation: Operation,
    request: Request,
    network: &N,
  ) -> Result<Response> {
    // Held until the write is either confirmed or queued so queue order per entity
    // matches apply order.
    let _guard = self.locks.lock(&operation.lock_key()).await?;

    let local = self.apply_local(&operation)?;

    match network.fetch(request).await {
      Ok(response) => {
        debug!(
          method = %operation.method(),
          collection = %operation.collection(),
          status = %response.status,
          "write reached the network"
        );
        // TODO: copy a server-assigned id back onto locally created records
        Ok(response)
      }
      Err(e) => {
        let queue_id = self.state.next_queue_id(self.storage.as_ref())?;
        warn!(queue_id, error = %e, "network unavailable, queueing {} {}", operation.method(), operation.collection());

        let status = match operation {
          Operation::Create { .. } => StatusCode::CREATED,
          _ => StatusCode::OK,
        };
        self.storage.enqueue(&PendingMutation {
          queue_id,
          operation,
        })?;

        Ok(
          Response::json(status, &local)?
            .with_header("x-restview-source", "queued")
            .with_header("x-restview-queue-id", &queue_id.to_string()),
        )
      }
    }
  }

  /// Apply a write to the local store and return the resulting data.
  fn apply_local(&self, operation: &Operation) -> Result<Value> {
    match operation {
      Operation::Create { collection, record } => {
        self.storage.put(*collection, record)?;
        Ok(record.clone())
      }
      Operation::UpdateFavorite { id, is_favorite } => {
        match self.storage.get(Collection::Restaurants, id)? {
          Some(mut record) => {
            if let Some(map) = record.as_object_mut() {
              map.insert("is_favorite".into(), Value::Bool(*is_favorite));
            }
            self.storage.put(Collection::Restaurants, &record)?;
            Ok(record)
          }
          None => {
            warn!(%id, "favorite toggled on a restaurant that isn't stored locally");
            Ok(json!({ "id": id, "is_favorite": is_favorite }))
          }
        }
      }
      Operation::UpdateReview { id, edit } => match self.storage.get(Collection::Reviews, id)? {
        Some(mut record) => {
          if let Some(map) = record.as_object_mut() {
            edit.apply_to(map);
          }
          self.storage.put(Collection::Reviews, &record)?;
          Ok(record)
        }
        None => {
          warn!(%id, "edit of a review that isn't stored locally");
          let mut map = serde_json::Map::new();
          map.insert("id".into(), id.to_json());
          edit.apply_to(&mut map);
          Ok(Value::Object(map))
        }
      },
      Operation::Delete { collection, id } => {
        if !self.storage.delete(*collection, id)? {
          debug!(%collection, %id, "delete of an entity that wasn't stored locally");
        }
        Ok(json!({ "id": id }))
      }
    }
  }
}
