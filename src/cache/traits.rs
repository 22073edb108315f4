//! Core traits and types for the local entity store.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The two collections mirrored from the data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
  Restaurants,
  Reviews,
}

impl Collection {
  pub const ALL: [Collection; 2] = [Collection::Restaurants, Collection::Reviews];

  /// Path segment on the data API, also the table name.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Restaurants => "restaurants",
      Self::Reviews => "reviews",
    }
  }

  pub fn from_segment(segment: &str) -> Option<Self> {
    match segment {
      "restaurants" => Some(Self::Restaurants),
      "reviews" => Some(Self::Reviews),
      _ => None,
    }
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Entity id as the API sends it: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
  Int(i64),
  Str(String),
}

impl EntityId {
  /// Parse a path or query segment, preferring the numeric form.
  pub fn parse(s: &str) -> Option<Self> {
    let s = s.trim();
    if s.is_empty() {
      return None;
    }
    Some(match s.parse::<i64>() {
      Ok(n) => Self::Int(n),
      Err(_) => Self::Str(s.to_string()),
    })
  }

  /// Read the `id` field of a JSON record.
  pub fn of(record: &Value) -> Option<Self> {
    match record.get("id")? {
      Value::Number(n) => n.as_i64().map(Self::Int),
      Value::String(s) => Self::parse(s),
      _ => None,
    }
  }

  pub fn to_json(&self) -> Value {
    match self {
      Self::Int(n) => Value::from(*n),
      Self::Str(s) => Value::from(s.as_str()),
    }
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Int(n) => write!(f, "{}", n),
      Self::Str(s) => f.write_str(s),
    }
  }
}

/// Trait for typed entities stored in a collection.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier within the collection
  fn id(&self) -> &EntityId;

  /// Collection the entity lives in
  fn collection() -> Collection;
}

/// Result of a read, with where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_store(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Store,
    }
  }

  /// Network was tried and failed; serving what the store has.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Network,
  Store,
  Offline,
}

impl CacheSource {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Store => "store",
      Self::Offline => "offline",
    }
  }
}
