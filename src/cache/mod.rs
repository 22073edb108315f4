//! Local persistence for the worker.
//!
//! This module holds everything the worker keeps on disk:
//! - The two mirrored API collections (restaurants, reviews), keyed by id
//! - The pending mutation queue and worker flags
//! - Versioned static asset namespaces
//!
//! `CacheLayer` implements the store-first read path on top of it.

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{AssetStorage, CachedAsset, EntityStorage, SqliteStorage};
pub use traits::{CacheResult, Cacheable, Collection, EntityId};
