//! Caching implementations for directory types.

use crate::cache::{Cacheable, Collection, EntityId};

use super::types::{Restaurant, Review};

impl Cacheable for Restaurant {
  fn id(&self) -> &EntityId {
    &self.id
  }

  fn collection() -> Collection {
    Collection::Restaurants
  }
}

impl Cacheable for Review {
  fn id(&self) -> &EntityId {
    &self.id
  }

  fn collection() -> Collection {
    Collection::Reviews
  }
}
