//! Restaurant directory data: entity types and the lookups the page performs on them.

mod cache;
pub mod queries;
pub mod types;

pub use types::{Restaurant, Review, ReviewEdit};
