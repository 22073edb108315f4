//! Lookups over the locally stored directory.
//!
//! These mirror what the listing and detail pages ask for, so the same answers
//! are available from the command line while offline.

use crate::cache::{Cacheable, EntityId};

use super::types::{Restaurant, Review};

/// Filter value meaning "don't filter on this field".
pub const ALL: &str = "all";

/// Restaurants matching a cuisine and a neighborhood. Either may be [`ALL`].
pub fn by_cuisine_and_neighborhood<'a>(
  restaurants: &'a [Restaurant],
  cuisine: &str,
  neighborhood: &str,
) -> Vec<&'a Restaurant> {
  restaurants
    .iter()
    .filter(|r| cuisine == ALL || r.cuisine_type == cuisine)
    .filter(|r| neighborhood == ALL || r.neighborhood == neighborhood)
    .collect()
}

pub fn by_id<'a>(restaurants: &'a [Restaurant], id: &EntityId) -> Option<&'a Restaurant> {
  let key = id.to_string();
  restaurants.iter().find(|r| r.id().to_string() == key)
}

/// Distinct neighborhoods in first-seen order.
pub fn neighborhoods(restaurants: &[Restaurant]) -> Vec<&str> {
  unique(restaurants.iter().map(|r| r.neighborhood.as_str()))
}

/// Distinct cuisines in first-seen order.
pub fn cuisines(restaurants: &[Restaurant]) -> Vec<&str> {
  unique(restaurants.iter().map(|r| r.cuisine_type.as_str()))
}

fn unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
  let mut seen = Vec::new();
  for v in values {
    if !v.is_empty() && !seen.contains(&v) {
      seen.push(v);
    }
  }
  seen
}

pub fn favorites(restaurants: &[Restaurant]) -> Vec<&Restaurant> {
  restaurants.iter().filter(|r| r.is_favorite).collect()
}

/// Reviews written for one restaurant.
pub fn reviews_for_restaurant<'a>(reviews: &'a [Review], restaurant_id: &EntityId) -> Vec<&'a Review> {
  let key = restaurant_id.to_string();
  reviews
    .iter()
    .filter(|r| r.restaurant_id.to_string() == key)
    .collect()
}

/// Relative URL of a restaurant's detail page.
pub fn url_for_restaurant(restaurant: &Restaurant) -> String {
  format!("./restaurant.html?id={}", restaurant.id)
}

/// Relative URL of a restaurant's photograph, falling back to its id.
pub fn image_url_for_restaurant(restaurant: &Restaurant) -> String {
  match restaurant.photograph.as_deref() {
    Some(photo) if !photo.is_empty() => format!("img/{}", photo),
    _ => format!("img/{}", restaurant.id),
  }
}
