//! Classifies intercepted requests as asset or data requests.

use reqwest::Method;
use url::Url;

use crate::cache::{Collection, EntityId};
use crate::directory::types::parse_flag;
use crate::fetch::Request;

/// Where an intercepted request should be handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
  /// Static asset: versioned cache, then network
  Asset,
  /// Request against one of the mirrored API collections
  Data(DataRequest),
  /// On the API origin but outside the mirrored collections; forwarded untouched
  Passthrough,
}

/// A data API request broken into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
  pub method: Method,
  pub collection: Collection,
  /// From the path, or for restaurant reads from the referring page's `?id=`
  pub id: Option<EntityId>,
  /// `is_favorite` query parameter, present on favorite toggles
  pub favorite: Option<bool>,
  /// `restaurant_id` query parameter on review listings
  pub restaurant_id: Option<EntityId>,
  /// Whether the request carried any query string at all
  pub has_query: bool,
}

impl DataRequest {
  pub fn is_read(&self) -> bool {
    self.method == Method::GET
  }
}

/// Same scheme, host and port as the API origin.
pub fn is_api_origin(url: &Url, api_origin: &Url) -> bool {
  url.scheme() == api_origin.scheme()
    && url.host_str() == api_origin.host_str()
    && url.port_or_known_default() == api_origin.port_or_known_default()
}

/// Decide how a request is handled.
pub fn classify(request: &Request, api_origin: &Url) -> Target {
  if !is_api_origin(&request.url, api_origin) {
    return Target::Asset;
  }

  if !matches!(
    request.method,
    Method::GET | Method::POST | Method::PUT | Method::DELETE
  ) {
    return Target::Passthrough;
  }

  let segments: Vec<&str> = request
    .url
    .path_segments()
    .map(|s| s.filter(|seg| !seg.is_empty()).collect())
    .unwrap_or_default();

  let (collection, mut id) = match segments.as_slice() {
    [collection] => (Collection::from_segment(collection), None),
    [collection, id] => (Collection::from_segment(collection), EntityId::parse(id)),
    _ => (None, None),
  };

  let Some(collection) = collection else {
    return Target::Passthrough;
  };

  if id.is_none() && request.method == Method::GET && collection == Collection::Restaurants {
    id = request
      .referrer
      .as_ref()
      .and_then(|r| query_param(r, "id"))
      .and_then(|v| EntityId::parse(&v));
  }

  let favorite = query_param(&request.url, "is_favorite").and_then(|v| parse_flag(&v));
  let restaurant_id = query_param(&request.url, "restaurant_id").and_then(|v| EntityId::parse(&v));

  Target::Data(DataRequest {
    method: request.method.clone(),
    collection,
    id,
    favorite,
    restaurant_id,
    has_query: request.url.query().is_some_and(|q| !q.is_empty()),
  })
}

fn query_param(url: &Url, name: &str) -> Option<String> {
  url
    .query_pairs()
    .find(|(k, _)| k == name)
    .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn api() -> Url {
    Url::parse("http://localhost:1337/").unwrap()
  }

  fn req(method: Method, url: &str) -> Request {
    Request::new(method, Url::parse(url).unwrap())
  }

  fn data(target: Target) -> DataRequest {
    match target {
      Target::Data(d) => d,
      other => panic!("expected data request, got {:?}", other),
    }
  }

  #[test]
  fn test_other_origin_is_asset() {
    let r = req(Method::GET, "http://localhost:8000/restaurants");
    assert_eq!(classify(&r, &api()), Target::Asset);

    let r = req(Method::GET, "https://localhost:1337/restaurants");
    assert_eq!(classify(&r, &api()), Target::Asset);
  }

  #[test]
  fn test_collection_read() {
    let d = data(classify(&req(Method::GET, "http://localhost:1337/restaurants"), &api()));
    assert_eq!(d.collection, Collection::Restaurants);
    assert_eq!(d.id, None);
    assert!(d.is_read());
  }

  #[test]
  fn test_id_from_path_with_trailing_slash() {
    let d = data(classify(&req(Method::DELETE, "http://localhost:1337/reviews/12/"), &api()));
    assert_eq!(d.collection, Collection::Reviews);
    assert_eq!(d.id, Some(EntityId::Int(12)));
  }

  #[test]
  fn test_restaurant_id_from_referrer() {
    let r = req(Method::GET, "http://localhost:1337/restaurants")
      .with_referrer(Url::parse("http://localhost:8000/restaurant.html?id=3").unwrap());
    let d = data(classify(&r, &api()));
    assert_eq!(d.id, Some(EntityId::Int(3)));
  }

  #[test]
  fn test_referrer_id_ignored_for_reviews() {
    let r = req(Method::GET, "http://localhost:1337/reviews")
      .with_referrer(Url::parse("http://localhost:8000/restaurant.html?id=3").unwrap());
    let d = data(classify(&r, &api()));
    assert_eq!(d.id, None);
  }

  #[test]
  fn test_favorite_toggle() {
    let r = req(Method::PUT, "http://localhost:1337/restaurants/3/?is_favorite=true");
    let d = data(classify(&r, &api()));
    assert_eq!(d.id, Some(EntityId::Int(3)));
    assert_eq!(d.favorite, Some(true));
    assert!(d.has_query);
  }

  #[test]
  fn test_reviews_filter() {
    let r = req(Method::GET, "http://localhost:1337/reviews/?restaurant_id=7");
    let d = data(classify(&r, &api()));
    assert_eq!(d.restaurant_id, Some(EntityId::Int(7)));
    assert_eq!(d.id, None);
  }

  #[test]
  fn test_unknown_collection_passes_through() {
    let r = req(Method::GET, "http://localhost:1337/users/1");
    assert_eq!(classify(&r, &api()), Target::Passthrough);

    let r = req(Method::GET, "http://localhost:1337/restaurants/1/reviews");
    assert_eq!(classify(&r, &api()), Target::Passthrough);

    let r = req(Method::OPTIONS, "http://localhost:1337/restaurants");
    assert_eq!(classify(&r, &api()), Target::Passthrough);
  }
}
