//! Versioned static asset cache.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{AssetStorage, CachedAsset};
use crate::config::Config;
use crate::fetch::{strip_search, Destination, Request, Response, ResponseType};
use crate::network::Network;

/// Cache-first handler for page assets.
///
/// Responses are kept in two namespaces per build version, one for images and
/// one for everything else. Activating a version drops the namespaces of every
/// other version.
pub struct StaticCache<S: AssetStorage> {
  storage: Arc<S>,
  prefix: String,
  version: String,
  static_name: String,
  images_name: String,
}

impl<S: AssetStorage> StaticCache<S> {
  pub fn new(storage: Arc<S>, config: &Config) -> Self {
    Self {
      storage,
      prefix: config.cache.prefix.clone(),
      version: config.cache.version.clone(),
      static_name: config.static_cache_name(),
      images_name: config.images_cache_name(),
    }
  }

  fn namespace_for(&self, destination: Destination) -> &str {
    match destination {
      Destination::Image => &self.images_name,
      _ => &self.static_name,
    }
  }

  /// Answer an asset request from the current version's cache, falling back to
  /// the network and caching same-origin 200s.
  pub async fn handle<N: Network>(&self, request: Request, network: &N) -> Result<Response> {
    if request.method != Method::GET {
      return network.fetch(request).await;
    }

    let key = strip_search(&request.url);
    let namespaces = [self.static_name.clone(), self.images_name.clone()];
    if let Some(asset) = self.storage.match_asset(&namespaces, &key)? {
      debug!(url = %key, namespace = %asset.namespace, "asset cache hit");
      return Ok(asset_response(asset));
    }

    let destination = request.destination;
    let response = network.fetch(request).await?;

    if response.is_cacheable() {
      let asset = CachedAsset {
        namespace: self.namespace_for(destination).to_string(),
        url: key.clone(),
        status: response.status.as_u16(),
        headers: response.headers.clone(),
        body: response.body.clone(),
        cached_at: Utc::now(),
      };
      // A response that can't be cached is still a good response
      if let Err(e) = self.storage.put_asset(&asset) {
        warn!(url = %key, error = %e, "failed to cache asset");
      }
    }

    Ok(response)
  }

  /// Fetch and store the precache list.
  ///
  /// Either every entry is fetched with a 200 and stored, or nothing is.
  pub async fn install<N: Network>(&self, origin: &Url, paths: &[String], network: &N) -> Result<usize> {
    let urls = paths
      .iter()
      .map(|p| {
        origin
          .join(p)
          .map_err(|e| eyre!("Invalid precache path '{}': {}", p, e))
      })
      .collect::<Result<Vec<Url>>>()?;

    let responses = try_join_all(urls.iter().map(|url| async move {
      let response = network.fetch(Request::get(url.clone())).await?;
      if response.status != StatusCode::OK {
        return Err(eyre!("Precache of {} answered {}", url, response.status));
      }
      Ok::<_, color_eyre::Report>((strip_search(url), response))
    }))
    .await?;

    let now = Utc::now();
    let assets: Vec<CachedAsset> = responses
      .into_iter()
      .map(|(url, response)| CachedAsset {
        namespace: self.static_name.clone(),
        url,
        status: response.status.as_u16(),
        headers: response.headers,
        body: response.body,
        cached_at: now,
      })
      .collect();

    self.storage.put_assets(&assets)?;
    info!(count = assets.len(), namespace = %self.static_name, "precached page shell");
    Ok(assets.len())
  }

  /// Delete every namespace of this application not tagged with the current
  /// version. Returns the deleted namespace names.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut purged = Vec::new();
    for namespace in self.storage.namespaces()? {
      if namespace.starts_with(&self.prefix) && !namespace.ends_with(&self.version) {
        let removed = self.storage.delete_namespace(&namespace)?;
        info!(%namespace, removed, "purged stale cache");
        purged.push(namespace);
      }
    }
    Ok(purged)
  }
}

fn asset_response(asset: CachedAsset) -> Response {
  let status = StatusCode::from_u16(asset.status).unwrap_or(StatusCode::OK);
  Response {
    status,
    headers: asset.headers,
    body: asset.body,
    response_type: ResponseType::Basic,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::testing::FakeNetwork;

  fn setup() -> (Arc<SqliteStorage>, StaticCache<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let cache = StaticCache::new(storage.clone(), &Config::default());
    (storage, cache)
  }

  fn ok(body: &[u8]) -> Response {
    Response::new(StatusCode::OK, body.to_vec())
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_cached_asset_served_offline_ignoring_query() {
    let (_, cache) = setup();
    let net = FakeNetwork::online();
    net.respond(Method::GET, "http://localhost:8000/css/styles.css?v=1", ok(b"body{}"));

    let first = cache
      .handle(get("http://localhost:8000/css/styles.css?v=1"), &net)
      .await
      .unwrap();
    assert_eq!(first.body, b"body{}");

    net.set_online(false);
    let second = cache
      .handle(get("http://localhost:8000/css/styles.css?v=2"), &net)
      .await
      .unwrap();
    assert_eq!(second.body, b"body{}");
    assert_eq!(net.request_count(), 1);
  }

  #[tokio::test]
  async fn test_images_go_to_images_namespace() {
    let (storage, cache) = setup();
    let net = FakeNetwork::online();
    net.respond(Method::GET, "http://localhost:8000/img/1.jpg", ok(b"jpeg"));

    let request = get("http://localhost:8000/img/1.jpg").with_destination(Destination::Image);
    cache.handle(request, &net).await.unwrap();

    assert_eq!(
      storage.namespaces().unwrap(),
      vec!["restaurant-reviews-images-v1.0.1".to_string()]
    );
  }

  #[tokio::test]
  async fn test_cross_origin_and_errors_not_cached() {
    let (storage, cache) = setup();
    let net = FakeNetwork::online();
    let mut cors = ok(b"tile");
    cors.response_type = ResponseType::Cors;
    net.respond(Method::GET, "https://maps.example.com/tile.png", cors);

    cache
      .handle(get("https://maps.example.com/tile.png"), &net)
      .await
      .unwrap();
    let missing = cache
      .handle(get("http://localhost:8000/nope.html"), &net)
      .await
      .unwrap();
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert!(storage.namespaces().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_offline_miss_is_an_error() {
    let (_, cache) = setup();
    let net = FakeNetwork::offline();
    assert!(cache
      .handle(get("http://localhost:8000/index.html"), &net)
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_install_precaches_everything() {
    let (storage, cache) = setup();
    let net = FakeNetwork::online();
    let origin = Url::parse("http://localhost:8000/").unwrap();
    net.respond(Method::GET, "http://localhost:8000/", ok(b"shell"));
    net.respond(Method::GET, "http://localhost:8000/css/styles.css", ok(b"css"));

    let count = cache
      .install(&origin, &["/".into(), "css/styles.css".into()], &net)
      .await
      .unwrap();
    assert_eq!(count, 2);

    net.set_online(false);
    let hit = cache
      .handle(get("http://localhost:8000/css/styles.css"), &net)
      .await
      .unwrap();
    assert_eq!(hit.body, b"css");
    assert!(storage
      .match_asset(&["restaurant-reviews-static-v1.0.1".into()], "http://localhost:8000/")
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let (storage, cache) = setup();
    let net = FakeNetwork::online();
    let origin = Url::parse("http://localhost:8000/").unwrap();
    net.respond(Method::GET, "http://localhost:8000/", ok(b"shell"));

    let result = cache
      .install(&origin, &["/".into(), "js/main.js".into()], &net)
      .await;
    assert!(result.is_err());
    assert!(storage.namespaces().unwrap().is_empty());
  }

  #[test]
  fn test_activate_purges_other_versions_only() {
    let (storage, cache) = setup();
    let asset = |namespace: &str| CachedAsset {
      namespace: namespace.to_string(),
      url: "http://localhost:8000/".to_string(),
      status: 200,
      headers: Vec::new(),
      body: b"x".to_vec(),
      cached_at: Utc::now(),
    };
    storage
      .put_assets(&[
        asset("restaurant-reviews-static-v1.0.0"),
        asset("restaurant-reviews-images-v1.0.0"),
        asset("restaurant-reviews-static-v1.0.1"),
        asset("restaurant-reviews-images-v1.0.1"),
        asset("other-app-static-v0"),
      ])
      .unwrap();

    let mut purged = cache.activate().unwrap();
    purged.sort();
    assert_eq!(
      purged,
      vec![
        "restaurant-reviews-images-v1.0.0".to_string(),
        "restaurant-reviews-static-v1.0.0".to_string(),
      ]
    );
    assert_eq!(
      storage.namespaces().unwrap(),
      vec![
        "other-app-static-v0".to_string(),
        "restaurant-reviews-images-v1.0.1".to_string(),
        "restaurant-reviews-static-v1.0.1".to_string(),
      ]
    );
  }
}
