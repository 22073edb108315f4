//! Network access for the worker.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use url::{Origin, Url};

use crate::fetch::{Request, Response, ResponseType};

/// Sends requests to the real network.
///
/// An `Err` means the request never produced a response (offline, DNS, reset).
/// Any HTTP status, including errors, comes back as `Ok`.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Network backed by a reqwest client.
///
/// Responses whose final URL is on the page origin are `Basic`; everything
/// else is `Cors`.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  page_origin: Origin,
}

impl HttpNetwork {
  pub fn new(page_origin: &Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("restview/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      page_origin: page_origin.origin(),
    })
  }

  fn response_type(&self, final_url: &Url) -> ResponseType {
    if final_url.origin() == self.page_origin {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    }
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      if is_hop_by_hop(name) {
        continue;
      }
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.url, e))?;

    let response_type = self.response_type(response.url());
    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    let mut converted = Response::new(status, body);
    converted.headers = headers;
    converted.response_type = response_type;
    Ok(converted)
  }
}

/// Headers that describe a single connection and must not be forwarded.
fn is_hop_by_hop(name: &str) -> bool {
  matches!(
    name.to_ascii_lowercase().as_str(),
    "connection"
      | "keep-alive"
      | "proxy-connection"
      | "proxy-authorization"
      | "te"
      | "trailer"
      | "transfer-encoding"
      | "upgrade"
      | "host"
      | "content-length"
      | "content-encoding"
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assets::StaticCache;
  use crate::cache::{AssetStorage, SqliteStorage};
  use crate::config::Config;
  use axum::{routing::get, Router};
  use reqwest::{Method, StatusCode};
  use std::sync::Arc;

  /// Serve `/tile.png` on a random local port and return its base URL.
  async fn tile_server() -> Url {
    let app = Router::new().route("/tile.png", get(|| async { "png" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{}/", addr)).unwrap()
  }

  #[test]
  fn test_response_type_follows_page_origin() {
    let net = HttpNetwork::new(&Url::parse("http://localhost:8000/").unwrap()).unwrap();
    let same = Url::parse("http://localhost:8000/css/styles.css").unwrap();
    let other_port = Url::parse("http://localhost:1337/restaurants").unwrap();
    let other_host = Url::parse("https://maps.example.com/tile.png").unwrap();

    assert_eq!(net.response_type(&same), ResponseType::Basic);
    assert_eq!(net.response_type(&other_port), ResponseType::Cors);
    assert_eq!(net.response_type(&other_host), ResponseType::Cors);
  }

  #[tokio::test]
  async fn test_cross_origin_fetch_is_cors() {
    let base = tile_server().await;
    let tile = base.join("tile.png").unwrap();

    let net = HttpNetwork::new(&Url::parse("http://localhost:8000/").unwrap()).unwrap();
    let response = net.fetch(Request::get(tile.clone())).await.unwrap();
    assert_eq!(response.body, b"png");
    assert_eq!(response.response_type, ResponseType::Cors);
    assert!(!response.is_cacheable());

    let net = HttpNetwork::new(&base).unwrap();
    let response = net.fetch(Request::new(Method::GET, tile)).await.unwrap();
    assert_eq!(response.response_type, ResponseType::Basic);
  }

  #[tokio::test]
  async fn test_cross_origin_asset_is_not_cached() {
    let base = tile_server().await;
    let tile = base.join("tile.png").unwrap();

    let config = Config::default();
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let cache = StaticCache::new(storage.clone(), &config);
    let net = HttpNetwork::new(&config.assets.origin).unwrap();

    let response = cache.handle(Request::get(tile.clone()), &net).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert!(storage.namespaces().unwrap().is_empty());
    assert!(storage
      .match_asset(&[config.images_cache_name()], tile.as_str())
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_hop_by_hop_headers_are_filtered() {
    assert!(is_hop_by_hop("Connection"));
    assert!(is_hop_by_hop("transfer-encoding"));
    assert!(!is_hop_by_hop("content-type"));
  }
}
