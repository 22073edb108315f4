//! Local HTTP host that feeds intercepted requests to the worker.
//!
//! The page (or a browser pointed at this process as its proxy) sends every
//! request here. Absolute-form URIs are used as they are; origin-form paths are
//! resolved against the asset origin.

use axum::{
  body::{to_bytes, Body},
  extract::{Request as HttpRequest, State},
  http::{header, HeaderMap, StatusCode, Uri},
  response::{IntoResponse, Response as HttpResponse},
  routing::post,
  Json, Router,
};
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::event::{ClientMessage, WorkerHandle};
use crate::fetch::{Destination, Request, Response};

/// Path the page posts worker messages to.
pub const MESSAGE_PATH: &str = "/__restview/message";

const MAX_BODY: usize = 4 * 1024 * 1024;

struct Host {
  handle: WorkerHandle,
  asset_origin: Url,
}

pub fn router(handle: WorkerHandle, asset_origin: Url) -> Router {
  let host = Arc::new(Host {
    handle,
    asset_origin,
  });

  Router::new()
    .route(MESSAGE_PATH, post(message))
    .fallback(intercept)
    .with_state(host)
}

/// Serve until ctrl-c.
pub async fn serve(listen: SocketAddr, handle: WorkerHandle, asset_origin: Url) -> Result<()> {
  let app = router(handle, asset_origin);
  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", listen, e))?;

  info!(%listen, "intercepting requests");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(error = %e, "failed to listen for ctrl-c");
    return;
  }
  info!("shutting down");
}

async fn message(State(host): State<Arc<Host>>, Json(message): Json<ClientMessage>) -> StatusCode {
  debug!(?message, "message from page");
  match host.handle.post_message(message) {
    Ok(()) => StatusCode::ACCEPTED,
    Err(e) => {
      error!(error = %e, "failed to deliver message");
      StatusCode::SERVICE_UNAVAILABLE
    }
  }
}

async fn intercept(State(host): State<Arc<Host>>, request: HttpRequest) -> HttpResponse {
  let request = match to_worker_request(request, &host.asset_origin).await {
    Ok(r) => r,
    Err(e) => {
      warn!(error = %e, "rejected request");
      return StatusCode::BAD_REQUEST.into_response();
    }
  };

  match host.handle.fetch(request).await {
    Ok(response) => to_http_response(response),
    Err(e) => {
      error!(error = %e, "worker did not answer");
      StatusCode::BAD_GATEWAY.into_response()
    }
  }
}

async fn to_worker_request(request: HttpRequest, asset_origin: &Url) -> Result<Request> {
  let (parts, body) = request.into_parts();
  let url = resolve_url(&parts.uri, asset_origin)?;

  let body = to_bytes(body, MAX_BODY)
    .await
    .map_err(|e| eyre!("Failed to read request body: {}", e))?;

  let referrer = parts
    .headers
    .get(header::REFERER)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| Url::parse(v).ok());
  let accept = parts.headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
  let destination = Destination::infer(&url, accept);

  let mut request = Request::new(parts.method, url).with_destination(destination);
  request.headers = header_pairs(&parts.headers);
  request.body = (!body.is_empty()).then(|| body.to_vec());
  if let Some(referrer) = referrer {
    request = request.with_referrer(referrer);
  }
  Ok(request)
}

/// Absolute-form URIs as given, origin-form against the asset origin.
fn resolve_url(uri: &Uri, asset_origin: &Url) -> Result<Url> {
  if uri.scheme().is_some() {
    return Url::parse(&uri.to_string()).map_err(|e| eyre!("Invalid request URI {}: {}", uri, e));
  }

  let path = uri.path_and_query().map_or("/", |p| p.as_str());
  asset_origin
    .join(path)
    .map_err(|e| eyre!("Invalid request path {}: {}", path, e))
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect()
}

fn to_http_response(response: Response) -> HttpResponse {
  let mut builder = axum::http::Response::builder()
    .status(response.status)
    .header("x-restview-response-type", response.response_type.as_str());
  for (name, value) in &response.headers {
    builder = builder.header(name.as_str(), value.as_str());
  }

  match builder.body(Body::from(response.body)) {
    Ok(r) => r,
    Err(e) => {
      error!(error = %e, "worker produced an invalid response");
      StatusCode::BAD_GATEWAY.into_response()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::Method;

  fn assets() -> Url {
    Url::parse("http://localhost:8000/").unwrap()
  }

  #[test]
  fn test_origin_form_resolves_against_assets() {
    let uri: Uri = "/restaurant.html?id=3".parse().unwrap();
    assert_eq!(
      resolve_url(&uri, &assets()).unwrap().as_str(),
      "http://localhost:8000/restaurant.html?id=3"
    );
  }

  #[test]
  fn test_absolute_form_is_kept() {
    let uri: Uri = "http://localhost:1337/restaurants/3/?is_favorite=true"
      .parse()
      .unwrap();
    assert_eq!(
      resolve_url(&uri, &assets()).unwrap().as_str(),
      "http://localhost:1337/restaurants/3/?is_favorite=true"
    );
  }

  #[tokio::test]
  async fn test_request_conversion() {
    let request = axum::http::Request::builder()
      .method(Method::POST)
      .uri("http://localhost:1337/reviews")
      .header(header::REFERER, "http://localhost:8000/restaurant.html?id=7")
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(r#"{"name":"A"}"#))
      .unwrap();

    let converted = to_worker_request(request, &assets()).await.unwrap();
    assert_eq!(converted.method, Method::POST);
    assert_eq!(
      converted.referrer.as_ref().unwrap().as_str(),
      "http://localhost:8000/restaurant.html?id=7"
    );
    assert_eq!(converted.header("content-type"), Some("application/json"));
    assert_eq!(converted.body.as_deref(), Some(br#"{"name":"A"}"#.as_slice()));
  }

  #[tokio::test]
  async fn test_empty_body_becomes_none() {
    let request = axum::http::Request::builder()
      .uri("/img/1.jpg")
      .body(Body::empty())
      .unwrap();
    let converted = to_worker_request(request, &assets()).await.unwrap();
    assert!(converted.body.is_none());
    assert_eq!(converted.destination, Destination::Image);
  }

  #[test]
  fn test_response_conversion_keeps_status_and_headers() {
    let response = Response::empty(StatusCode::CREATED).with_header("x-restview-source", "queued");
    let http = to_http_response(response);
    assert_eq!(http.status(), StatusCode::CREATED);
    assert_eq!(http.headers()["x-restview-source"], "queued");
    assert_eq!(http.headers()["x-restview-response-type"], "synthetic");
  }
}
