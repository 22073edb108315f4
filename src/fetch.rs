//! HTTP-shaped request and response values exchanged between the page and the worker.

use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

/// What kind of resource the page is loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Image,
  Script,
  Style,
}

impl Destination {
  /// Guess the destination from the `Accept` header and the path extension.
  pub fn infer(url: &Url, accept: Option<&str>) -> Self {
    if accept.is_some_and(|a| a.starts_with("image/")) {
      return Self::Image;
    }

    let path = url.path().to_ascii_lowercase();
    match path.rsplit_once('.').map(|(_, ext)| ext) {
      Some("jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" | "ico") => Self::Image,
      Some("js") => Self::Script,
      Some("css") => Self::Style,
      Some("html" | "htm") => Self::Document,
      None if path.ends_with('/') => Self::Document,
      _ => Self::Empty,
    }
  }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  /// Page that issued the request
  pub referrer: Option<Url>,
  pub destination: Destination,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
      referrer: None,
      destination: Destination::Empty,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
    let bytes =
      serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;
    self.body = Some(bytes);
    self.set_header("content-type", "application/json");
    Ok(self)
  }

  pub fn with_referrer(mut self, referrer: Url) -> Self {
    self.referrer = Some(referrer);
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn set_header(&mut self, name: &str, value: &str) {
    self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    self.headers.push((name.to_string(), value.to_string()));
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Parse the body as JSON. An absent or empty body parses as `null`.
  pub fn json_body<T: DeserializeOwned>(&self) -> Result<T> {
    let bytes = match self.body.as_deref() {
      Some(b) if !b.is_empty() => b,
      _ => b"null",
    };
    serde_json::from_slice(bytes).map_err(|e| eyre!("Malformed request body for {}: {}", self.url, e))
  }
}

/// How the response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
  /// Same-origin response
  #[default]
  Basic,
  /// Cross-origin response
  Cors,
  /// Built by the worker rather than received from the network
  Synthetic,
}

impl ResponseType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Synthetic => "synthetic",
    }
  }
}

/// A response handed back to the page.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: StatusCode,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
}

impl Response {
  pub fn new(status: StatusCode, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body,
      response_type: ResponseType::Basic,
    }
  }

  /// Build a synthetic JSON response.
  pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self> {
    let body =
      serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize response body: {}", e))?;
    Ok(Self {
      status,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body,
      response_type: ResponseType::Synthetic,
    })
  }

  pub fn empty(status: StatusCode) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
      response_type: ResponseType::Synthetic,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Cacheable as a static asset: 200 from the same origin.
  pub fn is_cacheable(&self) -> bool {
    self.status == StatusCode::OK && self.response_type == ResponseType::Basic
  }

  pub fn json_body<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Malformed JSON response: {}", e))
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(n, _)| n.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

/// Strip the query string and fragment from a URL.
pub fn strip_search(url: &Url) -> String {
  let mut url = url.clone();
  url.set_query(None);
  url.set_fragment(None);
  url.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_destination_from_extension() {
    let u = url("http://localhost:8000/img/1.jpg");
    assert_eq!(Destination::infer(&u, None), Destination::Image);
    let u = url("http://localhost:8000/css/styles.css");
    assert_eq!(Destination::infer(&u, None), Destination::Style);
    let u = url("http://localhost:8000/");
    assert_eq!(Destination::infer(&u, None), Destination::Document);
  }

  #[test]
  fn test_destination_from_accept_header() {
    let u = url("http://localhost:8000/img/1");
    assert_eq!(
      Destination::infer(&u, Some("image/webp,*/*")),
      Destination::Image
    );
  }

  #[test]
  fn test_strip_search() {
    let u = url("http://localhost:8000/restaurant.html?id=3#map");
    assert_eq!(strip_search(&u), "http://localhost:8000/restaurant.html");
  }

  #[test]
  fn test_empty_body_parses_as_null() {
    let req = Request::new(Method::PUT, url("http://localhost:1337/restaurants/3/?is_favorite=true"));
    let value: serde_json::Value = req.json_body().unwrap();
    assert!(value.is_null());
  }

  #[test]
  fn test_synthetic_response_is_not_cacheable() {
    let resp = Response::json(StatusCode::OK, &serde_json::json!({"id": 1})).unwrap();
    assert!(!resp.is_cacheable());
    assert_eq!(resp.header("Content-Type"), Some("application/json"));
  }
}
