//! Scripted network used by the worker tests.

use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::fetch::{Request, Response, ResponseType};
use crate::network::Network;

#[derive(Default)]
struct Script {
  offline: bool,
  routes: HashMap<(Method, String), Response>,
  failing: HashSet<String>,
  log: Vec<Request>,
}

/// A network that answers from canned responses.
///
/// Unscripted writes echo their body back (201 for POST, 200 otherwise) and
/// unscripted reads answer 404.
#[derive(Clone, Default)]
pub struct FakeNetwork {
  script: Arc<Mutex<Script>>,
}

impl FakeNetwork {
  pub fn online() -> Self {
    Self::default()
  }

  pub fn offline() -> Self {
    let net = Self::default();
    net.set_online(false);
    net
  }

  pub fn set_online(&self, online: bool) {
    self.script.lock().unwrap().offline = !online;
  }

  pub fn respond_json(&self, method: Method, url: &str, status: u16, body: Value) {
    let mut response = Response::new(
      StatusCode::from_u16(status).unwrap(),
      serde_json::to_vec(&body).unwrap(),
    );
    response
      .headers
      .push(("content-type".into(), "application/json".into()));
    self.respond(method, url, response);
  }

  pub fn respond(&self, method: Method, url: &str, response: Response) {
    self
      .script
      .lock()
      .unwrap()
      .routes
      .insert((method, url.to_string()), response);
  }

  /// Make one URL fail at the transport level while everything else works.
  pub fn fail(&self, url: &str) {
    self.script.lock().unwrap().failing.insert(url.to_string());
  }

  pub fn heal(&self, url: &str) {
    self.script.lock().unwrap().failing.remove(url);
  }

  pub fn requests(&self) -> Vec<Request> {
    self.script.lock().unwrap().log.clone()
  }

  pub fn request_count(&self) -> usize {
    self.script.lock().unwrap().log.len()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let mut script = self.script.lock().unwrap();
    script.log.push(request.clone());

    let url = request.url.to_string();
    if script.offline || script.failing.contains(&url) {
      return Err(eyre!("{} {} failed: network unreachable", request.method, url));
    }

    if let Some(response) = script.routes.get(&(request.method.clone(), url)) {
      return Ok(response.clone());
    }

    let body = request.body.clone().unwrap_or_default();
    let response = match request.method {
      Method::POST => Response::new(StatusCode::CREATED, body),
      Method::PUT => Response::new(StatusCode::OK, body),
      Method::DELETE => Response::new(StatusCode::OK, b"{}".to_vec()),
      _ => Response::new(StatusCode::NOT_FOUND, Vec::new()),
    };
    Ok(Response {
      response_type: ResponseType::Basic,
      ..response
    })
  }
}
