//! The background worker: owns the stores and answers intercepted requests.

use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::assets::StaticCache;
use crate::cache::{
  AssetStorage, CacheLayer, CacheResult, Collection, EntityStorage, SqliteStorage,
};
use crate::config::Config;
use crate::event::{ClientMessage, Event, EventHandler};
use crate::fetch::{Request, Response};
use crate::mutation::{MutationQueue, Operation, PendingMutation};
use crate::network::Network;
use crate::replay::{ReplayAgent, ReplayReport};
use crate::router::{classify, DataRequest, Target};
use crate::state::WorkerState;

/// Snapshot of what the worker holds locally.
#[derive(Debug, Clone)]
pub struct Status {
  pub restaurants: usize,
  pub reviews: usize,
  pub restaurants_hydrated: bool,
  pub reviews_hydrated: bool,
  pub pending: Vec<PendingMutation>,
  pub namespaces: Vec<String>,
}

pub struct Worker<N: Network> {
  config: Config,
  network: N,
  storage: Arc<SqliteStorage>,
  state: Arc<WorkerState>,
  assets: StaticCache<SqliteStorage>,
  entities: CacheLayer<SqliteStorage>,
  mutations: MutationQueue<SqliteStorage>,
  replay: ReplayAgent<SqliteStorage>,
}

impl<N: Network> Worker<N> {
  pub fn new(config: Config, network: N, storage: SqliteStorage) -> Result<Self> {
    let storage = Arc::new(storage);
    let state = Arc::new(WorkerState::load(storage.as_ref())?);

    Ok(Self {
      assets: StaticCache::new(storage.clone(), &config),
      entities: CacheLayer::new(storage.clone(), state.clone()),
      mutations: MutationQueue::new(storage.clone(), state.clone()),
      replay: ReplayAgent::new(storage.clone(), config.api.origin.clone()),
      config,
      network,
      storage,
      state,
    })
  }

  #[cfg(test)]
  pub fn storage(&self) -> &SqliteStorage {
    &self.storage
  }

  /// Precache the page shell.
  pub async fn install(&self) -> Result<usize> {
    self
      .assets
      .install(
        &self.config.assets.origin,
        &self.config.assets.precache,
        &self.network,
      )
      .await
  }

  /// Purge asset caches of other versions.
  pub fn activate(&self) -> Result<Vec<String>> {
    self.assets.activate()
  }

  pub async fn handle_message(&self, message: ClientMessage) -> Result<ReplayReport> {
    match message {
      ClientMessage::FlushPending => self.replay.flush_pending(&self.network).await,
    }
  }

  /// Answer one intercepted request.
  pub async fn handle_fetch(&self, request: Request) -> Result<Response> {
    match classify(&request, &self.config.api.origin) {
      Target::Asset => self.assets.handle(request, &self.network).await,
      Target::Passthrough => {
        debug!(method = %request.method, url = %request.url, "passing through");
        self.network.fetch(request).await
      }
      Target::Data(data) if data.is_read() => self.read(data, request).await,
      Target::Data(data) => match Operation::classify(&data, &request) {
        Ok(operation) => self.mutations.apply(operation, request, &self.network).await,
        Err(e) => {
          debug!(url = %request.url, error = %e, "unrecognised write, passing through");
          self.network.fetch(request).await
        }
      },
    }
  }

  /// Like [`Worker::handle_fetch`], but a failure becomes an empty 502.
  pub async fn respond(&self, request: Request) -> Response {
    let method = request.method.clone();
    let url = request.url.clone();
    match self.handle_fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        error!(%method, %url, error = ?e, "request failed");
        Response::empty(StatusCode::BAD_GATEWAY)
      }
    }
  }

  async fn read(&self, data: DataRequest, request: Request) -> Result<Response> {
    // Query strings other than the review filter aren't mirrored locally
    if data.has_query && data.id.is_none() && data.restaurant_id.is_none() {
      return self.network.fetch(request).await;
    }

    let network = &self.network;
    let fetch = move || async move {
      let url = request.url.clone();
      let response = network.fetch(request).await?;
      if !response.status.is_success() {
        return Err(eyre!("{} answered {}", url, response.status));
      }
      response.json_body::<Value>()
    };

    let result: CacheResult<Value> = match (&data.id, &data.restaurant_id, data.collection) {
      (Some(id), _, collection) => self.entities.fetch_one(collection, id, fetch).await?,
      (None, Some(restaurant_id), Collection::Reviews) => {
        self
          .entities
          .fetch_list(
            Collection::Reviews,
            Some(("restaurant_id", restaurant_id)),
            fetch,
          )
          .await?
      }
      (None, _, collection) => self.entities.fetch_list(collection, None, fetch).await?,
    };

    debug!(collection = %data.collection, source = result.source.as_str(), "data read");
    Ok(Response::json(StatusCode::OK, &result.data)?.with_header("x-restview-source", result.source.as_str()))
  }

  /// Wipe the entity store, the queue and the asset caches.
  pub fn reset(&self) -> Result<()> {
    self.storage.reset()?;
    for namespace in self.storage.namespaces()? {
      self.storage.delete_namespace(&namespace)?;
    }
    self.state.reset();
    warn!("worker storage reset");
    Ok(())
  }

  pub fn status(&self) -> Result<Status> {
    Ok(Status {
      restaurants: self.storage.get_all(Collection::Restaurants)?.len(),
      reviews: self.storage.get_all(Collection::Reviews)?.len(),
      restaurants_hydrated: self.state.init_complete(Collection::Restaurants),
      reviews_hydrated: self.state.init_complete(Collection::Reviews),
      pending: self.storage.pending()?,
      namespaces: self.storage.namespaces()?,
    })
  }

  /// Process events until every handle is dropped.
  ///
  /// Lifecycle events run inline; fetches and messages each get their own task
  /// so a slow request doesn't hold up the ones behind it.
  pub async fn run(self: Arc<Self>, mut events: EventHandler) {
    info!(api = %self.config.api.origin, version = %self.config.cache.version, "worker running");

    while let Some(event) = events.next().await {
      match event {
        Event::Install { done } => {
          let result = self.install().await;
          if let Err(e) = &result {
            error!(error = ?e, "install failed");
          }
          let _ = done.send(result);
        }
        Event::Activate { done } => {
          let result = self.activate();
          if let Err(e) = &result {
            error!(error = ?e, "activate failed");
          }
          let _ = done.send(result);
        }
        Event::Fetch { request, respond } => {
          let worker = Arc::clone(&self);
          tokio::spawn(async move {
            let response = worker.respond(request).await;
            let _ = respond.send(response);
          });
        }
        Event::Message(message) => {
          let worker = Arc::clone(&self);
          tokio::spawn(async move {
            if let Err(e) = worker.handle_message(message).await {
              error!(error = ?e, "message handling failed");
            }
          });
        }
      }
    }

    info!("worker stopped");
  }
}
