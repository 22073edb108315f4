//! Drains the pending mutation queue against the network.

use color_eyre::Result;
use reqwest::StatusCode;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::EntityStorage;
use crate::network::Network;

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
  pub replayed: usize,
  pub remaining: usize,
  /// Queue id of the entry that stopped the drain, if any
  pub stopped_at: Option<i64>,
}

pub struct ReplayAgent<S: EntityStorage> {
  storage: Arc<S>,
  api_origin: Url,
  flush_lock: Mutex<()>,
}

impl<S: EntityStorage> ReplayAgent<S> {
  pub fn new(storage: Arc<S>, api_origin: Url) -> Self {
    Self {
      storage,
      api_origin,
      flush_lock: Mutex::new(()),
    }
  }

  /// Replay queued writes oldest first.
  ///
  /// Each entry is removed once the server answers 200 or 201. Anything else,
  /// including a transport failure, stops the drain and leaves that entry and
  /// everything after it queued.
  pub async fn flush_pending<N: Network>(&self, network: &N) -> Result<ReplayReport> {
    let _flushing = self.flush_lock.lock().await;
    let mut report = ReplayReport::default();

    while let Some(entry) = self.storage.oldest_pending()? {
      let request = entry.operation.to_request(&self.api_origin)?;
      debug!(queue_id = entry.queue_id, "replaying {} {}", request.method, request.url);

      match network.fetch(request).await {
        Ok(response) if matches!(response.status, StatusCode::OK | StatusCode::CREATED) => {
          self.storage.remove_pending(entry.queue_id)?;
          report.replayed += 1;
        }
        Ok(response) => {
          warn!(
            queue_id = entry.queue_id,
            status = %response.status,
            "replay rejected by server, leaving {} {} queued",
            entry.method(),
            entry.path()
          );
          report.stopped_at = Some(entry.queue_id);
          break;
        }
        Err(e) => {
          warn!(queue_id = entry.queue_id, error = %e, "replay failed, leaving entry queued");
          report.stopped_at = Some(entry.queue_id);
          break;
        }
      }
    }

    report.remaining = self.storage.pending()?.len();
    if report.replayed > 0 || report.remaining > 0 {
      info!(
        replayed = report.replayed,
        remaining = report.remaining,
        "pending queue flushed"
      );
    }
    Ok(report)
  }
}
