use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::fetch::{Request, Response};

/// Worker events
#[derive(Debug)]
pub enum Event {
  /// Precache the page shell for the current version
  Install { done: oneshot::Sender<Result<usize>> },
  /// Purge caches of other versions
  Activate { done: oneshot::Sender<Result<Vec<String>>> },
  /// An intercepted request waiting for its response
  Fetch {
    request: Request,
    respond: oneshot::Sender<Response>,
  },
  /// A message posted by the page
  Message(ClientMessage),
}

/// Messages the page can post to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
  /// Try to replay the pending mutation queue now
  FlushPending,
}

/// Sending side of the event channel, handed to whatever hosts the worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<Event>,
}

/// Receiving side, drained by the worker loop.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

/// Create a connected handle and event handler.
pub fn channel() -> (WorkerHandle, EventHandler) {
  let (tx, rx) = mpsc::unbounded_channel();
  (WorkerHandle { tx }, EventHandler { rx })
}

impl WorkerHandle {
  fn send(&self, event: Event) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| eyre!("Worker is no longer running"))
  }

  pub async fn install(&self) -> Result<usize> {
    let (done, rx) = oneshot::channel();
    self.send(Event::Install { done })?;
    rx.await.map_err(|_| eyre!("Worker dropped install"))?
  }

  pub async fn activate(&self) -> Result<Vec<String>> {
    let (done, rx) = oneshot::channel();
    self.send(Event::Activate { done })?;
    rx.await.map_err(|_| eyre!("Worker dropped activate"))?
  }

  /// Hand a request to the worker and wait for its response.
  pub async fn fetch(&self, request: Request) -> Result<Response> {
    let (respond, rx) = oneshot::channel();
    let url = request.url.clone();
    self.send(Event::Fetch { request, respond })?;
    rx.await
      .map_err(|_| eyre!("Worker dropped the request for {}", url))
  }

  pub fn post_message(&self, message: ClientMessage) -> Result<()> {
    self.send(Event::Message(message))
  }
}

impl EventHandler {
  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_message_wire_format() {
    let msg: ClientMessage = serde_json::from_str(r#"{"type":"flush_pending"}"#).unwrap();
    assert_eq!(msg, ClientMessage::FlushPending);
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reload"}"#).is_err());
  }

  #[tokio::test]
  async fn test_closed_worker_is_an_error() {
    let (handle, events) = channel();
    drop(events);
    assert!(handle.post_message(ClientMessage::FlushPending).is_err());
  }
}
