//! Adapter between a host event source and the worker handler.
//!
//! The pump owns the receiving half of an event channel. Lifecycle events
//! run in order on the pump task; every fetch is spawned as its own task so
//! concurrent requests never block each other and a hung fetch stalls only
//! its own reply.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::http::{Request, ResponseSnapshot};
use crate::worker::{ControlMessage, WorkerHandler};

/// Events a host runtime delivers to the worker.
#[derive(Debug)]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<ResponseSnapshot>>,
  },
  /// Raw control message; parsed at this boundary, unknown commands dropped.
  Message(String),
}

/// Bridges queued host events onto the handler interface.
pub struct EventPump {
  handler: Arc<dyn WorkerHandler>,
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl EventPump {
  /// Create a pump and the sender half the host uses to queue events.
  pub fn new(handler: Arc<dyn WorkerHandler>) -> (mpsc::UnboundedSender<WorkerEvent>, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Self { handler, rx })
  }

  /// Drain events until every sender is dropped.
  ///
  /// A failing lifecycle event is logged and never stops the pump; the
  /// worker outlives anything a single event can throw at it.
  pub async fn run(mut self) -> Result<()> {
    while let Some(event) = self.rx.recv().await {
      match event {
        WorkerEvent::Install => {
          if let Err(e) = self.handler.on_install().await {
            warn!("Install failed: {}", e);
          }
        }
        WorkerEvent::Activate => {
          if let Err(e) = self.handler.on_activate().await {
            warn!("Activate failed: {}", e);
          }
        }
        WorkerEvent::Fetch { request, reply } => {
          let handler = Arc::clone(&self.handler);
          tokio::spawn(async move {
            let response = handler.on_fetch(request).await;
            // Receiver may have navigated away; nothing left to answer
            let _ = reply.send(response);
          });
        }
        WorkerEvent::Message(raw) => match raw.parse::<ControlMessage>() {
          Ok(message) => {
            if let Err(e) = self.handler.on_message(message).await {
              warn!("Message handling failed: {}", e);
            }
          }
          Err(e) => warn!("Dropping message: {}", e),
        },
      }
    }

    Ok(())
  }
}
