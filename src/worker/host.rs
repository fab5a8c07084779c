//! Host hooks: the signals a worker raises toward whatever runtime drives it.

use std::sync::atomic::{AtomicBool, Ordering};

/// Signals from the worker to its host runtime.
pub trait WorkerHost: Send + Sync {
  /// Promote this instance without waiting for idle clients.
  fn skip_waiting(&self);

  /// Put already-open clients under this instance's control.
  fn claim_clients(&self);
}

/// In-process host that records the signals with atomic flags.
#[derive(Debug, Default)]
pub struct InProcessHost {
  skip_waiting: AtomicBool,
  clients_claimed: AtomicBool,
}

impl InProcessHost {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed.load(Ordering::SeqCst)
  }
}

impl WorkerHost for InProcessHost {
  fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  fn claim_clients(&self) {
    self.clients_claimed.store(true, Ordering::SeqCst);
  }
}
