//! Worker lifecycle: the policy router, its handler interface, and the host
//! hooks it signals.

mod handler;
mod host;
mod router;

pub use handler::{ControlMessage, WorkerHandler};
pub use host::{InProcessHost, WorkerHost};
pub use router::{CachePolicyRouter, RequestClass};
