//! Lifecycle interface between the host adapter and the policy router.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::str::FromStr;

use crate::http::{Request, ResponseSnapshot};

/// Control commands accepted over the message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
  /// Make the waiting worker instance replace the active one immediately.
  ForceActivate,
}

impl FromStr for ControlMessage {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "force-activate-now" => Ok(Self::ForceActivate),
      other => Err(eyre!("Unknown control message: {}", other)),
    }
  }
}

/// One method per lifecycle event, implemented by the policy router and
/// invoked by the event pump. Keeps the policy logic free of any event
/// registration mechanics.
#[async_trait]
pub trait WorkerHandler: Send + Sync {
  async fn on_install(&self) -> Result<()>;

  async fn on_activate(&self) -> Result<()>;

  async fn on_fetch(&self, request: Request) -> Result<ResponseSnapshot>;

  async fn on_message(&self, message: ControlMessage) -> Result<()>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_control_message_parse() {
    assert_eq!(
      "force-activate-now".parse::<ControlMessage>().unwrap(),
      ControlMessage::ForceActivate
    );
    assert!("SKIP_WAITING".parse::<ControlMessage>().is_err());
    assert!("".parse::<ControlMessage>().is_err());
  }
}
