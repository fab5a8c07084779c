//! Request and response value types shared by the router, the cache store,
//! and the network client.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// An outgoing request as seen by the router.
///
/// Only the method and absolute URL participate in cache identity; extra
/// headers are forwarded to the network client but never keyed on.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// Create a GET request for the given URL.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
    }
  }

  /// Add a header to forward with the request.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Stable storage key for this request.
  ///
  /// SHA-256 over "METHOD url" for fixed-length keys that are safe to use
  /// as primary keys in any backend.
  pub fn cache_key(&self) -> String {
    let input = format!("{} {}", self.method.to_uppercase(), self.url);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Hostname of the request URL, if any.
  pub fn host(&self) -> Option<&str> {
    self.url.host_str()
  }
}

/// A response as stored and served by the router: status, headers, body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// Whether the response is cacheable (plain HTTP 200).
  pub fn is_ok(&self) -> bool {
    self.status == 200
  }

  /// First header value with the given name, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Synthesized reply for an API request that fails with no cached copy.
  pub fn offline_json() -> Self {
    let body = serde_json::json!({
      "error": "Offline",
      "message": "No internet connection. Please try again when online.",
    });
    Self::new(200)
      .with_header("Content-Type", "application/json")
      .with_body(serde_json::to_vec(&body).unwrap_or_default())
  }
}
