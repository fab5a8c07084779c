//! Cache policy router: request classification and the three fetch
//! strategies (network-first, cache-first, passthrough).

use async_trait::async_trait;
use color_eyre::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Origin;

use crate::cache::CacheStore;
use crate::config::{Config, OfflineMode};
use crate::http::{Request, ResponseSnapshot};
use crate::net::Fetcher;
use crate::worker::handler::{ControlMessage, WorkerHandler};
use crate::worker::host::WorkerHost;

/// How a request will be satisfied, in classification precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Allow-listed data API: network-first with cached fallback.
  ApiHost,
  /// App-shell asset: cache-first with network fill.
  SameOrigin,
  /// Any other cross-origin request: straight passthrough.
  CrossOrigin,
}

/// Decides, for every outgoing request, how to satisfy it and whether to
/// persist the result.
///
/// The router owns no event registration: the host adapter drives it
/// through [`WorkerHandler`]. A cache failure is never allowed to prevent
/// an underlying network response from reaching the caller.
pub struct CachePolicyRouter<S, F> {
  config: Arc<Config>,
  store: Arc<S>,
  fetcher: Arc<F>,
  host: Arc<dyn WorkerHost>,
  origin: Origin,
}

impl<S: CacheStore, F: Fetcher> CachePolicyRouter<S, F> {
  pub fn new(
    config: Arc<Config>,
    store: Arc<S>,
    fetcher: Arc<F>,
    host: Arc<dyn WorkerHost>,
  ) -> Result<Self> {
    let origin = config.origin_url()?.origin();

    Ok(Self {
      config,
      store,
      fetcher,
      host,
      origin,
    })
  }

  /// Populate the precache generation with the configured manifest.
  ///
  /// Best effort: a manifest entry that fails to fetch or store is logged
  /// and skipped, and install still completes. Ends by signaling
  /// skip-waiting so the new version takes over immediately.
  pub async fn install(&self) -> Result<()> {
    let precache = &self.config.cache.precache_name;
    self.store.open(precache)?;

    // Bypass any intermediate cache when filling the shell
    let requests: Vec<Request> = self
      .config
      .manifest_urls()?
      .into_iter()
      .map(|url| Request::get(url).with_header("Cache-Control", "no-cache"))
      .collect();

    let results = join_all(requests.iter().map(|request| self.fetcher.fetch(request))).await;

    let mut stored = 0usize;
    for (request, result) in requests.iter().zip(results) {
      match result {
        Ok(response) if response.is_ok() => {
          if let Err(e) = self.store.put(precache, request, &response) {
            warn!("Failed to store precache entry {}: {}", request.url, e);
          } else {
            stored += 1;
          }
        }
        Ok(response) => {
          warn!(
            "Skipping precache entry {}: status {}",
            request.url, response.status
          );
        }
        Err(e) => {
          warn!("Failed to fetch precache entry {}: {}", request.url, e);
        }
      }
    }
    info!(
      "Installed {}/{} precache entries into '{}'",
      stored,
      requests.len(),
      precache
    );

    self.host.skip_waiting();
    Ok(())
  }

  /// Delete every generation other than the current precache and runtime
  /// ones, then claim open clients.
  pub async fn activate(&self) -> Result<()> {
    let keep = [
      self.config.cache.precache_name.as_str(),
      self.config.cache.runtime_name.as_str(),
    ];

    for name in self.store.keys()? {
      if !keep.contains(&name.as_str()) {
        info!("Deleting old cache generation '{}'", name);
        if let Err(e) = self.store.delete(&name) {
          warn!("Failed to delete cache generation '{}': {}", name, e);
        }
      }
    }

    self.host.claim_clients();
    Ok(())
  }

  /// Classification precedence: API host, then same-origin, then
  /// passthrough.
  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.host().map_or(false, |h| self.config.is_api_host(h)) {
      RequestClass::ApiHost
    } else if request.url.origin() == self.origin {
      RequestClass::SameOrigin
    } else {
      RequestClass::CrossOrigin
    }
  }

  /// Satisfy a request according to its class.
  pub async fn route(&self, request: &Request) -> Result<ResponseSnapshot> {
    match self.classify(request) {
      RequestClass::ApiHost => self.network_first(request).await,
      RequestClass::SameOrigin => self.cache_first(request).await,
      RequestClass::CrossOrigin => self.fetcher.fetch(request).await,
    }
  }

  /// Network-first: the live response wins and refreshes the runtime
  /// generation; a cached copy covers network failure; the configured
  /// offline fallback covers everything else.
  async fn network_first(&self, request: &Request) -> Result<ResponseSnapshot> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          let runtime = &self.config.cache.runtime_name;
          if let Err(e) = self.store.put(runtime, request, &response) {
            warn!("Failed to cache API response for {}: {}", request.url, e);
          }
        }
        Ok(response)
      }
      Err(network_err) => {
        debug!("Network fetch failed for {}: {}", request.url, network_err);
        match self.store.match_any(request) {
          Ok(Some(stored)) => Ok(stored.response),
          Ok(None) => self.offline_reply(network_err),
          Err(store_err) => {
            warn!("Cache lookup failed for {}: {}", request.url, store_err);
            self.offline_reply(network_err)
          }
        }
      }
    }
  }

  /// Cache-first: a stored copy wins without touching the network; a
  /// network fill is cached only when it is a plain 200.
  async fn cache_first(&self, request: &Request) -> Result<ResponseSnapshot> {
    match self.store.match_any(request) {
      Ok(Some(stored)) => return Ok(stored.response),
      Ok(None) => {}
      Err(e) => warn!("Cache lookup failed for {}: {}", request.url, e),
    }

    let response = self.fetcher.fetch(request).await?;
    if response.is_ok() {
      let precache = &self.config.cache.precache_name;
      if let Err(e) = self.store.put(precache, request, &response) {
        warn!("Failed to cache asset {}: {}", request.url, e);
      }
    }
    Ok(response)
  }

  fn offline_reply(&self, network_err: color_eyre::Report) -> Result<ResponseSnapshot> {
    match self.config.cache.offline {
      OfflineMode::JsonBody => Ok(ResponseSnapshot::offline_json()),
      OfflineMode::Passthrough => Err(network_err),
    }
  }

  /// Handle a control command from the host.
  pub fn handle_message(&self, message: ControlMessage) {
    match message {
      ControlMessage::ForceActivate => {
        info!("Force-activate requested, skipping wait");
        self.host.skip_waiting();
      }
    }
  }
}

#[async_trait]
impl<S, F> WorkerHandler for CachePolicyRouter<S, F>
where
  S: CacheStore + 'static,
  F: Fetcher + 'static,
{
  async fn on_install(&self) -> Result<()> {
    self.install().await
  }

  async fn on_activate(&self) -> Result<()> {
    self.activate().await
  }

  async fn on_fetch(&self, request: Request) -> Result<ResponseSnapshot> {
    self.route(&request).await
  }

  async fn on_message(&self, message: ControlMessage) -> Result<()> {
    self.handle_message(message);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, StoredResponse};
  use crate::worker::host::InProcessHost;
  use color_eyre::eyre::eyre;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;
  use url::Url;

  /// Fetcher that serves scripted responses and counts every call.
  #[derive(Default)]
  struct ScriptedFetcher {
    responses: Mutex<HashMap<String, ResponseSnapshot>>,
    calls: AtomicUsize,
    offline: AtomicBool,
  }

  impl ScriptedFetcher {
    fn new() -> Self {
      Self::default()
    }

    fn respond(&self, url: &str, response: ResponseSnapshot) {
      self.responses.lock().unwrap().insert(url.to_string(), response);
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }
  }

  #[async_trait]
  impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("connection refused"));
      }
      self
        .responses
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| eyre!("no scripted response for {}", request.url))
    }
  }

  /// Store whose writes always fail; reads always miss.
  struct FailingStore;

  impl CacheStore for FailingStore {
    fn open(&self, _generation: &str) -> Result<()> {
      Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
      Ok(Vec::new())
    }

    fn delete(&self, _generation: &str) -> Result<bool> {
      Ok(false)
    }

    fn put(&self, _generation: &str, _request: &Request, _response: &ResponseSnapshot) -> Result<()> {
      Err(eyre!("disk full"))
    }

    fn get(&self, _generation: &str, _request: &Request) -> Result<Option<StoredResponse>> {
      Ok(None)
    }

    fn match_any(&self, _request: &Request) -> Result<Option<StoredResponse>> {
      Ok(None)
    }

    fn count(&self, _generation: &str) -> Result<usize> {
      Ok(0)
    }
  }

  struct Fixture {
    router: CachePolicyRouter<MemoryStore, ScriptedFetcher>,
    store: Arc<MemoryStore>,
    fetcher: Arc<ScriptedFetcher>,
    host: Arc<InProcessHost>,
  }

  fn fixture_with(config: Config) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let host = Arc::new(InProcessHost::new());
    let router = CachePolicyRouter::new(
      Arc::new(config),
      Arc::clone(&store),
      Arc::clone(&fetcher),
      Arc::clone(&host) as Arc<dyn WorkerHost>,
    )
    .unwrap();

    Fixture {
      router,
      store,
      fetcher,
      host,
    }
  }

  fn fixture() -> Fixture {
    fixture_with(Config::default())
  }

  fn request(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn json_200(body: &[u8]) -> ResponseSnapshot {
    ResponseSnapshot::new(200)
      .with_header("Content-Type", "application/json")
      .with_body(body.to_vec())
  }

  const API_URL: &str = "https://api.aladhan.com/v1/timings/today";
  const PAGE_URL: &str = "https://jannah.app/surah/1";

  #[test]
  fn test_classification_precedence() {
    let f = fixture();
    assert_eq!(f.router.classify(&request(API_URL)), RequestClass::ApiHost);
    assert_eq!(f.router.classify(&request(PAGE_URL)), RequestClass::SameOrigin);
    assert_eq!(
      f.router.classify(&request("https://cdn.example.com/lib.js")),
      RequestClass::CrossOrigin
    );

    // An allow-listed host that is also the app origin stays network-first
    let mut config = Config::default();
    config.origin = "https://api.aladhan.com".to_string();
    let f = fixture_with(config);
    assert_eq!(
      f.router.classify(&request("https://api.aladhan.com/v1/timings")),
      RequestClass::ApiHost
    );
  }

  #[tokio::test]
  async fn test_api_success_is_cached_byte_identical() {
    let f = fixture();
    let body: &[u8] = br#"{"code":200,"data":{"timings":{}}}"#;
    f.fetcher.respond(API_URL, json_200(body));

    let live = f.router.route(&request(API_URL)).await.unwrap();
    assert_eq!(live.body, body);

    let stored = f.store.match_any(&request(API_URL)).unwrap().unwrap();
    assert_eq!(stored.response.body, live.body);
    assert_eq!(stored.response, live);

    // Runtime generation was created lazily by the first successful fetch
    assert!(f.store.keys().unwrap().contains(&"runtime-v1".to_string()));
  }

  #[tokio::test]
  async fn test_api_non_200_is_returned_but_not_cached() {
    let f = fixture();
    f.fetcher.respond(API_URL, ResponseSnapshot::new(500).with_body(&b"boom"[..]));

    let response = f.router.route(&request(API_URL)).await.unwrap();
    assert_eq!(response.status, 500);
    assert!(f.store.match_any(&request(API_URL)).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_api_network_failure_falls_back_to_cache() {
    let f = fixture();
    f.fetcher.respond(API_URL, json_200(b"cached payload"));
    f.router.route(&request(API_URL)).await.unwrap();

    f.fetcher.set_offline(true);
    let response = f.router.route(&request(API_URL)).await.unwrap();
    assert_eq!(response.body, b"cached payload");
  }

  #[tokio::test]
  async fn test_offline_json_variant_synthesizes_reply() {
    let f = fixture();
    f.fetcher.set_offline(true);

    let response = f.router.route(&request(API_URL)).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("application/json"));

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "Offline");
  }

  #[tokio::test]
  async fn test_offline_passthrough_variant_propagates_error() {
    let mut config = Config::default();
    config.cache.offline = OfflineMode::Passthrough;
    let f = fixture_with(config);
    f.fetcher.set_offline(true);

    assert!(f.router.route(&request(API_URL)).await.is_err());
  }

  #[tokio::test]
  async fn test_same_origin_cache_hit_skips_network() {
    let f = fixture();
    let req = request(PAGE_URL);
    let cached = ResponseSnapshot::new(200).with_body(&b"<html>surah</html>"[..]);
    f.store.put("app-shell-v1.0.0", &req, &cached).unwrap();

    let response = f.router.route(&req).await.unwrap();
    assert_eq!(response, cached);
    assert_eq!(f.fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_same_origin_miss_fills_precache_once() {
    let f = fixture();
    f.fetcher.respond(PAGE_URL, ResponseSnapshot::new(200).with_body(&b"page"[..]));

    let first = f.router.route(&request(PAGE_URL)).await.unwrap();
    let second = f.router.route(&request(PAGE_URL)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(f.fetcher.calls(), 1);
    assert_eq!(f.store.count("app-shell-v1.0.0").unwrap(), 1);
  }

  #[tokio::test]
  async fn test_same_origin_non_200_is_not_cached() {
    let f = fixture();
    f.fetcher.respond(PAGE_URL, ResponseSnapshot::new(404).with_body(&b"missing"[..]));

    let response = f.router.route(&request(PAGE_URL)).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(f.store.count("app-shell-v1.0.0").unwrap(), 0);

    // Not cached, so a second route hits the network again
    f.router.route(&request(PAGE_URL)).await.unwrap();
    assert_eq!(f.fetcher.calls(), 2);
  }

  #[tokio::test]
  async fn test_cross_origin_is_passed_through_uncached() {
    let f = fixture();
    let url = "https://cdn.example.com/lib.js";
    f.fetcher.respond(url, ResponseSnapshot::new(200).with_body(&b"lib"[..]));

    let response = f.router.route(&request(url)).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(f.store.keys().unwrap().is_empty());
    assert!(f.store.match_any(&request(url)).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_install_populates_exact_manifest() {
    let f = fixture();
    let config = Config::default();
    for url in config.manifest_urls().unwrap() {
      f.fetcher.respond(url.as_str(), ResponseSnapshot::new(200).with_body(&b"asset"[..]));
    }

    f.router.install().await.unwrap();
    assert_eq!(
      f.store.count("app-shell-v1.0.0").unwrap(),
      config.precache_manifest.len()
    );
    assert!(f.host.skip_waiting_requested());

    // Every manifest URL is now served from cache with zero network calls
    let calls_after_install = f.fetcher.calls();
    for url in config.manifest_urls().unwrap() {
      let response = f.router.route(&Request::get(url)).await.unwrap();
      assert_eq!(response.status, 200);
    }
    assert_eq!(f.fetcher.calls(), calls_after_install);
  }

  #[tokio::test]
  async fn test_install_is_best_effort() {
    let f = fixture();
    let config = Config::default();
    let urls = config.manifest_urls().unwrap();
    // Script all but one asset; one fetch will fail
    for url in urls.iter().skip(1) {
      f.fetcher.respond(url.as_str(), ResponseSnapshot::new(200).with_body(&b"asset"[..]));
    }

    f.router.install().await.unwrap();
    assert_eq!(f.store.count("app-shell-v1.0.0").unwrap(), urls.len() - 1);
    assert!(f.host.skip_waiting_requested());
  }

  #[tokio::test]
  async fn test_activation_purges_stale_generations() {
    let mut config = Config::default();
    config.cache.precache_name = "v2".to_string();
    config.cache.runtime_name = "v2-runtime".to_string();
    let f = fixture_with(config);

    f.store.open("v1").unwrap();
    f.store.open("v2-runtime").unwrap();
    f.store.open("stale").unwrap();

    f.router.activate().await.unwrap();
    assert_eq!(f.store.keys().unwrap(), vec!["v2-runtime"]);
    assert!(f.host.clients_claimed());
  }

  #[tokio::test]
  async fn test_activation_keeps_preexisting_current_precache() {
    let mut config = Config::default();
    config.cache.precache_name = "v2".to_string();
    config.cache.runtime_name = "v2-runtime".to_string();
    let f = fixture_with(config);

    f.store.open("v1").unwrap();
    f.store.open("v2").unwrap();
    f.store.open("v2-runtime").unwrap();

    f.router.activate().await.unwrap();
    assert_eq!(f.store.keys().unwrap(), vec!["v2", "v2-runtime"]);
  }

  #[tokio::test]
  async fn test_cache_write_failure_never_hides_the_response() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let host = Arc::new(InProcessHost::new());
    let router = CachePolicyRouter::new(
      Arc::new(Config::default()),
      Arc::new(FailingStore),
      Arc::clone(&fetcher),
      Arc::clone(&host) as Arc<dyn WorkerHost>,
    )
    .unwrap();

    fetcher.respond(API_URL, json_200(b"live"));
    let response = router.route(&request(API_URL)).await.unwrap();
    assert_eq!(response.body, b"live");

    fetcher.respond(PAGE_URL, ResponseSnapshot::new(200).with_body(&b"page"[..]));
    let response = router.route(&request(PAGE_URL)).await.unwrap();
    assert_eq!(response.body, b"page");
  }

  #[test]
  fn test_force_activate_message_skips_waiting() {
    let f = fixture();
    assert!(!f.host.skip_waiting_requested());

    f.router.handle_message(ControlMessage::ForceActivate);
    assert!(f.host.skip_waiting_requested());
  }
}
