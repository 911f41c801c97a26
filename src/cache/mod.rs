//! Offline cache manager: generation lifecycle plus network-first request routing.

pub mod route;
pub mod storage;

use crate::cache::route::{RequestClass, RoutePolicy};
use crate::cache::storage::CacheStorage;
use crate::config::Config;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use http::Method;
use reqwest::Client;
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub method: Method,
    pub navigate: bool,
    pub accept: Option<String>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            navigate: false,
            accept: None,
        }
    }

    pub fn is_navigation(&self) -> bool {
        self.navigate
            || self
                .accept
                .as_deref()
                .is_some_and(|accept| accept.contains("text/html"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    OfflineShell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub response: FetchResponse,
    pub source: ResponseSource,
}

/// Network access for the cache manager. `Err` means the network failed;
/// HTTP error statuses come back as `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest, bypass_http_cache: bool) -> Result<FetchResponse>;
}

pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create cache HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest, bypass_http_cache: bool) -> Result<FetchResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        if bypass_http_cache {
            builder = builder.header(CACHE_CONTROL, "no-cache");
        }
        if let Some(accept) = &request.accept {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Network request failed: {}", request.url))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body: {}", request.url))?
            .to_vec();

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Installing,
    Installed,
    Active,
}

/// The generation names considered current; anything else is superseded on activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSet {
    pub static_name: String,
    pub runtime_name: String,
}

impl GenerationSet {
    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_name || name == self.runtime_name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
    pub superseded: Vec<String>,
    pub clients_claimed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheControlMessage {
    SkipWaiting,
    CacheUrls {
        #[serde(default)]
        urls: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MessageOutcome {
    Activated(ActivateReport),
    Cached { count: usize },
}

pub struct CacheManager {
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    policy: RoutePolicy,
    generations: GenerationSet,
    manifest: Vec<Url>,
    offline_shell: Url,
    state: Mutex<LifecycleState>,
}

impl CacheManager {
    pub fn from_config(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let manifest = config.static_manifest_urls()?;
        let origin = Url::parse(&config.app_origin)
            .with_context(|| format!("Invalid app_origin: {}", config.app_origin))?;
        let offline_shell = origin
            .join(&format!("{}/index.html", config.base_path))
            .context("Failed to resolve offline shell URL")?;

        Ok(Self {
            storage: CacheStorage::new(&config.cache_dir),
            fetcher,
            policy: RoutePolicy::new(&config.bypass_hosts, &manifest),
            generations: GenerationSet {
                static_name: config.static_cache_name.clone(),
                runtime_name: config.runtime_cache_name.clone(),
            },
            manifest,
            offline_shell,
            state: Mutex::new(LifecycleState::Idle),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(LifecycleState::Idle)
    }

    fn set_state(&self, next: LifecycleState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = ?*state, to = ?next, "cache lifecycle transition");
            *state = next;
        }
    }

    pub fn generations(&self) -> &GenerationSet {
        &self.generations
    }

    /// Pre-populates the static generation. Every manifest entry settles on its
    /// own; a failed or non-OK asset never fails the install.
    pub async fn install(&self) -> Result<InstallReport> {
        self.set_state(LifecycleState::Installing);
        let generation = self.storage.generation(&self.generations.static_name);

        let mut handles = Vec::new();
        for url in self.manifest.iter().cloned() {
            let fetcher = Arc::clone(&self.fetcher);
            let generation = generation.clone();
            let target = url.clone();
            handles.push((
                url,
                tokio::spawn(async move {
                    let response = fetcher.fetch(&FetchRequest::get(target.clone()), true).await?;
                    if !response.is_ok() {
                        return Ok(false);
                    }
                    generation.put(&target, &response).await?;
                    Ok::<bool, anyhow::Error>(true)
                }),
            ));
        }

        let mut report = InstallReport::default();
        for (url, handle) in handles {
            match handle.await {
                Ok(Ok(true)) => report.cached.push(url.to_string()),
                Ok(Ok(false)) => {
                    warn!(url = %url, "static asset returned non-OK status. not cached");
                    report.skipped.push(url.to_string());
                }
                Ok(Err(error)) => {
                    warn!(url = %url, error = %error, "failed to cache static asset");
                    report.failed.push(url.to_string());
                }
                Err(error) => {
                    warn!(url = %url, error = %error, "static asset task panicked");
                    report.failed.push(url.to_string());
                }
            }
        }
        report.cached.sort();
        report.skipped.sort();
        report.failed.sort();

        self.set_state(LifecycleState::Installed);
        info!(
            generation = %self.generations.static_name,
            cached = report.cached.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "cache installed"
        );
        Ok(report)
    }

    /// Evicts every generation outside the current set and takes control immediately.
    pub async fn activate(&self) -> Result<ActivateReport> {
        let mut report = ActivateReport::default();

        for name in self.storage.names().await? {
            if self.generations.is_current(&name) {
                continue;
            }
            if self.storage.delete(&name).await? {
                info!(generation = %name, "superseded cache generation deleted");
                report.superseded.push(name);
            }
        }

        self.set_state(LifecycleState::Active);
        report.clients_claimed = true;
        Ok(report)
    }

    pub async fn handle_message(&self, message: CacheControlMessage) -> Result<MessageOutcome> {
        match message {
            CacheControlMessage::SkipWaiting => Ok(MessageOutcome::Activated(self.activate().await?)),
            CacheControlMessage::CacheUrls { urls } => {
                let count = self.precache(&urls).await?;
                Ok(MessageOutcome::Cached { count })
            }
        }
    }

    /// All-or-nothing: every URL must fetch with an OK status before any is stored.
    pub async fn precache(&self, urls: &[String]) -> Result<usize> {
        let mut fetched = Vec::with_capacity(urls.len());
        for raw in urls {
            let url = self.resolve(raw)?;
            let response = self
                .fetcher
                .fetch(&FetchRequest::get(url.clone()), false)
                .await
                .with_context(|| format!("Failed to pre-cache {url}"))?;
            if !response.is_ok() {
                bail!("Failed to pre-cache {url}: status {}", response.status);
            }
            fetched.push((url, response));
        }

        let generation = self.storage.generation(&self.generations.static_name);
        for (url, response) in &fetched {
            generation.put(url, response).await?;
        }
        Ok(fetched.len())
    }

    fn resolve(&self, raw: &str) -> Result<Url> {
        Url::parse(raw)
            .or_else(|_| self.offline_shell.join(raw))
            .with_context(|| format!("Invalid URL: {raw}"))
    }

    pub fn classify(&self, request: &FetchRequest) -> RequestClass {
        self.policy.classify(request)
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<Served> {
        match self.classify(request) {
            RequestClass::Bypass => {
                let response = self.fetcher.fetch(request, false).await?;
                Ok(Served {
                    response,
                    source: ResponseSource::Network,
                })
            }
            RequestClass::StaticAsset => {
                let network = self.fetcher.fetch(request, true).await;
                self.network_first(request, network, &self.generations.static_name, false)
                    .await
            }
            RequestClass::Navigation => {
                let network = self.fetcher.fetch(request, false).await;
                self.network_first(request, network, &self.generations.runtime_name, true)
                    .await
            }
            RequestClass::Other => {
                let network = self.fetcher.fetch(request, false).await;
                self.network_first(request, network, &self.generations.runtime_name, false)
                    .await
            }
        }
    }

    async fn network_first(
        &self,
        request: &FetchRequest,
        network: Result<FetchResponse>,
        generation: &str,
        offline_shell: bool,
    ) -> Result<Served> {
        let network_error = match network {
            Ok(response) => {
                if response.is_ok() {
                    if let Err(error) = self
                        .storage
                        .generation(generation)
                        .put(&request.url, &response)
                        .await
                    {
                        warn!(url = %request.url, error = %error, "failed to write cache entry");
                    }
                }
                return Ok(Served {
                    response,
                    source: ResponseSource::Network,
                });
            }
            Err(error) => error,
        };

        debug!(url = %request.url, error = %network_error, "network failed. trying cache");
        let preferred = [generation, self.generations.static_name.as_str()];

        if let Some(response) = self.storage.match_any(&request.url, &preferred).await? {
            return Ok(Served {
                response,
                source: ResponseSource::Cache,
            });
        }

        if offline_shell {
            if let Some(response) = self
                .storage
                .match_any(&self.offline_shell, &preferred)
                .await?
            {
                return Ok(Served {
                    response,
                    source: ResponseSource::OfflineShell,
                });
            }
        }

        Err(anyhow!("{network_error:#}. no cached copy of {}", request.url))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CacheControlMessage, CacheManager, FetchRequest, FetchResponse, Fetcher, LifecycleState,
        MessageOutcome, RequestClass, ResponseSource,
    };
    use crate::config::Config;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use url::Url;

    /// Serves canned responses by URL path while online; fails every request offline.
    #[derive(Default)]
    struct StubFetcher {
        routes: BTreeMap<String, (u16, String)>,
        offline: AtomicBool,
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl StubFetcher {
        fn with(routes: &[(&str, u16, &str)]) -> Self {
            Self {
                routes: routes
                    .iter()
                    .map(|(path, status, body)| (path.to_string(), (*status, body.to_string())))
                    .collect(),
                ..Self::default()
            }
        }

        fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, request: &FetchRequest, bypass_http_cache: bool) -> Result<FetchResponse> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((request.url.path().to_string(), bypass_http_cache));
            }
            if self.offline.load(Ordering::SeqCst) {
                bail!("network unreachable");
            }
            let (status, body) = self
                .routes
                .get(request.url.path())
                .cloned()
                .unwrap_or((404, "missing".to_string()));
            Ok(FetchResponse {
                status,
                headers: BTreeMap::new(),
                body: body.into_bytes(),
            })
        }
    }

    fn config(dir: &TempDir) -> Config {
        Config {
            app_origin: "https://owl.example".to_string(),
            base_path: "/app".to_string(),
            cache_dir: dir.path().join("cache"),
            static_assets: vec!["".to_string(), "index.html".to_string(), "styles.css".to_string(), "script.js".to_string()],
            ..Config::default()
        }
    }

    fn manager(dir: &TempDir, fetcher: Arc<StubFetcher>) -> CacheManager {
        CacheManager::from_config(&config(dir), fetcher).expect("manager")
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://owl.example{path}")).unwrap()
    }

    #[tokio::test]
    async fn install_tolerates_a_missing_asset() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = Arc::new(StubFetcher::with(&[
            ("/app/", 200, "shell"),
            ("/app/index.html", 200, "shell"),
            ("/app/styles.css", 200, "body{}"),
        ]));
        let manager = manager(&dir, fetcher.clone());

        let report = manager.install().await.expect("install");

        assert_eq!(manager.state(), LifecycleState::Installed);
        assert_eq!(report.cached.len(), 3);
        assert_eq!(report.skipped, vec!["https://owl.example/app/script.js".to_string()]);
        let generation = manager.storage.generation("ritualbell-static-v6");
        assert!(generation.contains(&url("/app/styles.css")).await);
        assert!(!generation.contains(&url("/app/script.js")).await);
        assert!(fetcher.seen.lock().unwrap().iter().all(|(_, bypass)| *bypass));
    }

    #[tokio::test]
    async fn activate_evicts_superseded_generations() {
        let dir = TempDir::new().expect("tempdir");
        let manager = manager(&dir, Arc::new(StubFetcher::default()));
        let response = FetchResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: b"x".to_vec(),
        };
        for name in ["ritualbell-static-v5", "ritualbell-static-v6", "ritualbell-runtime-v5"] {
            manager.storage.generation(name).put(&url("/app/"), &response).await.expect("put");
        }

        let outcome = manager
            .handle_message(CacheControlMessage::SkipWaiting)
            .await
            .expect("activate");

        let MessageOutcome::Activated(report) = outcome else {
            panic!("expected activation");
        };
        assert_eq!(report.superseded, vec!["ritualbell-static-v5".to_string()]);
        assert!(report.clients_claimed);
        assert_eq!(manager.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn static_asset_falls_back_to_cache_when_offline() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = Arc::new(StubFetcher::with(&[("/app/styles.css", 200, "fresh")]));
        let manager = manager(&dir, fetcher.clone());
        let request = FetchRequest::get(url("/app/styles.css"));

        let online = manager.fetch(&request).await.expect("online");
        assert_eq!(online.source, ResponseSource::Network);

        fetcher.go_offline();
        let offline = manager.fetch(&request).await.expect("offline");
        assert_eq!(offline.source, ResponseSource::Cache);
        assert_eq!(offline.response.body, b"fresh".to_vec());
    }

    #[tokio::test]
    async fn navigation_falls_back_to_offline_shell() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = Arc::new(StubFetcher::with(&[("/app/index.html", 200, "shell")]));
        let manager = manager(&dir, fetcher.clone());
        manager.install().await.expect("install");
        fetcher.go_offline();

        let mut request = FetchRequest::get(url("/app/month/2024-06"));
        request.navigate = true;
        let served = manager.fetch(&request).await.expect("shell");

        assert_eq!(served.source, ResponseSource::OfflineShell);
        assert_eq!(served.response.body, b"shell".to_vec());
    }

    #[tokio::test]
    async fn visited_page_is_served_from_cache_before_the_shell() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = Arc::new(StubFetcher::with(&[
            ("/app/index.html", 200, "shell"),
            ("/app/month/2024-06", 200, "june"),
        ]));
        let manager = manager(&dir, fetcher.clone());
        manager.install().await.expect("install");
        let mut request = FetchRequest::get(url("/app/month/2024-06"));
        request.navigate = true;

        let online = manager.fetch(&request).await.expect("online");
        assert_eq!(online.source, ResponseSource::Network);
        let runtime = manager.storage.generation("ritualbell-runtime-v5");
        assert!(runtime.contains(&url("/app/month/2024-06")).await);

        fetcher.go_offline();
        let offline = manager.fetch(&request).await.expect("offline");
        assert_eq!(offline.source, ResponseSource::Cache);
        assert_eq!(offline.response.body, b"june".to_vec());
    }

    #[tokio::test]
    async fn bypassed_requests_never_touch_the_cache() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = Arc::new(StubFetcher::with(&[("/v1/projects/owl/messages:send", 200, "sent")]));
        let manager = manager(&dir, fetcher.clone());
        let request = FetchRequest::get(
            Url::parse("https://fcm.googleapis.com/v1/projects/owl/messages:send").expect("url"),
        );
        assert_eq!(manager.classify(&request), RequestClass::Bypass);

        let served = manager.fetch(&request).await.expect("served");
        assert_eq!(served.source, ResponseSource::Network);
        assert_eq!(served.response.body, b"sent".to_vec());
        assert!(manager.storage.names().await.expect("names").is_empty());
        let seen = fetcher.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("/v1/projects/owl/messages:send".to_string(), false)]);

        fetcher.go_offline();
        assert!(manager.fetch(&request).await.is_err());
    }

    #[tokio::test]
    async fn error_statuses_are_returned_but_not_cached() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = Arc::new(StubFetcher::default());
        let manager = manager(&dir, fetcher.clone());
        let request = FetchRequest::get(url("/app/data.json"));

        let served = manager.fetch(&request).await.expect("served");
        assert_eq!(served.response.status, 404);

        fetcher.go_offline();
        assert!(manager.fetch(&request).await.is_err());
    }

    #[tokio::test]
    async fn precache_is_all_or_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let fetcher = Arc::new(StubFetcher::with(&[("/app/a.js", 200, "a")]));
        let manager = manager(&dir, fetcher);

        let failed = manager
            .handle_message(CacheControlMessage::CacheUrls {
                urls: vec!["/app/a.js".to_string(), "/app/b.js".to_string()],
            })
            .await;
        assert!(failed.is_err());
        let generation = manager.storage.generation("ritualbell-static-v6");
        assert!(!generation.contains(&url("/app/a.js")).await);

        let cached = manager
            .handle_message(CacheControlMessage::CacheUrls {
                urls: vec!["/app/a.js".to_string()],
            })
            .await
            .expect("cached");
        assert_eq!(cached, MessageOutcome::Cached { count: 1 });
        assert!(generation.contains(&url("/app/a.js")).await);
    }

    #[test]
    fn control_messages_decode_from_json() {
        let message: CacheControlMessage =
            serde_json::from_str(r#"{"type":"CACHE_URLS","urls":["/app/a.js"]}"#).expect("decode");
        assert_eq!(
            message,
            CacheControlMessage::CacheUrls {
                urls: vec!["/app/a.js".to_string()]
            }
        );
        let skip: CacheControlMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).expect("decode");
        assert_eq!(skip, CacheControlMessage::SkipWaiting);
    }
}
