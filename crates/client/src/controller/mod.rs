//! The offline cache controller.
//!
//! One instance owns one cache version. It is driven through three
//! lifecycle operations by the [`Registration`](crate::Registration):
//!
//! ### Install
//! - Fetch every manifest asset concurrently.
//! - Commit all entries and the "installed" marker in one transaction, or
//!   nothing at all.
//!
//! ### Activate
//! - Delete every store that belongs to another version.
//! - Claim open client sessions, then report `Active`.
//!
//! ### Fetch
//! - Same-origin GET, cached: answer from cache, refresh in the background.
//! - Same-origin GET, not cached: answer from the network, store a copy.
//! - Anything else: pass through to the network untouched.

pub mod state;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::try_join_all;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use ks_offline_core::{AssetManifest, CacheDb, CacheVersion, Error};

use crate::fetch::{FetchRequest, FetchResponse, Network, same_origin};

pub use state::ControllerState;

/// Shared resources every controller instance of a registration works with.
#[derive(Clone)]
pub struct Host {
    /// Origin and base path; manifest assets resolve against it.
    pub scope: Url,
    pub db: CacheDb,
    pub network: Arc<dyn Network>,
}

impl Host {
    pub fn new(scope: Url, db: CacheDb, network: Arc<dyn Network>) -> Self {
        Self { scope, db, network }
    }
}

/// Where a response handed to the client came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Cached entry; a background refresh was started.
    Cache,
    /// Network response for an uncached request; a copy is being stored.
    Network,
    /// Request was not intercepted.
    Passthrough,
}

/// Response for an intercepted (or passed-through) request.
#[derive(Debug)]
pub struct Served {
    pub response: FetchResponse,
    pub source: ResponseSource,
    write: Option<JoinHandle<()>>,
}

impl Served {
    fn new(response: FetchResponse, source: ResponseSource, write: Option<JoinHandle<()>>) -> Self {
        Self { response, source, write }
    }

    /// Whether a background cache write was started for this response.
    pub fn has_pending_write(&self) -> bool {
        self.write.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Wait for the background refresh or store started by this fetch.
    ///
    /// The response itself never depends on it.
    pub async fn settle(&mut self) {
        if let Some(write) = self.write.take()
            && let Err(e) = write.await
        {
            tracing::debug!(url = %self.response.url, error = %e, "background cache write aborted");
        }
    }

    /// Take the response, leaving any background write running detached.
    pub fn into_response(self) -> FetchResponse {
        self.response
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Entries committed to the version's store.
    pub entries: usize,
    /// The instance asks to take over without waiting for older ones.
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivateOutcome {
    /// Stores deleted because they belonged to other versions.
    pub purged: Vec<String>,
    /// Client sessions now controlled by this instance.
    pub claimed: usize,
}

/// Responses that may be written to the cache.
fn is_cacheable(response: &FetchResponse) -> bool {
    response.status.is_success() && response.status != StatusCode::PARTIAL_CONTENT
}

/// Send a request straight to the network without touching the cache.
pub(crate) async fn passthrough(network: &dyn Network, request: FetchRequest) -> Result<Served, Error> {
    tracing::debug!(method = %request.method, url = %request.url, "passthrough");
    let response = network.fetch(&request).await?;
    Ok(Served::new(response, ResponseSource::Passthrough, None))
}

/// Offline cache controller for one cache version.
pub struct OfflineController {
    id: u64,
    version: CacheVersion,
    manifest: AssetManifest,
    host: Host,
    skip_waiting: bool,
    state: watch::Sender<ControllerState>,
    /// Held shared by every cache write and exclusively by `retire`.
    writes: Arc<RwLock<()>>,
}

impl fmt::Debug for OfflineController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineController")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("scope", &self.host.scope.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl OfflineController {
    /// Create an instance in the `Installing` state.
    pub fn new(id: u64, version: CacheVersion, manifest: AssetManifest, host: Host) -> Self {
        Self::with_state(id, version, manifest, host, ControllerState::Installing)
    }

    /// Bring back an instance whose version finished installing in an
    /// earlier process; it starts out `Active`.
    pub(crate) fn resumed(id: u64, version: CacheVersion, manifest: AssetManifest, host: Host) -> Self {
        Self::with_state(id, version, manifest, host, ControllerState::Active)
    }

    fn with_state(id: u64, version: CacheVersion, manifest: AssetManifest, host: Host, state: ControllerState) -> Self {
        let (state, _) = watch::channel(state);
        Self { id, version, manifest, host, skip_waiting: true, state, writes: Arc::new(RwLock::new(())) }
    }

    pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
        self.skip_waiting = skip_waiting;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    pub fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    fn transition(&self, next: ControllerState) -> Result<(), Error> {
        let mut refused = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                refused = Some(*current);
                false
            }
        });

        match refused {
            None => {
                tracing::info!(controller = self.id, version = %self.version, state = %next, "controller state changed");
                Ok(())
            }
            Some(current) => Err(Error::InvalidState(format!(
                "controller {} ({}) cannot go from {current} to {next}",
                self.id, self.version
            ))),
        }
    }

    /// Mark the instance redundant. It stops serving and writing.
    ///
    /// Waits for cache writes already in progress, so none lands after
    /// this returns.
    pub(crate) async fn retire(&self) {
        let _writes = self.writes.write().await;
        if self.state() != ControllerState::Redundant {
            let _ = self.transition(ControllerState::Redundant);
        }
    }

    /// Wait while the instance is activating.
    ///
    /// Returns true once it is `Active`, false if it became redundant or is
    /// in any other state.
    pub(crate) async fn ready(&self) -> bool {
        let mut rx = self.state.subscribe();
        let settled = match rx
            .wait_for(|s| !matches!(s, ControllerState::Activating))
            .await
        {
            Ok(state) => *state,
            Err(_) => return false,
        };
        settled == ControllerState::Active
    }

    /// Whether this instance intercepts the request at all.
    ///
    /// Only same-origin GET requests are intercepted.
    pub fn intercepts(&self, request: &FetchRequest) -> bool {
        request.method == Method::GET && same_origin(&request.url, &self.host.scope)
    }

    /// Fetch and store every manifest asset.
    ///
    /// # Errors
    ///
    /// Returns `Error::InstallFailed` if any asset cannot be fetched or does
    /// not answer with a cacheable status. The instance is then redundant
    /// and nothing was written.
    pub async fn install(&self) -> Result<InstallOutcome, Error> {
        if self.state() != ControllerState::Installing {
            return Err(Error::InvalidState(format!("controller {} is {}, not installing", self.id, self.state())));
        }

        match self.populate().await {
            Ok(entries) => {
                self.transition(ControllerState::Waiting)?;
                Ok(InstallOutcome { entries, skip_waiting: self.skip_waiting })
            }
            Err(e) => {
                tracing::debug!(controller = self.id, version = %self.version, error = %e, "install failed");
                self.retire().await;
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<usize, Error> {
        let urls = self.manifest.resolve(&self.host.scope)?;
        let network = self.host.network.as_ref();

        let fetches = urls.into_iter().map(|url| async move {
            let request = FetchRequest::get(url);
            let response = network.fetch(&request).await.map_err(|e| Error::InstallFailed {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;
            if !is_cacheable(&response) {
                return Err(Error::InstallFailed {
                    url: request.url.to_string(),
                    reason: format!("status {}", response.status.as_u16()),
                });
            }
            Ok(response.to_entry(&request))
        });

        let entries = try_join_all(fetches).await?;
        self.host.db.install_store(&self.version, &entries).await?;
        Ok(entries.len())
    }

    /// Purge stores of other versions, claim clients, become `Active`.
    ///
    /// `claim` runs after the purge and must hand every open client session
    /// to this instance, returning how many it took over. If the purge
    /// fails the instance stays `Activating` and activation can be retried.
    pub async fn activate<F, Fut>(&self, claim: F) -> Result<ActivateOutcome, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = usize>,
    {
        match self.state() {
            ControllerState::Waiting => self.transition(ControllerState::Activating)?,
            ControllerState::Activating => {}
            other => {
                return Err(Error::InvalidState(format!("controller {} is {other}, not waiting", self.id)));
            }
        }

        let purged = self.purge_stale_stores().await?;
        self.host.db.mark_activated(&self.version).await?;
        let claimed = claim().await;
        self.transition(ControllerState::Active)?;

        Ok(ActivateOutcome { purged, claimed })
    }

    /// Delete every store that belongs to another version.
    pub(crate) async fn purge_stale_stores(&self) -> Result<Vec<String>, Error> {
        let mut purged = Vec::new();
        for store in self.host.db.list_stores().await? {
            if store.name == self.version.as_str() {
                continue;
            }
            let stale = CacheVersion::new(store.name)?;
            if self.host.db.delete_store(&stale).await? {
                tracing::debug!(controller = self.id, store = %stale, "purged stale cache store");
                purged.push(stale.to_string());
            }
        }
        Ok(purged)
    }

    /// Answer a request the client application made.
    ///
    /// # Errors
    ///
    /// Returns `Error::Network` when the request is not cached and the
    /// network fails, and `Error::InvalidState` if an intercepted request
    /// reaches an instance that is not `Active`.
    pub async fn handle_fetch(&self, mut request: FetchRequest) -> Result<Served, Error> {
        if !self.intercepts(&request) {
            return passthrough(self.host.network.as_ref(), request).await;
        }
        if self.state() != ControllerState::Active {
            return Err(Error::InvalidState(format!("controller {} is {}, not active", self.id, self.state())));
        }

        request.url.set_fragment(None);
        let cached = self
            .host
            .db
            .match_entry(&self.version, request.method.as_str(), request.url.as_str())
            .await?;

        match cached {
            Some(entry) => {
                let response = FetchResponse::from_entry(entry)?;
                tracing::debug!(url = %request.url, version = %self.version, "cache hit");
                let refresh = self.spawn_revalidation(request);
                Ok(Served::new(response, ResponseSource::Cache, Some(refresh)))
            }
            None => {
                let response = self.host.network.fetch(&request).await?;
                tracing::debug!(url = %request.url, status = response.status.as_u16(), "cache miss");
                let store = is_cacheable(&response).then(|| self.spawn_store(request, response.clone()));
                Ok(Served::new(response, ResponseSource::Network, store))
            }
        }
    }

    /// Refetch a cached request and replace the entry on success.
    ///
    /// Failures keep the cached entry; nothing is reported to the client.
    fn spawn_revalidation(&self, request: FetchRequest) -> JoinHandle<()> {
        let writer = self.writer();
        let network = Arc::clone(&self.host.network);
        tokio::spawn(async move {
            match network.fetch(&request).await {
                Ok(response) => writer.store(&request, &response).await,
                Err(e) => tracing::debug!(url = %request.url, error = %e, "revalidation failed; keeping cached entry"),
            }
        })
    }

    fn spawn_store(&self, request: FetchRequest, response: FetchResponse) -> JoinHandle<()> {
        let writer = self.writer();
        tokio::spawn(async move { writer.store(&request, &response).await })
    }

    fn writer(&self) -> EntryWriter {
        EntryWriter {
            db: self.host.db.clone(),
            version: self.version.clone(),
            state: self.state.subscribe(),
            writes: Arc::clone(&self.writes),
        }
    }
}

/// Background writer detached from the controller that spawned it.
struct EntryWriter {
    db: CacheDb,
    version: CacheVersion,
    state: watch::Receiver<ControllerState>,
    writes: Arc<RwLock<()>>,
}

impl EntryWriter {
    async fn store(&self, request: &FetchRequest, response: &FetchResponse) {
        if !is_cacheable(response) {
            tracing::debug!(url = %request.url, status = response.status.as_u16(), "response not cacheable");
            return;
        }
        let _writing = self.writes.read().await;
        let retired = *self.state.borrow() == ControllerState::Redundant;
        if retired {
            tracing::debug!(url = %request.url, version = %self.version, "controller redundant; dropping write");
            return;
        }

        match self.db.put_entry(&self.version, &response.to_entry(request)).await {
            Ok(()) => tracing::debug!(url = %request.url, version = %self.version, "cache entry stored"),
            Err(Error::StoreMissing(store)) => {
                tracing::debug!(url = %request.url, store = %store, "store purged; dropping write")
            }
            Err(e) => tracing::debug!(url = %request.url, error = %e, "cache write failed"),
        }
    }
}
