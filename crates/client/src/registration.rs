//! Registration: the lifecycle dispatcher for one scope.
//!
//! Holds at most one installing, one waiting and one active controller,
//! plus the open client sessions. Lifecycle operations (register, activate,
//! resume) are serialized; fetches run concurrently with them and with
//! each other.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use ks_offline_core::{AssetManifest, CacheDb, CacheVersion, Error};

use crate::controller::{ActivateOutcome, ControllerState, Host, OfflineController, Served, passthrough};
use crate::fetch::FetchRequest;

/// Handle for an open client session (a page of the application).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Snapshot of one controller for status reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub id: u64,
    pub version: String,
    pub state: ControllerState,
}

impl From<&OfflineController> for ControllerInfo {
    fn from(controller: &OfflineController) -> Self {
        Self { id: controller.id(), version: controller.version().to_string(), state: controller.state() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    pub scope: String,
    pub installing: Option<ControllerInfo>,
    pub waiting: Option<ControllerInfo>,
    pub active: Option<ControllerInfo>,
    pub clients: usize,
    pub controlled_clients: usize,
}

/// Result of [`Registration::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub controller: ControllerInfo,
    /// Entries written by the install.
    pub entries: usize,
    /// Present when the new controller was activated right away.
    pub activated: Option<ActivateOutcome>,
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<OfflineController>>,
    waiting: Option<Arc<OfflineController>>,
    active: Option<Arc<OfflineController>>,
    /// Open sessions and the id of the controller they are bound to.
    clients: BTreeMap<ClientId, Option<u64>>,
}

/// Lifecycle dispatcher for a single scope.
pub struct Registration {
    host: Host,
    skip_waiting: bool,
    lifecycle: Mutex<()>,
    slots: RwLock<Slots>,
    next_controller: AtomicU64,
    next_client: AtomicU64,
}

impl Registration {
    pub fn new(host: Host) -> Self {
        Self {
            host,
            skip_waiting: true,
            lifecycle: Mutex::new(()),
            slots: RwLock::new(Slots::default()),
            next_controller: AtomicU64::new(1),
            next_client: AtomicU64::new(1),
        }
    }

    /// Whether newly installed controllers take over without waiting.
    pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
        self.skip_waiting = skip_waiting;
        self
    }

    pub fn scope(&self) -> &Url {
        &self.host.scope
    }

    pub fn db(&self) -> &CacheDb {
        &self.host.db
    }

    /// Re-attach to a version installed by an earlier process.
    ///
    /// Only a version that was activated before is resumed; a version left
    /// waiting returns `None`, as does a missing or half-installed store.
    /// Stores of other versions left behind by an interrupted purge are
    /// deleted. Nothing is fetched.
    pub async fn resume(&self, version: CacheVersion, manifest: AssetManifest) -> Result<Option<ControllerInfo>, Error> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(active) = &self.slots.read().await.active {
            return Err(Error::InvalidState(format!("controller {} is already active", active.id())));
        }
        if !self.host.db.is_activated(&version).await? {
            tracing::debug!(version = %version, "no activated store to resume");
            return Ok(None);
        }

        let id = self.next_controller.fetch_add(1, Ordering::Relaxed);
        let controller = Arc::new(OfflineController::resumed(id, version, manifest, self.host.clone()));
        controller.purge_stale_stores().await?;
        let info = ControllerInfo::from(controller.as_ref());

        let mut slots = self.slots.write().await;
        slots.active = Some(controller);
        tracing::info!(controller = id, version = %info.version, "resumed installed controller");
        Ok(Some(info))
    }

    /// Install a new controller for `version` and, when allowed, activate it.
    ///
    /// On install failure the registration is unchanged: the previously
    /// active controller keeps serving and its store is untouched.
    pub async fn register(&self, version: CacheVersion, manifest: AssetManifest) -> Result<RegisterOutcome, Error> {
        let _lifecycle = self.lifecycle.lock().await;

        let id = self.next_controller.fetch_add(1, Ordering::Relaxed);
        let controller = Arc::new(
            OfflineController::new(id, version, manifest, self.host.clone()).with_skip_waiting(self.skip_waiting),
        );
        self.slots.write().await.installing = Some(Arc::clone(&controller));

        let installed = controller.install().await;
        let mut slots = self.slots.write().await;
        slots.installing = None;
        let outcome = installed?;

        if let Some(replaced) = slots.waiting.replace(Arc::clone(&controller)) {
            tracing::debug!(controller = replaced.id(), by = id, "waiting controller replaced");
            replaced.retire().await;
        }
        let take_over = outcome.skip_waiting || slots.active.is_none();
        drop(slots);

        let activated = if take_over { Some(self.activate(&controller).await?) } else { None };

        Ok(RegisterOutcome { controller: ControllerInfo::from(controller.as_ref()), entries: outcome.entries, activated })
    }

    /// Activate the waiting controller.
    ///
    /// Also retries an activation whose purge failed earlier.
    pub async fn activate_waiting(&self) -> Result<ActivateOutcome, Error> {
        let _lifecycle = self.lifecycle.lock().await;

        let waiting = self.slots.read().await.waiting.clone();
        match waiting {
            Some(controller) => self.activate(&controller).await,
            None => Err(Error::InvalidState("no controller is waiting".into())),
        }
    }

    async fn activate(&self, controller: &Arc<OfflineController>) -> Result<ActivateOutcome, Error> {
        controller.activate(|| self.claim(Arc::clone(controller))).await
    }

    /// Make `controller` the active one and bind every open client to it.
    async fn claim(&self, controller: Arc<OfflineController>) -> usize {
        let mut slots = self.slots.write().await;

        if slots.waiting.as_ref().is_some_and(|w| w.id() == controller.id()) {
            slots.waiting = None;
        }
        if let Some(previous) = slots.active.replace(Arc::clone(&controller))
            && previous.id() != controller.id()
        {
            previous.retire().await;
        }

        for bound in slots.clients.values_mut() {
            *bound = Some(controller.id());
        }
        slots.clients.len()
    }

    /// Open a client session. It is controlled by the active controller if
    /// there is one, and stays uncontrolled until the next claim otherwise.
    pub async fn open_client(&self) -> ClientId {
        let id = ClientId(self.next_client.fetch_add(1, Ordering::Relaxed));
        let mut slots = self.slots.write().await;
        let controller = slots.active.as_ref().map(|c| c.id());
        slots.clients.insert(id, controller);
        tracing::debug!(client = %id, controlled = controller.is_some(), "client opened");
        id
    }

    pub async fn close_client(&self, client: ClientId) -> bool {
        self.slots.write().await.clients.remove(&client).is_some()
    }

    /// Route a request to the controller of `client`.
    ///
    /// Without a client the request is treated as a navigation and goes to
    /// the active controller. Uncontrolled clients bypass the cache.
    pub async fn fetch(&self, client: Option<ClientId>, request: FetchRequest) -> Result<Served, Error> {
        let controller = {
            let slots = self.slots.read().await;
            let bound = match client {
                None => slots.active.as_ref().map(|c| c.id()),
                Some(id) => *slots
                    .clients
                    .get(&id)
                    .ok_or_else(|| Error::InvalidInput(format!("unknown client: {id}")))?,
            };
            slots.active.clone().filter(|active| Some(active.id()) == bound)
        };

        match controller {
            Some(controller) if controller.ready().await => controller.handle_fetch(request).await,
            _ => passthrough(self.host.network.as_ref(), request).await,
        }
    }

    pub async fn status(&self) -> RegistrationStatus {
        let slots = self.slots.read().await;
        let active = slots.active.as_ref().map(|c| c.id());
        RegistrationStatus {
            scope: self.host.scope.to_string(),
            installing: slots.installing.as_deref().map(ControllerInfo::from),
            waiting: slots.waiting.as_deref().map(ControllerInfo::from),
            active: slots.active.as_deref().map(ControllerInfo::from),
            clients: slots.clients.len(),
            controlled_clients: slots.clients.values().filter(|c| c.is_some() && **c == active).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ResponseSource;
    use crate::fetch::MemoryNetwork;
    use bytes::Bytes;
    use ks_offline_core::CacheEntry;

    const ORIGIN: &str = "https://krishi.example";

    fn url(path: &str) -> String {
        format!("{ORIGIN}{path}")
    }

    fn v(name: &str) -> CacheVersion {
        CacheVersion::new(name).unwrap()
    }

    fn get(path: &str) -> FetchRequest {
        FetchRequest::get(Url::parse(&url(path)).unwrap())
    }

    fn manifest() -> AssetManifest {
        AssetManifest::new(["./", "./app.js"])
    }

    async fn setup() -> (Host, Arc<MemoryNetwork>) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = Arc::new(MemoryNetwork::new());
        network.respond(&url("/"), 200, "<html>v1</html>");
        network.respond(&url("/app.js"), 200, "console.log(1)");
        let host = Host::new(Url::parse(&url("/")).unwrap(), db, network.clone());
        (host, network)
    }

    #[tokio::test]
    async fn test_first_register_activates() {
        let (host, _network) = setup().await;
        let registration = Registration::new(host);

        let outcome = registration.register(v("v1"), manifest()).await.unwrap();
        assert_eq!(outcome.entries, 2);
        assert_eq!(outcome.controller.state, ControllerState::Active);
        assert!(outcome.activated.is_some());

        let status = registration.status().await;
        assert_eq!(status.active.unwrap().version, "v1");
        assert!(status.waiting.is_none());
        assert!(status.installing.is_none());
    }

    #[tokio::test]
    async fn test_upgrade_purges_previous_version() {
        let (host, network) = setup().await;
        let registration = Registration::new(host);
        registration.register(v("v1"), manifest()).await.unwrap();

        network.respond(&url("/"), 200, "<html>v2</html>");
        let outcome = registration.register(v("v2"), manifest()).await.unwrap();
        let activated = outcome.activated.unwrap();
        assert_eq!(activated.purged, vec!["v1".to_string()]);

        let stores = registration.db().list_stores().await.unwrap();
        assert_eq!(stores.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["v2"]);

        let served = registration.fetch(None, get("/")).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(served.response.bytes, Bytes::from_static(b"<html>v2</html>"));
    }

    #[tokio::test]
    async fn test_failed_upgrade_keeps_previous_version() {
        let (host, network) = setup().await;
        let registration = Registration::new(host);
        registration.register(v("v1"), manifest()).await.unwrap();

        network.fail(&url("/app.js"), "connection reset");
        let result = registration.register(v("v2"), manifest()).await;
        assert!(matches!(result, Err(Error::InstallFailed { .. })));

        let status = registration.status().await;
        assert_eq!(status.active.unwrap().version, "v1");
        assert!(status.waiting.is_none());
        assert!(registration.db().is_installed(&v("v1")).await.unwrap());
        assert!(!registration.db().has_store(&v("v2")).await.unwrap());

        let served = registration.fetch(None, get("/app.js")).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(served.response.bytes, Bytes::from_static(b"console.log(1)"));
    }

    #[tokio::test]
    async fn test_without_skip_waiting_new_version_waits() {
        let (host, _network) = setup().await;
        let registration = Registration::new(host).with_skip_waiting(false);
        registration.register(v("v1"), manifest()).await.unwrap();

        let outcome = registration.register(v("v2"), manifest()).await.unwrap();
        assert!(outcome.activated.is_none());
        assert_eq!(outcome.controller.state, ControllerState::Waiting);

        let status = registration.status().await;
        assert_eq!(status.active.unwrap().version, "v1");
        assert_eq!(status.waiting.unwrap().version, "v2");
        assert!(registration.db().has_store(&v("v1")).await.unwrap());

        let activated = registration.activate_waiting().await.unwrap();
        assert_eq!(activated.purged, vec!["v1".to_string()]);
        assert_eq!(registration.status().await.active.unwrap().version, "v2");
    }

    #[tokio::test]
    async fn test_newer_waiting_replaces_older() {
        let (host, _network) = setup().await;
        let registration = Registration::new(host).with_skip_waiting(false);
        registration.register(v("v1"), manifest()).await.unwrap();
        let v2 = registration.register(v("v2"), manifest()).await.unwrap();
        let v3 = registration.register(v("v3"), manifest()).await.unwrap();

        let status = registration.status().await;
        assert_eq!(status.waiting.as_ref().unwrap().id, v3.controller.id);
        assert_ne!(v2.controller.id, v3.controller.id);

        let activated = registration.activate_waiting().await.unwrap();
        let mut purged = activated.purged;
        purged.sort();
        assert_eq!(purged, vec!["v1".to_string(), "v2".to_string()]);
    }

    #[tokio::test]
    async fn test_activate_without_waiting() {
        let (host, _network) = setup().await;
        let registration = Registration::new(host);
        assert!(matches!(registration.activate_waiting().await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_uncontrolled_client_until_claim() {
        let (host, network) = setup().await;
        let registration = Registration::new(host);

        let early = registration.open_client().await;
        let before = registration.fetch(Some(early), get("/")).await.unwrap();
        assert_eq!(before.source, ResponseSource::Passthrough);

        let outcome = registration.register(v("v1"), manifest()).await.unwrap();
        assert_eq!(outcome.activated.unwrap().claimed, 1);

        network.fail(&url("/"), "offline");
        let after = registration.fetch(Some(early), get("/")).await.unwrap();
        assert_eq!(after.source, ResponseSource::Cache);
        assert_eq!(after.response.bytes, Bytes::from_static(b"<html>v1</html>"));

        let status = registration.status().await;
        assert_eq!(status.clients, 1);
        assert_eq!(status.controlled_clients, 1);
    }

    #[tokio::test]
    async fn test_client_opened_after_activation_is_controlled() {
        let (host, _network) = setup().await;
        let registration = Registration::new(host);
        registration.register(v("v1"), manifest()).await.unwrap();

        let client = registration.open_client().await;
        let served = registration.fetch(Some(client), get("/app.js")).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);

        assert!(registration.close_client(client).await);
        assert!(!registration.close_client(client).await);
        assert!(matches!(registration.fetch(Some(client), get("/")).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_no_active_controller_passes_through() {
        let (host, _network) = setup().await;
        let registration = Registration::new(host);
        let served = registration.fetch(None, get("/")).await.unwrap();
        assert_eq!(served.source, ResponseSource::Passthrough);
        assert_eq!(registration.db().list_stores().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_resume_across_registrations() {
        let (host, network) = setup().await;
        Registration::new(host.clone()).register(v("v1"), manifest()).await.unwrap();
        let fetched = network.requests().len();

        let restarted = Registration::new(host);
        let info = restarted.resume(v("v1"), manifest()).await.unwrap().unwrap();
        assert_eq!(info.state, ControllerState::Active);
        assert_eq!(network.requests().len(), fetched);

        network.fail(&url("/"), "offline");
        let served = restarted.fetch(None, get("/")).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
    }

    #[tokio::test]
    async fn test_resume_requires_installed_store() {
        let (host, _network) = setup().await;
        host.db.open_store(&v("half")).await.unwrap();
        let registration = Registration::new(host);
        assert!(registration.resume(v("half"), manifest()).await.unwrap().is_none());
        assert!(registration.resume(v("missing"), manifest()).await.unwrap().is_none());
        assert!(registration.status().await.active.is_none());
    }

    #[tokio::test]
    async fn test_resume_skips_waiting_version() {
        let (host, _network) = setup().await;
        let registration = Registration::new(host.clone()).with_skip_waiting(false);
        registration.register(v("v1"), manifest()).await.unwrap();
        registration.register(v("v2"), manifest()).await.unwrap();

        let restarted = Registration::new(host);
        assert!(restarted.resume(v("v2"), manifest()).await.unwrap().is_none());
        assert!(restarted.status().await.active.is_none());

        let info = restarted.resume(v("v1"), manifest()).await.unwrap().unwrap();
        assert_eq!(info.state, ControllerState::Active);
        let stores: Vec<_> = restarted.db().list_stores().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(stores, vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_resume_purges_leftover_stores() {
        let (host, _network) = setup().await;
        Registration::new(host.clone()).register(v("v2"), manifest()).await.unwrap();
        let leftover = CacheEntry::new("GET", &url("/"), 200, Vec::new(), b"old".to_vec());
        host.db.install_store(&v("v1"), &[leftover]).await.unwrap();

        let restarted = Registration::new(host);
        let info = restarted.resume(v("v2"), manifest()).await.unwrap().unwrap();
        assert_eq!(info.version, "v2");
        let stores: Vec<_> = restarted.db().list_stores().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(stores, vec!["v2".to_string()]);
    }
}
