//! In-process network with canned responses.
//!
//! Routes are keyed by absolute URL. Unknown URLs answer `404 Not Found`.
//! The gate holds every in-flight request until it is reopened, which lets
//! callers observe what happens while the network is slow or hung.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use tokio::sync::watch;

use super::{FetchRequest, FetchResponse, Network};
use ks_offline_core::Error;

#[derive(Debug, Clone)]
enum Route {
    Respond { status: StatusCode, headers: HeaderMap, body: Bytes },
    Fail(String),
}

/// A `Network` that never leaves the process.
#[derive(Debug)]
pub struct MemoryNetwork {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<(Method, Url)>>,
    gate: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self { routes: Mutex::new(HashMap::new()), requests: Mutex::new(Vec::new()), gate }
    }

    /// Answer `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.respond_with(url, status, &[], body);
    }

    /// Answer `url` with `status`, extra headers and `body`.
    pub fn respond_with(&self, url: &str, status: u16, headers: &[(&str, &str)], body: impl Into<Bytes>) {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                map.append(name, value);
            }
        }
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        lock(&self.routes).insert(url.to_string(), Route::Respond { status, headers: map, body: body.into() });
    }

    /// Make requests for `url` fail as if the connection dropped.
    pub fn fail(&self, url: &str, reason: &str) {
        lock(&self.routes).insert(url.to_string(), Route::Fail(reason.to_string()));
    }

    /// Hold every request until `resume` is called.
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<(Method, Url)> {
        lock(&self.requests).clone()
    }

    /// Number of requests received for `url`, any method.
    pub fn request_count(&self, url: &str) -> usize {
        lock(&self.requests).iter().filter(|(_, u)| u.as_str() == url).count()
    }
}

#[async_trait::async_trait]
impl Network for MemoryNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        lock(&self.requests).push((request.method.clone(), request.url.clone()));

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(Error::Network("network shut down".into()));
        }

        let route = lock(&self.routes).get(request.url.as_str()).cloned();
        match route {
            Some(Route::Respond { status, headers, body }) => {
                Ok(FetchResponse { url: request.url.clone(), status, headers, bytes: body, fetch_ms: 0 })
            }
            Some(Route::Fail(reason)) => Err(Error::Network(format!("{} {}: {reason}", request.method, request.url))),
            None => Ok(FetchResponse {
                url: request.url.clone(),
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                bytes: Bytes::new(),
                fetch_ms: 0,
            }),
        }
    }
}
