//! In-process stand-ins for the transport and refresh endpoint

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use http::header;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::{
    envelope::Attempt,
    transport::{Transport, TransportFailure},
    CredentialPair, RefreshEndpoint, RefreshTokenRef,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("stub failure: {0}")]
pub struct StubError(pub &'static str);

/// A request as the stub transport saw it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seen {
    pub uri: String,
    pub authorization: Option<String>,
    pub attempt: u32,
}

/// Answers `Ok("<uri>")` unless the bearer token is on the expired list
/// or the URI is on the broken list
///
/// Requests without a token are accepted unless anonymous rejection is on,
/// in which case they get the same answer as an expired token.
#[derive(Debug, Default)]
pub struct StubTransport {
    expired: Mutex<HashSet<String>>,
    reject_anonymous: AtomicBool,
    broken: Mutex<HashSet<String>>,
    seen: Mutex<Vec<Seen>>,
}

impl StubTransport {
    pub fn expiring(tokens: &[&str]) -> Arc<Self> {
        let transport = Self::default();
        transport
            .expired
            .lock()
            .unwrap()
            .extend(tokens.iter().map(|t| format!("Bearer {}", t)));
        Arc::new(transport)
    }

    pub fn break_uri(&self, uri: &str) {
        self.broken.lock().unwrap().insert(uri.to_owned());
    }

    pub fn reject_anonymous(&self) {
        self.reject_anonymous.store(true, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_for(&self, uri: &str) -> Vec<Seen> {
        self.seen().into_iter().filter(|s| s.uri == uri).collect()
    }
}

#[async_trait]
impl Transport for StubTransport {
    type Response = String;
    type Error = StubError;

    async fn call(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<Self::Response, TransportFailure<Self::Error>> {
        let uri = request.uri().to_string();
        let authorization = request
            .headers()
            .get(header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_owned());
        let attempt = request
            .extensions()
            .get::<Attempt>()
            .copied()
            .unwrap_or_default();

        self.seen.lock().unwrap().push(Seen {
            uri: uri.clone(),
            authorization: authorization.clone(),
            attempt: attempt.0,
        });

        // Give other in-flight requests a chance to interleave.
        tokio::task::yield_now().await;

        if self.broken.lock().unwrap().contains(&uri) {
            return Err(TransportFailure::Failed(StubError("broken uri")));
        }

        match authorization {
            Some(auth) if self.expired.lock().unwrap().contains(&auth) => {
                Err(TransportFailure::AuthExpired)
            }
            None if self.reject_anonymous.load(Ordering::SeqCst) => {
                Err(TransportFailure::AuthExpired)
            }
            _ => Ok(uri),
        }
    }
}

/// A refresh endpoint that holds every call until released
#[derive(Debug)]
pub struct StubEndpoint {
    result: Result<CredentialPair, StubError>,
    gate: Semaphore,
    released: AtomicBool,
    calls: AtomicUsize,
    received: Mutex<Vec<String>>,
}

impl StubEndpoint {
    pub fn succeeding(access_token: &'static str, refresh_token: &'static str) -> Self {
        Self::with_result(Ok(CredentialPair::new(access_token, refresh_token)))
    }

    pub fn failing() -> Self {
        Self::with_result(Err(StubError("refresh token revoked")))
    }

    fn with_result(result: Result<CredentialPair, StubError>) -> Self {
        Self {
            result,
            gate: Semaphore::new(0),
            released: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Lets calls through immediately
    pub fn released(self) -> Self {
        self.release();
        self
    }

    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.gate.add_permits(1_000);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl RefreshEndpoint for Arc<StubEndpoint> {
    type Error = StubError;

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<CredentialPair, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received
            .lock()
            .unwrap()
            .push(refresh_token.as_str().to_owned());

        let _permit = self.gate.acquire().await.unwrap();

        self.result.clone()
    }
}

/// Yields until `condition` holds
pub async fn until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}
