use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::{
    coordinator::{RefreshConfig, RefreshCoordinator, RefreshError},
    dispatcher::{Dispatched, RequestDispatcher},
    endpoints::RefreshEndpoint,
    session::{NoopSessionSink, SessionSink, SessionTerminator},
    stores::{BoxError, CredentialStore, InMemoryCredentialStore},
    transport::{Transport, TransportFailure},
    CredentialPair, Credentials, RequestEnvelope,
};

/// Why a request sent through a [`GatewayClient`] failed
///
/// An expired access token on a first attempt never surfaces here: the
/// caller instead receives the outcome of the replayed request.
#[derive(Debug, Error)]
pub enum GatewayError<E> {
    /// The access token expired and could not be refreshed, ending the session
    #[error("session ended: unable to refresh credentials")]
    RefreshFailed(#[source] Arc<RefreshError>),
    /// The request was rejected for lacking credentials while no access token
    /// was stored
    #[error("request requires credentials but none are stored")]
    Unauthenticated,
    /// The access token was reported expired again after the request was replayed
    #[error("access token expired again after the request was replayed")]
    AlreadyRetried,
    /// The transport failed for a reason unrelated to token expiry
    #[error(transparent)]
    Transport(E),
}

/// A client that keeps requests correct across access token rotation
///
/// Every request carries the current access token. A request rejected
/// because that token expired waits for a single shared refresh and is then
/// replayed once with the refreshed token. Cloning is cheap; clones share
/// the same refresh coordinator.
pub struct GatewayClient<T, E> {
    dispatcher: Arc<RequestDispatcher<T>>,
    coordinator: Arc<RefreshCoordinator<E>>,
}

impl<T, E> GatewayClient<T, E>
where
    T: Transport,
    E: RefreshEndpoint + 'static,
{
    /// Starts building a client
    ///
    /// Unless configured otherwise, credentials are kept in memory and the
    /// end of a session is not reported anywhere.
    pub fn builder(transport: T, endpoint: E) -> GatewayClientBuilder<T, E> {
        GatewayClientBuilder {
            transport,
            endpoint,
            store: Arc::new(InMemoryCredentialStore::new()),
            sink: Arc::new(NoopSessionSink),
            config: RefreshConfig::default(),
        }
    }

    /// Sends a request, refreshing the access token and replaying the request
    /// once if the server reports that the token expired
    pub async fn send(
        &self,
        envelope: RequestEnvelope,
    ) -> Result<T::Response, GatewayError<T::Error>> {
        let Dispatched { authorized, result } = self.dispatcher.send(&envelope).await;
        match result {
            Err(TransportFailure::AuthExpired) if !authorized => {
                tracing::debug!(
                    method = %envelope.method(),
                    uri = %envelope.uri(),
                    "request without an access token was rejected"
                );
                return Err(GatewayError::Unauthenticated);
            }
            Err(TransportFailure::AuthExpired) if !envelope.is_replay() => {}
            first => return settle(first, &envelope),
        }

        let access_token = self
            .coordinator
            .refreshed_token()
            .await
            .map_err(GatewayError::RefreshFailed)?;

        let replay = envelope.replay();
        tracing::debug!(
            method = %replay.method(),
            uri = %replay.uri(),
            attempt = replay.attempt().0,
            "replaying request with refreshed access token"
        );

        let second = self.dispatcher.send_with(&replay, &access_token).await;
        settle(second, &replay)
    }

    /// Stores credentials obtained from a sign-in
    ///
    /// This also re-enables session-end notification.
    pub async fn login(&self, credentials: CredentialPair) -> Result<(), BoxError> {
        let saved = self.coordinator.store().save(credentials).await;
        self.coordinator.terminator().rearm();
        saved
    }

    /// Discards the stored credentials without reporting the end of the session
    pub async fn logout(&self) -> Result<(), BoxError> {
        self.coordinator.store().clear().await
    }

    /// The credentials currently stored
    pub async fn credentials(&self) -> Credentials {
        self.coordinator.store().load().await
    }

    /// The dispatcher attaching tokens to outgoing requests
    pub fn dispatcher(&self) -> &RequestDispatcher<T> {
        &self.dispatcher
    }

    /// The coordinator shared by all clones of this client
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator<E>> {
        &self.coordinator
    }
}

fn settle<R, E>(
    result: Result<R, TransportFailure<E>>,
    envelope: &RequestEnvelope,
) -> Result<R, GatewayError<E>> {
    match result {
        Ok(response) => Ok(response),
        Err(TransportFailure::Failed(error)) => Err(GatewayError::Transport(error)),
        Err(TransportFailure::AuthExpired) => {
            tracing::warn!(
                method = %envelope.method(),
                uri = %envelope.uri(),
                attempt = envelope.attempt().0,
                "access token expired on a replayed request, giving up"
            );
            Err(GatewayError::AlreadyRetried)
        }
    }
}

impl<T, E> Clone for GatewayClient<T, E> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for GatewayClient<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("dispatcher", &self.dispatcher)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

/// Configures a [`GatewayClient`]
pub struct GatewayClientBuilder<T, E> {
    transport: T,
    endpoint: E,
    store: Arc<dyn CredentialStore>,
    sink: Arc<dyn SessionSink>,
    config: RefreshConfig,
}

impl<T, E> GatewayClientBuilder<T, E>
where
    T: Transport,
    E: RefreshEndpoint + 'static,
{
    /// Keeps credentials in `store`
    pub fn with_store(self, store: impl CredentialStore + 'static) -> Self {
        self.with_shared_store(Arc::new(store))
    }

    /// Keeps credentials in a store shared with other components
    pub fn with_shared_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = store;
        self
    }

    /// Reports the end of the session to `sink`
    pub fn with_session_sink(mut self, sink: impl SessionSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Configures refresh cycles
    pub fn with_refresh_config(mut self, config: RefreshConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the client
    pub fn build(self) -> GatewayClient<T, E> {
        let terminator = SessionTerminator::new(Arc::clone(&self.store), self.sink);
        let coordinator =
            RefreshCoordinator::new(self.endpoint, Arc::clone(&self.store), terminator, self.config);

        GatewayClient {
            dispatcher: Arc::new(RequestDispatcher::new(self.transport, self.store)),
            coordinator: Arc::new(coordinator),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for GatewayClientBuilder<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GatewayClientBuilder")
            .field("transport", &self.transport)
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
