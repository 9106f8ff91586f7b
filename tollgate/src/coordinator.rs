//! Coordinating a single refresh among concurrent requests

use std::{
    error, fmt, mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    endpoints::RefreshEndpoint, session::SessionTerminator, stores::CredentialStore, AccessToken,
    CredentialPair,
};

/// Why a refresh did not produce new credentials
///
/// Every variant ends the session, except [`Abandoned`][Self::Abandoned].
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The store holds no refresh token to exchange
    #[error("no refresh token available")]
    MissingRefreshToken,
    /// The refresh endpoint failed or rejected the refresh token
    #[error("refresh endpoint failed")]
    Endpoint(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The refresh endpoint did not answer in time
    #[error("refresh endpoint did not answer within {0:?}")]
    TimedOut(Duration),
    /// The refresh task stopped before reporting an outcome
    #[error("refresh stopped before producing an outcome")]
    Abandoned,
}

/// The result of one refresh cycle as seen by each waiting request
///
/// On success this is the access token minted by that cycle. On failure
/// every waiter shares the same error.
pub type RefreshOutcome = Result<AccessToken, Arc<RefreshError>>;

/// Configuration for refresh cycles
#[derive(Clone, Debug, Default)]
pub struct RefreshConfig {
    timeout: Option<Duration>,
}

impl RefreshConfig {
    /// Constructs a configuration without a refresh timeout
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Fails a refresh whose endpoint call takes longer than `timeout`
    ///
    /// A timed-out refresh ends the session like any other failed refresh.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The refresh timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

/// Ensures that at most one refresh is in flight at any time
///
/// The first request to report an expired access token while no refresh is
/// in flight starts a refresh cycle. Requests reporting expiry while the
/// cycle runs join its queue instead of starting their own. When the cycle
/// ends, the queue is drained in full before the coordinator goes idle:
/// every waiter receives the new access token, or every waiter receives the
/// same error.
///
/// The refresh itself runs on a spawned task, so a waiter that gives up
/// does not strand the others.
pub struct RefreshCoordinator<E> {
    endpoint: E,
    store: Arc<dyn CredentialStore>,
    terminator: SessionTerminator,
    config: RefreshConfig,
    state: Mutex<RefreshState>,
    refreshes: AtomicU64,
}

impl<E> RefreshCoordinator<E> {
    /// Constructs an idle coordinator
    pub fn new(
        endpoint: E,
        store: Arc<dyn CredentialStore>,
        terminator: SessionTerminator,
        config: RefreshConfig,
    ) -> Self {
        Self {
            endpoint,
            store,
            terminator,
            config,
            state: Mutex::new(RefreshState::Idle),
            refreshes: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a refresh cycle is in flight
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    /// The number of requests waiting on the current cycle, including the
    /// one that started it
    pub fn queued(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// The number of calls made to the refresh endpoint so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Acquire)
    }

    /// The terminator invoked when a refresh fails
    pub fn terminator(&self) -> &SessionTerminator {
        &self.terminator
    }

    /// The store that refreshed credentials are saved to
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    fn finish(&self, outcome: RefreshOutcome) {
        let mut state = self.lock_state();
        let waiters = match mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Idle => Vec::new(),
            RefreshState::Refreshing { waiters } => waiters,
        };

        tracing::debug!(
            waiters = waiters.len(),
            refreshed = outcome.is_ok(),
            "refresh cycle complete, releasing waiters"
        );

        for waiter in waiters {
            if waiter.send(outcome.clone()).is_err() {
                tracing::trace!("waiter gave up before the refresh completed");
            }
        }
    }
}

impl<E: RefreshEndpoint + 'static> RefreshCoordinator<E> {
    /// Waits for the access token minted by the current refresh cycle,
    /// starting one if none is in flight
    pub async fn refreshed_token(self: &Arc<Self>) -> RefreshOutcome {
        let (tx, rx) = oneshot::channel();

        let starts_cycle = {
            let mut state = self.lock_state();
            match &mut *state {
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing { waiters: vec![tx] };
                    true
                }
                RefreshState::Refreshing { waiters } => {
                    waiters.push(tx);
                    tracing::debug!(
                        queued = waiters.len(),
                        "refresh already in flight, queueing request"
                    );
                    false
                }
            }
        };

        if starts_cycle {
            tracing::debug!("access token expired, starting refresh cycle");
            tokio::spawn(Arc::clone(self).run_cycle());
        }

        rx.await
            .unwrap_or_else(|_| Err(Arc::new(RefreshError::Abandoned)))
    }

    async fn run_cycle(self: Arc<Self>) {
        let cycle = CycleGuard {
            coordinator: &self,
            finished: false,
        };

        let outcome = match self.refresh_credentials().await {
            Ok(credentials) => {
                let access_token = credentials.access_token().to_owned();
                if let Err(error) = self.store.save(credentials).await {
                    tracing::warn!(
                        error = (&*error as &dyn error::Error),
                        "unable to persist refreshed credentials"
                    );
                }
                self.terminator.rearm();
                tracing::info!(
                    token = format_args!("{:#?}", access_token),
                    "access token refreshed"
                );
                Ok(access_token)
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "refresh failed, ending session"
                );
                self.terminator.terminate(&error).await;
                Err(Arc::new(error))
            }
        };

        cycle.finish(outcome);
    }

    async fn refresh_credentials(&self) -> Result<CredentialPair, RefreshError> {
        let refresh_token = self
            .store
            .load()
            .await
            .refresh_token()
            .map(ToOwned::to_owned)
            .ok_or(RefreshError::MissingRefreshToken)?;

        // Terminating clears the store, so a refresh token found here was
        // saved by a sign-in after the last termination.
        if !self.terminator.is_armed() {
            tracing::debug!(
                "credentials stored since the session ended, re-enabling notification"
            );
            self.terminator.rearm();
        }

        self.refreshes.fetch_add(1, Ordering::AcqRel);
        let exchange = self.endpoint.refresh(&refresh_token);
        let result = match self.config.timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| RefreshError::TimedOut(timeout))?,
            None => exchange.await,
        };

        result.map_err(|error| RefreshError::Endpoint(Box::new(error)))
    }
}

/// Releases the waiters of a cycle even if the refresh task dies
struct CycleGuard<'a, E> {
    coordinator: &'a RefreshCoordinator<E>,
    finished: bool,
}

impl<E> CycleGuard<'_, E> {
    fn finish(mut self, outcome: RefreshOutcome) {
        self.finished = true;
        self.coordinator.finish(outcome);
    }
}

impl<E> Drop for CycleGuard<'_, E> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::error!("refresh task stopped without an outcome");
            self.coordinator.finish(Err(Arc::new(RefreshError::Abandoned)));
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for RefreshCoordinator<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("endpoint", &self.endpoint)
            .field("terminator", &self.terminator)
            .field("config", &self.config)
            .field("queued", &self.queued())
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}
