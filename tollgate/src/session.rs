//! Ending a session once its credentials can no longer be refreshed

use std::{
    error, fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::sync::watch;

use crate::{stores::CredentialStore, RefreshError};

/// Receives notice that the session has ended
///
/// Typically this navigates the user back to a sign-in flow.
pub trait SessionSink: Send + Sync {
    /// Called once per fatal session termination
    fn session_ended(&self, reason: &RefreshError);
}

impl<F> SessionSink for F
where
    F: Fn(&RefreshError) + Send + Sync,
{
    fn session_ended(&self, reason: &RefreshError) {
        self(reason)
    }
}

/// A sink that ignores session termination
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSessionSink;

impl SessionSink for NoopSessionSink {
    #[inline]
    fn session_ended(&self, _: &RefreshError) {}
}

/// Whether the session is still usable
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Credentials are present or may still be refreshed
    Active,
    /// The session ended and the user must authenticate again
    Ended,
}

/// Creates a sink that publishes session status to any number of watchers
pub fn session_channel() -> (WatchSessionSink, SessionWatcher) {
    let (tx, rx) = watch::channel(SessionStatus::Active);
    (WatchSessionSink { tx }, SessionWatcher { rx })
}

/// A sink that publishes [`SessionStatus::Ended`] to its [`SessionWatcher`]s
#[derive(Debug)]
pub struct WatchSessionSink {
    tx: watch::Sender<SessionStatus>,
}

impl WatchSessionSink {
    /// Marks the session active again, such as after a new sign-in
    pub fn reactivate(&self) {
        self.tx.send_replace(SessionStatus::Active);
    }
}

impl SessionSink for WatchSessionSink {
    fn session_ended(&self, _: &RefreshError) {
        self.tx.send_replace(SessionStatus::Ended);
    }
}

/// Observes the status published by a [`WatchSessionSink`]
#[derive(Clone, Debug)]
pub struct SessionWatcher {
    rx: watch::Receiver<SessionStatus>,
}

impl SessionWatcher {
    /// The most recently published status
    pub fn status(&self) -> SessionStatus {
        *self.rx.borrow()
    }

    /// Waits until the session has ended
    ///
    /// Returns immediately if it already has. Returns an error if the sink
    /// was dropped without the session ending.
    pub async fn ended(&mut self) -> Result<(), SinkDropped> {
        self.rx
            .wait_for(|status| *status == SessionStatus::Ended)
            .await
            .map(drop)
            .map_err(|_| SinkDropped(()))
    }
}

/// The session sink was dropped, so no further status will be published
#[derive(Debug)]
pub struct SinkDropped(());

impl fmt::Display for SinkDropped {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("session sink dropped")
    }
}

impl error::Error for SinkDropped {}

/// Clears credentials and notifies the session sink when a refresh fails
///
/// Notification is collapsed: after one termination, further calls clear
/// the store again but do not notify until [`rearm()`][Self::rearm] is
/// called. The coordinator re-arms after a successful refresh and when a
/// refresh cycle finds that a refresh token was stored since the last
/// termination.
pub struct SessionTerminator {
    store: Arc<dyn CredentialStore>,
    sink: Arc<dyn SessionSink>,
    armed: AtomicBool,
}

impl SessionTerminator {
    /// Constructs a new, armed terminator
    pub fn new(store: Arc<dyn CredentialStore>, sink: Arc<dyn SessionSink>) -> Self {
        Self {
            store,
            sink,
            armed: AtomicBool::new(true),
        }
    }

    /// Ends the session
    pub async fn terminate(&self, reason: &RefreshError) {
        if let Err(error) = self.store.clear().await {
            tracing::warn!(
                error = (&*error as &dyn error::Error),
                "unable to clear persisted credentials"
            );
        }

        if self.armed.swap(false, Ordering::AcqRel) {
            tracing::warn!(
                reason = (reason as &dyn error::Error),
                "session ended, notifying sink"
            );
            self.sink.session_ended(reason);
        } else {
            tracing::debug!("session already ended, not notifying sink again");
        }
    }

    /// Allows the next termination to notify the sink
    pub fn rearm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Whether the next termination will notify the sink
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SessionTerminator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionTerminator")
            .field("armed", &self.is_armed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{stores::InMemoryCredentialStore, CredentialPair};

    fn counting_sink() -> (Arc<AtomicUsize>, Arc<dyn SessionSink>) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = {
            let count = Arc::clone(&count);
            move |_: &RefreshError| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        (count, Arc::new(sink))
    }

    #[tokio::test]
    async fn terminate_clears_the_store() {
        let store = Arc::new(InMemoryCredentialStore::with_credentials(
            CredentialPair::new("A1", "B1"),
        ));
        let terminator = SessionTerminator::new(store.clone(), Arc::new(NoopSessionSink));

        terminator.terminate(&RefreshError::MissingRefreshToken).await;

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_terminations_notify_once() {
        let (count, sink) = counting_sink();
        let terminator = SessionTerminator::new(Arc::new(InMemoryCredentialStore::new()), sink);

        terminator.terminate(&RefreshError::MissingRefreshToken).await;
        terminator.terminate(&RefreshError::MissingRefreshToken).await;
        terminator.terminate(&RefreshError::Abandoned).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!terminator.is_armed());
    }

    #[tokio::test]
    async fn rearmed_terminator_notifies_again() {
        let (count, sink) = counting_sink();
        let terminator = SessionTerminator::new(Arc::new(InMemoryCredentialStore::new()), sink);

        terminator.terminate(&RefreshError::MissingRefreshToken).await;
        terminator.rearm();
        terminator.terminate(&RefreshError::MissingRefreshToken).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn watcher_observes_the_end_of_the_session() {
        let (sink, mut watcher) = session_channel();
        assert_eq!(watcher.status(), SessionStatus::Active);

        let terminator =
            SessionTerminator::new(Arc::new(InMemoryCredentialStore::new()), Arc::new(sink));
        terminator.terminate(&RefreshError::MissingRefreshToken).await;

        watcher.ended().await.unwrap();
        assert_eq!(watcher.status(), SessionStatus::Ended);
    }

    #[tokio::test]
    async fn watcher_reports_a_dropped_sink() {
        let (sink, mut watcher) = session_channel();
        drop(sink);

        assert!(watcher.ended().await.is_err());
    }
}
