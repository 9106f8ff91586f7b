use std::{fmt, sync::Arc};

use bytes::{BufMut, BytesMut};
use http::header::HeaderValue;

use crate::{
    stores::CredentialStore,
    transport::{Transport, TransportFailure},
    AccessTokenRef, RequestEnvelope,
};

/// The transport's answer to a request sent by [`RequestDispatcher::send`]
#[derive(Debug)]
pub struct Dispatched<R, E> {
    /// Whether the request carried an access token
    pub authorized: bool,
    /// What the transport returned
    pub result: Result<R, TransportFailure<E>>,
}

/// Attaches the current access token to every outgoing request
///
/// When the store holds no access token the request is still sent, without
/// an `Authorization` header, and the server's rejection flows back to the
/// caller like any other failure.
pub struct RequestDispatcher<T> {
    transport: T,
    store: Arc<dyn CredentialStore>,
}

impl<T: Transport> RequestDispatcher<T> {
    /// Constructs a dispatcher reading tokens from `store`
    pub fn new(transport: T, store: Arc<dyn CredentialStore>) -> Self {
        Self { transport, store }
    }

    /// Sends `envelope` with the stored access token
    ///
    /// The result records whether a token was attached, so that a rejection
    /// of an unauthenticated request is not mistaken for token expiry.
    pub async fn send(&self, envelope: &RequestEnvelope) -> Dispatched<T::Response, T::Error> {
        let credentials = self.store.load().await;
        let authorization = match credentials.access_token() {
            Some(access_token) => bearer(access_token),
            None => {
                tracing::debug!(
                    method = %envelope.method(),
                    uri = %envelope.uri(),
                    "no access token stored, sending without authorization"
                );
                None
            }
        };

        Dispatched {
            authorized: authorization.is_some(),
            result: self.dispatch(envelope, authorization).await,
        }
    }

    /// Sends `envelope` with the given access token rather than the stored one
    pub async fn send_with(
        &self,
        envelope: &RequestEnvelope,
        access_token: &AccessTokenRef,
    ) -> Result<T::Response, TransportFailure<T::Error>> {
        self.dispatch(envelope, bearer(access_token)).await
    }

    async fn dispatch(
        &self,
        envelope: &RequestEnvelope,
        authorization: Option<HeaderValue>,
    ) -> Result<T::Response, TransportFailure<T::Error>> {
        tracing::trace!(
            method = %envelope.method(),
            uri = %envelope.uri(),
            attempt = envelope.attempt().0,
            authorized = authorization.is_some(),
            "dispatching request"
        );

        self.transport.call(envelope.to_http(authorization)).await
    }
}

/// Formats a sensitive bearer `Authorization` value
///
/// Tokens containing bytes that cannot appear in a header are not sent.
fn bearer(access_token: &AccessTokenRef) -> Option<HeaderValue> {
    let mut header_value = BytesMut::with_capacity(access_token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(access_token.as_str().as_bytes());
    match HeaderValue::from_maybe_shared(header_value.freeze()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("access token is not a valid header value, sending without authorization");
            None
        }
    }
}

impl<T> fmt::Debug for RequestDispatcher<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{header, Uri};

    use super::*;
    use crate::{
        stores::InMemoryCredentialStore, test_util::StubError, CredentialPair, Credentials,
        RefreshToken,
    };

    #[derive(Debug, Default)]
    struct Capture {
        authorization: Mutex<Vec<Option<HeaderValue>>>,
    }

    #[async_trait]
    impl Transport for Capture {
        type Response = ();
        type Error = StubError;

        async fn call(
            &self,
            request: http::Request<Bytes>,
        ) -> Result<(), TransportFailure<StubError>> {
            self.authorization
                .lock()
                .unwrap()
                .push(request.headers().get(header::AUTHORIZATION).cloned());
            Ok(())
        }
    }

    fn envelope() -> RequestEnvelope {
        RequestEnvelope::get(Uri::from_static("/users"))
    }

    fn dispatcher(store: InMemoryCredentialStore) -> RequestDispatcher<Capture> {
        RequestDispatcher::new(Capture::default(), Arc::new(store))
    }

    #[tokio::test]
    async fn stored_access_token_is_attached_as_sensitive_bearer() {
        let dispatcher = dispatcher(InMemoryCredentialStore::with_credentials(
            CredentialPair::new("A1", "B1"),
        ));

        let dispatched = dispatcher.send(&envelope()).await;

        assert!(dispatched.authorized);
        dispatched.result.unwrap();
        let seen = dispatcher.transport.authorization.lock().unwrap().clone();
        let value = seen[0].as_ref().unwrap();
        assert_eq!(value, "Bearer A1");
        assert!(value.is_sensitive());
    }

    #[tokio::test]
    async fn request_is_sent_without_authorization_when_signed_out() {
        let dispatcher = dispatcher(InMemoryCredentialStore::new());

        let dispatched = dispatcher.send(&envelope()).await;

        assert!(!dispatched.authorized);
        dispatched.result.unwrap();

        let seen = dispatcher.transport.authorization.lock().unwrap().clone();
        assert_eq!(seen, vec![None]);
    }

    #[tokio::test]
    async fn explicit_access_token_wins_over_the_stored_one() {
        let dispatcher = dispatcher(InMemoryCredentialStore::with_credentials(
            CredentialPair::new("A1", "B1"),
        ));

        dispatcher
            .send_with(&envelope(), AccessTokenRef::from_str("A2"))
            .await
            .unwrap();

        let seen = dispatcher.transport.authorization.lock().unwrap().clone();
        assert_eq!(seen[0].as_ref().unwrap(), "Bearer A2");
    }

    #[tokio::test]
    async fn unrepresentable_token_is_not_sent() {
        let dispatcher = dispatcher(InMemoryCredentialStore::new());

        dispatcher
            .send_with(&envelope(), AccessTokenRef::from_str("bad\ntoken"))
            .await
            .unwrap();

        let seen = dispatcher.transport.authorization.lock().unwrap().clone();
        assert_eq!(seen, vec![None]);
    }

    #[tokio::test]
    async fn refresh_token_alone_does_not_authorize_a_request() {
        let store = InMemoryCredentialStore::new();
        store.replace(Credentials::new(None, Some(RefreshToken::from_static("B1"))));
        let dispatcher = dispatcher(store);

        let dispatched = dispatcher.send(&envelope()).await;

        assert!(!dispatched.authorized);
        let seen = dispatcher.transport.authorization.lock().unwrap().clone();
        assert_eq!(seen, vec![None]);
    }
}
