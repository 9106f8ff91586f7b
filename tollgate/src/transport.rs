use async_trait::async_trait;
use bytes::Bytes;
use std::error;
use thiserror::Error;

/// Why a transport call did not produce a response
#[derive(Debug, Error)]
pub enum TransportFailure<E> {
    /// The server reported that the access token specifically has expired
    ///
    /// This is distinct from other authorization failures. A transport must
    /// only report it when the server's response carries an explicit expiry
    /// marker.
    #[error("access token expired")]
    AuthExpired,
    /// Any other failure
    #[error(transparent)]
    Failed(E),
}

/// Issues a single request and classifies its outcome
#[async_trait]
pub trait Transport: Send + Sync {
    /// The successful response payload
    type Response: Send;

    /// The error reported for failures other than an expired token
    type Error: error::Error + Send + Sync + 'static;

    /// Sends `request`
    async fn call(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<Self::Response, TransportFailure<Self::Error>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    type Response = T::Response;
    type Error = T::Error;

    async fn call(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<Self::Response, TransportFailure<Self::Error>> {
        (**self).call(request).await
    }
}
