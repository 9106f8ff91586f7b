//! A [`reqwest`] transport for [`tollgate`]
//!
//! [`HttpTransport`] sends the requests dispatched by a
//! [`GatewayClient`](tollgate::GatewayClient) through a
//! [`ClientWithMiddleware`], resolving each request's URI against a base URL.
//! Unsuccessful responses are handed to an [`ExpiryClassifier`], which
//! decides whether the gateway rejected an expired access token and so
//! whether the request should be replayed after a refresh.
//!
//! ```
//! use tollgate_reqwest::{HttpTransport, JsonErrorCode};
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! let client = ClientBuilder::new(Client::default()).build();
//!
//! let transport = HttpTransport::new(
//!     client,
//!     "https://api.example.com".parse().unwrap(),
//!     JsonErrorCode::new("/code", 40101),
//! );
//! ```
//!
//! Credentials are only disclosed to destinations accepted by the transport's
//! predicate. By default that is any HTTPS URL. When a request would carry an
//! `Authorization` header somewhere the predicate rejects, the header is
//! removed before the request is sent.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements.
//!
//! ```
//! use tollgate_reqwest::{BearerInvalidToken, ExactHostMatch, HttpTransport, HttpsOnly};
//! use predicates::prelude::PredicateBooleanExt;
//!
//! let base_url: url::Url = "https://api.example.com".parse().unwrap();
//!
//! HttpTransport::new(reqwest::Client::default(), base_url, BearerInvalidToken)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("api.example.com")));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, mem};

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, StatusCode};
use predicates::Predicate;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tollgate::{Transport, TransportFailure};
use url::Url;

mod classify;
mod disclosure;

pub use classify::{BearerInvalidToken, ExpiryClassifier, JsonErrorCode};
pub use disclosure::{ExactHostMatch, HttpsOnly};

/// A fully read response from the gateway
#[derive(Clone, Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    /// Constructs a response from its parts
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The response status
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The response body
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Why a request could not be completed
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request URI could not be resolved against the base URL
    #[error("unable to resolve request uri against the base url")]
    InvalidUrl(#[source] url::ParseError),
    /// The request could not be sent or no response was received
    #[error("error sending request")]
    Request(#[source] reqwest_middleware::Error),
    /// The response body could not be read
    #[error("error reading response body")]
    Body(#[source] reqwest::Error),
    /// The gateway answered with an unsuccessful status
    #[error("gateway responded with {status}")]
    Status {
        /// The status returned
        status: StatusCode,
        /// The body returned
        body: Bytes,
    },
}

/// Sends requests to a gateway over HTTP
pub struct HttpTransport<C, P = HttpsOnly> {
    client: ClientWithMiddleware,
    base_url: Url,
    classifier: C,
    predicate: P,
}

impl<C> HttpTransport<C, HttpsOnly> {
    /// Constructs a transport sending requests relative to `base_url`
    ///
    /// By default, credentials will only be sent if the request is being
    /// sent via HTTPS. To change this behavior, provide a custom predicate
    /// with [`with_predicate()`][Self::with_predicate()].
    pub fn new(client: impl Into<ClientWithMiddleware>, base_url: Url, classifier: C) -> Self {
        Self {
            client: client.into(),
            base_url,
            classifier,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> HttpTransport<C, P> {
        HttpTransport {
            client: self.client,
            base_url: self.base_url,
            classifier: self.classifier,
            predicate,
        }
    }
}

impl<C, P> HttpTransport<C, P> {
    /// The URL request URIs are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a request URI against the base URL
    ///
    /// An absolute URI replaces the base URL. An absolute path replaces the
    /// base URL's path.
    pub fn resolve(&self, uri: &http::Uri) -> Result<Url, url::ParseError> {
        self.base_url.join(&uri.to_string())
    }
}

impl<C, P> HttpTransport<C, P>
where
    C: ExpiryClassifier,
    P: Predicate<reqwest::Request> + Send + Sync,
{
    fn prepare(
        &self,
        parts: http::request::Parts,
        body: Bytes,
    ) -> Result<reqwest::Request, HttpError> {
        let url = self.resolve(&parts.uri).map_err(HttpError::InvalidUrl)?;

        let mut request = reqwest::Request::new(parts.method, url);
        *request.headers_mut() = parts.headers;
        if !body.is_empty() {
            *request.body_mut() = Some(body.into());
        }

        if request.headers().contains_key(header::AUTHORIZATION) && !self.predicate.eval(&request)
        {
            tracing::warn!(
                url = %request.url(),
                predicate = %self.predicate,
                "destination not allowed to receive credentials, removing authorization"
            );
            request.headers_mut().remove(header::AUTHORIZATION);
        }

        Ok(request)
    }
}

#[async_trait]
impl<C, P> Transport for HttpTransport<C, P>
where
    C: ExpiryClassifier,
    P: Predicate<reqwest::Request> + Send + Sync,
{
    type Response = HttpResponse;
    type Error = HttpError;

    async fn call(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<HttpResponse, TransportFailure<HttpError>> {
        let (mut parts, body) = request.into_parts();
        let mut extensions = mem::take(&mut parts.extensions);
        let request = self.prepare(parts, body).map_err(TransportFailure::Failed)?;

        let method = request.method().clone();
        let url = request.url().clone();

        let response = self
            .client
            .execute_with_extensions(request, &mut extensions)
            .await
            .map_err(|e| TransportFailure::Failed(HttpError::Request(e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFailure::Failed(HttpError::Body(e)))?;
        let response = HttpResponse::new(status, headers, body);

        if status.is_success() {
            tracing::trace!(%method, %url, %status, "request succeeded");
            return Ok(response);
        }

        if self.classifier.is_expired(&response) {
            tracing::debug!(%method, %url, %status, "gateway rejected an expired access token");
            return Err(TransportFailure::AuthExpired);
        }

        tracing::debug!(%method, %url, %status, "request failed");
        Err(TransportFailure::Failed(HttpError::Status {
            status,
            body: response.body,
        }))
    }
}

impl<C, P> fmt::Debug for HttpTransport<C, P>
where
    C: fmt::Debug,
    P: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("classifier", &self.classifier)
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}
