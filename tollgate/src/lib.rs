//! Authenticated API access with single-flight credential refresh
//!
//! This library sits between an application and a gateway that authenticates
//! every request with a short-lived bearer token. Each outgoing request is
//! dispatched with the access token currently held in a [`CredentialStore`].
//! When the gateway reports that token as expired, the request is parked
//! while a single refresh is performed on behalf of every request that
//! observed the expiry, and each parked request is then replayed exactly once
//! with the freshly minted token.
//!
//! If the refresh itself fails, every parked request fails together with the
//! same error, the stored credentials are cleared, and a [`SessionSink`] is
//! told that the session has ended. The sink is told only once per burst of
//! failures, no matter how many requests were in flight.
//!
//! # General Flow
//!
//! On application start-up, choose a transport that knows how to reach the
//! gateway and how to recognize an expired token, a refresh endpoint that
//! knows how to exchange a refresh token, and a store for the credentials.
//!
//! ```no_run
//! use tollgate::{
//!     endpoints::http::HttpRefreshEndpoint, session, stores::FileCredentialStore,
//!     GatewayClient, RequestEnvelope,
//! };
//! # use async_trait::async_trait;
//! # use tollgate::{Transport, TransportFailure};
//! # #[derive(Debug)]
//! # struct GatewayTransport;
//! # #[async_trait]
//! # impl Transport for GatewayTransport {
//! #     type Response = http::Response<bytes::Bytes>;
//! #     type Error = std::io::Error;
//! #     async fn call(&self, _: http::Request<bytes::Bytes>) -> Result<Self::Response, TransportFailure<Self::Error>> {
//! #         unimplemented!()
//! #     }
//! # }
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let endpoint = HttpRefreshEndpoint::new(
//!     reqwest::Client::new(),
//!     "https://auth.example.com/oauth/token".parse()?,
//! );
//! let store = FileCredentialStore::open("credentials.json").await?;
//! let (sink, mut watcher) = session::session_channel();
//!
//! let client = GatewayClient::builder(GatewayTransport, endpoint)
//!     .with_store(store)
//!     .with_session_sink(sink)
//!     .build();
//!
//! tokio::spawn(async move {
//!     if watcher.ended().await.is_ok() {
//!         tracing::warn!("session ended, sign in again");
//!     }
//! });
//!
//! let response = client
//!     .send(RequestEnvelope::get("/users/me".parse()?))
//!     .await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `http`: Provides a refresh endpoint that performs the OAuth2 _refresh token_
//!   grant against a token URL.
//! * `file`: Provides a credential store persisted to the local filesystem.
//! * `rustls-tls`: Lets the `http` refresh endpoint reach `https://` token URLs
//!   using `rustls`. Without it, another TLS backend must be enabled on `reqwest`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod client;
pub mod coordinator;
mod credentials;
mod dispatcher;
pub mod endpoints;
mod envelope;
pub mod session;
pub mod stores;
mod transport;

#[cfg(test)]
mod test_util;

pub use braids::*;
pub use client::{GatewayClient, GatewayClientBuilder, GatewayError};
pub use coordinator::{RefreshConfig, RefreshCoordinator, RefreshError, RefreshOutcome};
pub use credentials::{CredentialPair, Credentials};
pub use dispatcher::{Dispatched, RequestDispatcher};
pub use endpoints::RefreshEndpoint;
pub use envelope::{Attempt, RequestEnvelope};
pub use session::{SessionSink, SessionTerminator};
pub use stores::CredentialStore;
pub use transport::{Transport, TransportFailure};
