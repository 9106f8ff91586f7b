//! Refresh endpoints

use async_trait::async_trait;
use std::error;

use crate::{CredentialPair, RefreshTokenRef};

#[cfg(feature = "http")]
pub mod http;

/// An endpoint that exchanges a refresh token for a new pair of tokens
///
/// This is distinct from the business API. Any error returned from here
/// ends the session.
#[async_trait]
pub trait RefreshEndpoint: Send + Sync {
    /// The error type returned in the event that the exchange fails
    type Error: error::Error + Send + Sync + 'static;

    /// Exchanges `refresh_token` for fresh credentials
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<CredentialPair, Self::Error>;
}
