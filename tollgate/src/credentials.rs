use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef};

/// The credentials currently held by a store
///
/// Either token may be absent, which is a valid logged-out state rather
/// than an error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<AccessToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
}

impl Credentials {
    /// Credentials from individually optional tokens
    pub fn new(access_token: Option<AccessToken>, refresh_token: Option<RefreshToken>) -> Self {
        Self {
            access_token,
            refresh_token,
        }
    }

    /// Credentials with neither token present
    pub const fn empty() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
        }
    }

    /// Gets the access token, if any
    #[inline]
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.access_token.as_deref()
    }

    /// Gets the refresh token, if any
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Whether neither token is present
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

impl From<CredentialPair> for Credentials {
    fn from(pair: CredentialPair) -> Self {
        Self {
            access_token: Some(pair.access_token),
            refresh_token: Some(pair.refresh_token),
        }
    }
}

/// An access token together with the refresh token issued alongside it
///
/// The two are always saved together so that no reader can observe a fresh
/// access token next to a stale refresh token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    access_token: AccessToken,
    refresh_token: RefreshToken,
}

impl CredentialPair {
    /// Pairs an access token with its refresh token
    pub fn new(access_token: impl Into<AccessToken>, refresh_token: impl Into<RefreshToken>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the refresh token
    #[inline]
    pub fn refresh_token(&self) -> &RefreshTokenRef {
        &self.refresh_token
    }

    /// Splits the pair into its tokens
    pub fn into_parts(self) -> (AccessToken, RefreshToken) {
        (self.access_token, self.refresh_token)
    }
}
