//! DTOs for exchanging refresh tokens with an HTTP authority

use serde::{Deserialize, Serialize, Serializer};

use crate::{AccessToken, ClientIdRef, CredentialPair, RefreshToken, RefreshTokenRef};

/// A refresh token grant request
#[derive(Debug)]
pub struct RefreshRequest<'a> {
    refresh_token: &'a RefreshTokenRef,
    client_id: Option<&'a ClientIdRef>,
}

impl<'a> RefreshRequest<'a> {
    /// The OAuth2 grant type of a refresh request
    pub const GRANT_TYPE: &'static str = "refresh_token";

    /// Constructs a new refresh request
    pub fn new(refresh_token: &'a RefreshTokenRef, client_id: Option<&'a ClientIdRef>) -> Self {
        Self {
            refresh_token,
            client_id,
        }
    }

    /// The refresh token being exchanged
    pub fn refresh_token(&self) -> &'a RefreshTokenRef {
        self.refresh_token
    }

    /// The client ID presented to the authority, if any
    pub fn client_id(&self) -> Option<&'a ClientIdRef> {
        self.client_id
    }
}

impl Serialize for RefreshRequest<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshRequest", 3)?;
        ser.serialize_field("grant_type", Self::GRANT_TYPE)?;
        ser.serialize_field("refresh_token", self.refresh_token)?;
        if let Some(client_id) = self.client_id {
            ser.serialize_field("client_id", client_id)?;
        } else {
            ser.skip_field("client_id")?;
        }
        ser.end()
    }
}

/// The authority's answer to a successful refresh request
#[derive(Debug, Deserialize, Serialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Pairs the new access token with the rotated refresh token, or with
    /// the one that was sent if the authority did not rotate it
    pub fn into_pair(self, sent: &RefreshTokenRef) -> CredentialPair {
        let refresh_token = self
            .refresh_token
            .unwrap_or_else(|| sent.to_owned());
        CredentialPair::new(self.access_token, refresh_token)
    }
}
