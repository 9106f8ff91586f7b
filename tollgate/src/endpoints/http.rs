//! A refresh endpoint reached over HTTP

use std::marker::PhantomData;

use async_trait::async_trait;
use thiserror::Error;

use super::RefreshEndpoint;
use crate::{ClientId, CredentialPair, RefreshTokenRef};

pub mod dto;

/// A refresh endpoint that posts the refresh token to a token URL
///
/// The request follows the OAuth2 refresh token grant. Authorities that do
/// not rotate refresh tokens may omit one from the response, in which case
/// the refresh token that was sent remains in use.
#[derive(Debug)]
pub struct HttpRefreshEndpoint<T = JsonBody> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    client_id: Option<ClientId>,
    content_type: PhantomData<fn() -> T>,
}

impl HttpRefreshEndpoint<JsonBody> {
    /// Constructs a new endpoint sending JSON bodies to `token_url`
    pub fn new(client: reqwest::Client, token_url: reqwest::Url) -> Self {
        Self {
            client,
            token_url,
            client_id: None,
            content_type: PhantomData,
        }
    }

    /// Configures the endpoint to send the refresh token to the authority
    /// as form data
    pub fn using_form_data(self) -> HttpRefreshEndpoint<FormBody> {
        HttpRefreshEndpoint {
            client: self.client,
            token_url: self.token_url,
            client_id: self.client_id,
            content_type: PhantomData,
        }
    }
}

impl<T> HttpRefreshEndpoint<T> {
    /// Identifies this client to the authority on every refresh
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }
}

#[async_trait]
impl<T: RequestType> RefreshEndpoint for HttpRefreshEndpoint<T> {
    type Error = TokenRequestError;

    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<CredentialPair, Self::Error> {
        let request = dto::RefreshRequest::new(refresh_token, self.client_id.as_deref());
        request_tokens::<T>(&self.client, self.token_url.clone(), &request).await
    }
}

/// An error while attempting to exchange a refresh token with the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// An error from the authority with an error body
    #[error("authority rejected the refresh request: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a refresh request to the authority
    #[error("error sending refresh request to authority")]
    RequestSend(#[source] reqwest::Error),
}

#[tracing::instrument(
    err,
    skip(client, token_url, request),
    fields(
        token_url = %token_url,
        grant_type = dto::RefreshRequest::GRANT_TYPE,
        client_id = request.client_id().map(|c| c.as_str()).unwrap_or_default(),
    ),
)]
async fn request_tokens<T: RequestType>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    request: &dto::RefreshRequest<'_>,
) -> Result<CredentialPair, TokenRequestError> {
    tracing::trace!("requesting refreshed tokens from authority");

    let req = T::attach_payload(client.post(token_url), request);
    let resp = req.send().await.map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received refresh response from authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    tracing::info!(
        rotated_refresh_token = resp.refresh_token.is_some(),
        expires_in = ?resp.expires_in,
        "received refreshed tokens"
    );

    Ok(resp.into_pair(request.refresh_token()))
}

/// A manner of attaching a serializable payload to a request
pub trait RequestType: Send + Sync + 'static {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder;
}

/// Sends the refresh request as JSON
#[derive(Debug)]
pub struct JsonBody;

/// Sends the refresh request as URL-encoded form data
#[derive(Debug)]
pub struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.form(payload)
    }
}
