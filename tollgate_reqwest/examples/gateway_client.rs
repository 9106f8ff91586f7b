use std::{path::PathBuf, time::Duration};

use clap::Parser;
use predicates::prelude::PredicateBooleanExt;
use tokio::time;
use tollgate::{
    endpoints::http::HttpRefreshEndpoint, session, stores::FileCredentialStore, AccessToken,
    ClientId, CredentialPair, GatewayClient, GatewayError, RefreshConfig, RefreshToken,
    RequestEnvelope,
};
use tollgate_reqwest::{
    BearerInvalidToken, ExactHostMatch, ExpiryClassifier, HttpResponse, HttpTransport, HttpsOnly,
    JsonErrorCode,
};

#[derive(Debug, Parser)]
struct Opts {
    /// The gateway's base URL
    #[clap(short, long, env)]
    base_url: url::Url,

    /// The issuing authority's token request URL
    #[clap(short, long, env)]
    token_url: reqwest::Url,

    /// The client ID sent along with refresh requests
    #[clap(short, long, env)]
    client_id: Option<ClientId>,

    /// The path requested from the gateway
    #[clap(short, long, env, default_value = "/users/me")]
    path: http::Uri,

    /// The JSON `code` the gateway uses to report an expired access token
    ///
    /// When not given, a bearer challenge of `error="invalid_token"` is expected instead.
    #[clap(short = 'e', long, env)]
    expired_code: Option<i64>,

    /// An access token to sign in with, replacing any stored credentials
    #[clap(long, env, requires = "refresh_token", hide_env_values = true)]
    access_token: Option<AccessToken>,

    /// The refresh token issued with the access token
    #[clap(long, env, requires = "access_token", hide_env_values = true)]
    refresh_token: Option<RefreshToken>,

    /// The local file used to store credentials
    #[clap(short = 'f', long, env, default_value = ".credentials.json")]
    credentials_file: PathBuf,

    /// Seconds to wait between requests
    #[clap(short, long, env, default_value_t = 5)]
    interval: u64,

    /// Seconds to wait for the refresh endpoint before ending the session
    #[clap(long, env, default_value_t = 30)]
    refresh_timeout: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut endpoint = HttpRefreshEndpoint::new(client.clone(), opts.token_url);
    if let Some(client_id) = opts.client_id {
        endpoint = endpoint.with_client_id(client_id);
    }

    let json_code = opts.expired_code.map(|code| JsonErrorCode::new("/code", code));
    let classifier = move |resp: &HttpResponse| match &json_code {
        Some(classifier) => classifier.is_expired(resp),
        None => BearerInvalidToken.is_expired(resp),
    };

    let allowed_host = ExactHostMatch::of(&opts.base_url)
        .ok_or_else(|| color_eyre::eyre::eyre!("base url must have a host"))?;
    let transport = HttpTransport::new(client, opts.base_url, classifier)
        .with_predicate(HttpsOnly.and(allowed_host));

    let store = FileCredentialStore::open(&opts.credentials_file).await?;
    let (sink, mut watcher) = session::session_channel();

    let gateway = GatewayClient::builder(transport, endpoint)
        .with_store(store)
        .with_session_sink(sink)
        .with_refresh_config(
            RefreshConfig::new().with_timeout(Duration::from_secs(opts.refresh_timeout)),
        )
        .build();

    if let (Some(access_token), Some(refresh_token)) = (opts.access_token, opts.refresh_token) {
        gateway
            .login(CredentialPair::new(access_token, refresh_token))
            .await
            .map_err(|e| color_eyre::eyre::eyre!(e))?;
    }

    if gateway.credentials().await.is_empty() {
        tracing::warn!(
            file = %opts.credentials_file.display(),
            "no stored credentials, requests will be sent unauthenticated"
        );
    }

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = watcher.ended() => {
                tracing::error!("session ended, sign in again with --access-token and --refresh-token");
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }

        match gateway.send(RequestEnvelope::get(opts.path.clone())).await {
            Ok(resp) => {
                tracing::info!(
                    status = %resp.status(),
                    body = %String::from_utf8_lossy(resp.body()),
                    "gateway responded"
                );
            }
            Err(GatewayError::RefreshFailed(reason)) => {
                tracing::error!(error = (&*reason as &dyn std::error::Error), "refresh failed");
            }
            Err(GatewayError::Unauthenticated) => {
                tracing::warn!(
                    "gateway requires credentials, sign in with --access-token and --refresh-token"
                );
            }
            Err(error) => {
                tracing::warn!(error = (&error as &dyn std::error::Error), "request failed");
            }
        }

        tracing::debug!(
            credentials = format_args!("{:#?}", gateway.credentials().await),
            "current credentials"
        );
    }
}
