//! Three-legged OAuth 1.0a handshake against the OAuth home wiki.

use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::client::{UserInfo, WikiApi};
use crate::config::Settings;
use crate::credentials::{CredentialStore, User, extra_data_for};
use crate::error::{Error, Result};
use crate::oauth::{AccessToken, ConsumerToken, Signer};

/// First leg result: the request token to keep and the URL the user must visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub request_token: AccessToken,
    pub authorize_url: String,
}

pub struct LoginFlow {
    client: Client,
    consumer: ConsumerToken,
    home_url: String,
    callback: String,
}

impl LoginFlow {
    pub fn new(settings: &Settings) -> Result<Self> {
        let consumer = &settings.consumer;
        if consumer.key.is_empty() || consumer.secret.is_empty() {
            return Err(Error::Handshake {
                detail: "OAuth consumer key and secret must be configured".to_string(),
            });
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.http.timeout_ms))
            .user_agent(settings.http.user_agent.clone())
            .build()
            .map_err(|error| Error::RemoteUnavailable {
                detail: format!("failed to build HTTP client: {error}"),
            })?;
        Ok(Self {
            client,
            consumer: ConsumerToken::new(&consumer.key, &consumer.secret),
            home_url: consumer.home_wiki_url.trim_end_matches('/').to_string(),
            callback: consumer.callback.clone(),
        })
    }

    /// Fetch a request token and build the authorization URL.
    pub fn initiate(&self) -> Result<PendingLogin> {
        let url = special_page_url(&self.home_url, "initiate")?;
        let authorization = Signer::new(&self.consumer, None).authorization(
            "GET",
            &url,
            &[],
            &[("oauth_callback", self.callback.as_str())],
        );
        tracing::info!(home = %self.home_url, "requesting OAuth request token");
        let body = self.fetch(url, authorization)?;
        let request_token = parse_token_response(&body)?;
        let authorize_url = authorize_url(&self.home_url, &self.consumer.key, &request_token);
        Ok(PendingLogin {
            request_token,
            authorize_url,
        })
    }

    /// Exchange an authorized request token and verifier for an access token.
    pub fn complete(&self, request_token: &AccessToken, verifier: &str) -> Result<AccessToken> {
        let verifier = verifier.trim();
        if verifier.is_empty() {
            return Err(Error::invalid("OAuth verifier cannot be empty"));
        }
        let url = special_page_url(&self.home_url, "token")?;
        let authorization = Signer::new(&self.consumer, Some(request_token)).authorization(
            "GET",
            &url,
            &[],
            &[("oauth_verifier", verifier)],
        );
        tracing::info!(home = %self.home_url, "exchanging OAuth verifier for access token");
        let body = self.fetch(url, authorization)?;
        parse_token_response(&body)
    }

    fn fetch(&self, url: Url, authorization: String) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .map_err(|error| Error::RemoteUnavailable {
                detail: format!("failed to reach OAuth endpoint: {error}"),
            })?;
        let status = response.status();
        if status.is_server_error() {
            return Err(Error::RemoteUnavailable {
                detail: format!("OAuth endpoint returned HTTP {status}"),
            });
        }
        // MediaWiki reports handshake errors as JSON bodies on 4xx too.
        response.text().map_err(|error| Error::Handshake {
            detail: format!("failed to read OAuth endpoint response: {error}"),
        })
    }
}

/// `Special:OAuth/{action}` on the home wiki's `index.php`, JSON output.
fn special_page_url(home_url: &str, action: &str) -> Result<Url> {
    let base = format!("{home_url}/w/index.php");
    Url::parse_with_params(
        &base,
        &[
            ("title", format!("Special:OAuth/{action}")),
            ("format", "json".to_string()),
        ],
    )
    .map_err(|error| Error::Handshake {
        detail: format!("invalid OAuth home wiki URL {home_url}: {error}"),
    })
}

pub fn authorize_url(home_url: &str, consumer_key: &str, request_token: &AccessToken) -> String {
    let home_url = home_url.trim_end_matches('/');
    let base = format!("{home_url}/wiki/Special:OAuth/authorize");
    match Url::parse_with_params(
        &base,
        &[
            ("oauth_token", request_token.token.as_str()),
            ("oauth_consumer_key", consumer_key),
        ],
    ) {
        Ok(url) => url.to_string(),
        Err(_) => base,
    }
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    key: Option<String>,
    secret: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

/// Parse the `{"key": ..., "secret": ...}` body returned by the initiate and token endpoints.
pub fn parse_token_response(body: &str) -> Result<AccessToken> {
    let parsed: TokenBody = serde_json::from_str(body.trim()).map_err(|error| Error::Handshake {
        detail: format!("unexpected OAuth endpoint response: {error}"),
    })?;
    if let Some(code) = parsed.error {
        let message = parsed.message.unwrap_or_default();
        return Err(Error::Handshake {
            detail: format!("[{code}] {message}").trim_end().to_string(),
        });
    }
    match (parsed.key, parsed.secret) {
        (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
            Ok(AccessToken::new(key, secret))
        }
        _ => Err(Error::Handshake {
            detail: "OAuth endpoint response had no token pair".to_string(),
        }),
    }
}

/// Record a completed login: create the local user if needed and store the token pair.
pub fn finish_login(
    store: &CredentialStore<'_>,
    info: &UserInfo,
    token: &AccessToken,
) -> Result<User> {
    let user = store.ensure_user(&info.name)?;
    store.link(
        &user,
        &info.id.to_string(),
        &extra_data_for(token, &info.name, info.id),
    )?;
    Ok(user)
}

/// Identify the token owner on the home wiki, then [`finish_login`].
pub fn complete_login<A: WikiApi>(
    store: &CredentialStore<'_>,
    api: &mut A,
    token: &AccessToken,
) -> Result<User> {
    let info = api.user_info()?;
    tracing::info!(user = %info.name, wiki = %api.site(), "OAuth login completed");
    finish_login(store, &info, token)
}
