//! OAuth 1.0a request signing (HMAC-SHA1), as used by MediaWiki's OAuth extension.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use rand::distr::Alphanumeric;
use reqwest::Url;
use sha1::Sha1;

/// RFC 3986 unreserved characters stay as-is; everything else is encoded.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";

#[derive(Clone, PartialEq, Eq)]
pub struct ConsumerToken {
    pub key: String,
    pub secret: String,
}

impl ConsumerToken {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for ConsumerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerToken")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A token/secret pair: a request token during the handshake, an access token afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub secret: String,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE_SET).to_string()
}

/// Signs requests for one consumer and, optionally, one token.
pub struct Signer<'a> {
    consumer: &'a ConsumerToken,
    token: Option<&'a AccessToken>,
}

impl<'a> Signer<'a> {
    pub fn new(consumer: &'a ConsumerToken, token: Option<&'a AccessToken>) -> Self {
        Self { consumer, token }
    }

    /// Build the `Authorization` header value for a request.
    ///
    /// `body_params` are form-encoded body parameters; query parameters are
    /// read from `url`. `extra_oauth` carries handshake parameters such as
    /// `oauth_callback` or `oauth_verifier`.
    pub fn authorization(
        &self,
        method: &str,
        url: &Url,
        body_params: &[(String, String)],
        extra_oauth: &[(&str, &str)],
    ) -> String {
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = crate::unix_timestamp().unwrap_or_default();
        self.authorization_with(method, url, body_params, extra_oauth, &nonce, timestamp)
    }

    fn authorization_with(
        &self,
        method: &str,
        url: &Url,
        body_params: &[(String, String)],
        extra_oauth: &[(&str, &str)],
        nonce: &str,
        timestamp: i64,
    ) -> String {
        let mut oauth_params = vec![
            ("oauth_consumer_key".to_string(), self.consumer.key.clone()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            (
                "oauth_signature_method".to_string(),
                SIGNATURE_METHOD.to_string(),
            ),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
        ];
        if let Some(token) = self.token {
            oauth_params.push(("oauth_token".to_string(), token.token.clone()));
        }
        oauth_params.push(("oauth_version".to_string(), OAUTH_VERSION.to_string()));
        for (key, value) in extra_oauth {
            oauth_params.push(((*key).to_string(), (*value).to_string()));
        }

        let mut all_params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        all_params.extend(body_params.iter().cloned());
        all_params.extend(oauth_params.iter().cloned());

        let base = signature_base_string(method, url, &all_params);
        let signature = self.sign(&base);
        oauth_params.push(("oauth_signature".to_string(), signature));

        let fields = oauth_params
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", percent_encode(key), percent_encode(value)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {fields}")
    }

    fn sign(&self, base: &str) -> String {
        let key = format!(
            "{}&{}",
            percent_encode(&self.consumer.secret),
            percent_encode(self.token.map(|token| token.secret.as_str()).unwrap_or(""))
        );
        // HMAC accepts keys of any length.
        let mut mac = match Hmac::<Sha1>::new_from_slice(key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(base.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

/// `METHOD&encoded(base-url)&encoded(sorted-params)` per RFC 5849 section 3.4.1.
pub fn signature_base_string(method: &str, url: &Url, params: &[(String, String)]) -> String {
    let port = url.port().map(|port| format!(":{port}")).unwrap_or_default();
    let base_url = format!(
        "{}://{}{}{}",
        url.scheme().to_ascii_lowercase(),
        url.host_str().unwrap_or_default().to_ascii_lowercase(),
        port,
        url.path()
    );

    let mut encoded = params
        .iter()
        .map(|(key, value)| (percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>();
    encoded.sort();
    let normalized = encoded
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(&base_url),
        percent_encode(&normalized)
    )
}
