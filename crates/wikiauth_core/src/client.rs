use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{HttpSettings, Settings};
use crate::credentials::{CredentialStore, User};
use crate::error::{Error, Result};
use crate::oauth::{AccessToken, ConsumerToken, Signer};

/// Contributions are capped per call; there is no continuation cursor.
pub const MAX_CONTRIBUTIONS: usize = 50;

/// A remote wiki identified by language/project code and family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WikiSite {
    pub code: String,
    pub family: String,
}

impl WikiSite {
    pub fn new(code: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            family: family.into(),
        }
    }

    /// Action API endpoint derived from the Wikimedia hostname conventions.
    pub fn api_url(&self) -> Result<String> {
        let code = self.code.trim().to_ascii_lowercase();
        let family = self.family.trim().to_ascii_lowercase();
        let valid_code = !code.is_empty()
            && code
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
        let host = match family.as_str() {
            "wikidata" => Some("www.wikidata.org".to_string()),
            "mediawiki" => Some("www.mediawiki.org".to_string()),
            "commons" => Some("commons.wikimedia.org".to_string()),
            "meta" => Some("meta.wikimedia.org".to_string()),
            "wikimedia" if valid_code => Some(format!("{code}.wikimedia.org")),
            "wikipedia" | "wiktionary" | "wikibooks" | "wikinews" | "wikiquote"
            | "wikisource" | "wikiversity" | "wikivoyage"
                if valid_code =>
            {
                Some(format!("{code}.{family}.org"))
            }
            _ => None,
        };
        host.map(|host| format!("https://{host}/w/api.php"))
            .ok_or_else(|| Error::InvalidSite {
                code: self.code.clone(),
                family: self.family.clone(),
            })
    }
}

impl std::fmt::Display for WikiSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.code, self.family)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub name: String,
    pub edit_count: u64,
    pub registration: Option<String>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contribution {
    pub page: String,
    pub revision_id: i64,
    pub timestamp: String,
    pub comment: String,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageContent {
    pub exists: bool,
    pub text: String,
    pub revision_id: Option<i64>,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub success: bool,
    pub revision_id: Option<i64>,
    pub detail: Option<String>,
}

pub trait WikiApi {
    fn site(&self) -> &WikiSite;
    fn user_info(&mut self) -> Result<UserInfo>;
    fn user_edit_count(&mut self, username: &str) -> Result<u64>;
    fn user_contributions(&mut self, username: &str, limit: usize) -> Result<Vec<Contribution>>;
    fn page_content(&mut self, title: &str) -> Result<PageContent>;
    fn request_count(&self) -> usize;
}

pub trait WikiEditApi: WikiApi {
    fn edit_page(&mut self, title: &str, text: &str, summary: &str) -> Result<EditOutcome>;
}

/// Builds request-scoped clients from stored credentials.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    consumer: ConsumerToken,
    home: WikiSite,
    home_api_url: Option<String>,
    http: HttpSettings,
}

impl ClientFactory {
    pub fn new(
        consumer: ConsumerToken,
        home: WikiSite,
        home_api_url: Option<String>,
        http: HttpSettings,
    ) -> Self {
        Self {
            consumer,
            home,
            home_api_url,
            http,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            ConsumerToken::new(&settings.consumer.key, &settings.consumer.secret),
            WikiSite::new(&settings.home_wiki.code, &settings.home_wiki.family),
            settings.home_wiki.api_url.clone(),
            settings.http.clone(),
        )
    }

    pub fn home(&self) -> &WikiSite {
        &self.home
    }

    pub fn api_url_for(&self, site: &WikiSite) -> Result<String> {
        match &self.home_api_url {
            Some(url) if *site == self.home => Ok(url.clone()),
            _ => site.api_url(),
        }
    }

    /// Look up `user`'s credential and bind its token pair to `site` (home wiki by default).
    ///
    /// Performs no network I/O. Each call returns a fresh client; clients are
    /// never cached, so token pairs cannot leak between users.
    pub fn create_client(
        &self,
        store: &CredentialStore<'_>,
        user: &User,
        site: Option<&WikiSite>,
    ) -> Result<WikiClient> {
        let credential =
            store
                .credential_for(user)?
                .ok_or_else(|| Error::CredentialMissing {
                    username: user.username.clone(),
                })?;
        let token = credential
            .access_token()
            .map_err(|missing| Error::CredentialMalformed {
                username: user.username.clone(),
                missing,
            })?;
        let site = site.unwrap_or(&self.home);
        tracing::debug!(user = %user.username, wiki = %site, "creating wiki client");
        self.client_for_token(site, token)
    }

    pub fn client_for_token(&self, site: &WikiSite, token: AccessToken) -> Result<WikiClient> {
        let api_url = self.api_url_for(site)?;
        WikiClient::new(
            site.clone(),
            &api_url,
            &self.http,
            self.consumer.clone(),
            token,
        )
    }
}

/// OAuth-signed MediaWiki Action API client for one user on one wiki.
pub struct WikiClient {
    client: Client,
    site: WikiSite,
    api_url: Url,
    consumer: ConsumerToken,
    token: AccessToken,
    request_count: usize,
    csrf_token: Option<String>,
}

impl WikiClient {
    pub fn new(
        site: WikiSite,
        api_url: &str,
        http: &HttpSettings,
        consumer: ConsumerToken,
        token: AccessToken,
    ) -> Result<Self> {
        let api_url = Url::parse(api_url).map_err(|error| Error::InvalidSite {
            code: site.code.clone(),
            family: format!("{} ({api_url}: {error})", site.family),
        })?;
        let client = Client::builder()
            .timeout(Duration::from_millis(http.timeout_ms))
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(|error| Error::RemoteUnavailable {
                detail: format!("failed to build HTTP client: {error}"),
            })?;

        Ok(Self {
            client,
            site,
            api_url,
            consumer,
            token,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .extend_pairs(api_pairs(params).iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let authorization =
            Signer::new(&self.consumer, Some(&self.token)).authorization("GET", &url, &[], &[]);

        self.request_count += 1;
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send();
        decode_response(response)
    }

    fn request_json_post(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = api_pairs(params);
        let authorization = Signer::new(&self.consumer, Some(&self.token)).authorization(
            "POST",
            &self.api_url,
            &pairs,
            &[],
        );

        self.request_count += 1;
        let response = self
            .client
            .post(self.api_url.clone())
            .header(reqwest::header::AUTHORIZATION, authorization)
            .form(&pairs)
            .send();
        decode_response(response)
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse = decode(response, "csrf token")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| invalid_response("csrf token response had no token"))?;
        // The anonymous token means the OAuth headers were ignored.
        if token == "+\\" {
            return Err(Error::RemoteAuth {
                code: "anon".to_string(),
                info: "wiki issued an anonymous edit token".to_string(),
            });
        }
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiApi for WikiClient {
    fn site(&self) -> &WikiSite {
        &self.site
    }

    fn user_info(&mut self) -> Result<UserInfo> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "userinfo".to_string()),
            ("uiprop", "editcount|registration|groups".to_string()),
        ])?;
        let parsed: QueryResponse = decode(response, "userinfo")?;
        let info = parsed
            .query
            .userinfo
            .ok_or_else(|| invalid_response("userinfo missing from response"))?;
        if info.anon.unwrap_or(false) || info.id == 0 {
            return Err(Error::RemoteAuth {
                code: "anon".to_string(),
                info: "request was not authenticated".to_string(),
            });
        }
        Ok(UserInfo {
            id: info.id,
            name: info.name,
            edit_count: info.editcount.unwrap_or(0),
            registration: info.registration,
            groups: info.groups,
        })
    }

    fn user_edit_count(&mut self, username: &str) -> Result<u64> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("list", "users".to_string()),
            ("ususers", username.to_string()),
            ("usprop", "editcount".to_string()),
        ])?;
        let parsed: QueryResponse = decode(response, "users")?;
        Ok(parsed
            .query
            .users
            .into_iter()
            .find(|user| !user.missing.unwrap_or(false))
            .and_then(|user| user.editcount)
            .unwrap_or(0))
    }

    fn user_contributions(&mut self, username: &str, limit: usize) -> Result<Vec<Contribution>> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("list", "usercontribs".to_string()),
            ("ucuser", username.to_string()),
            ("uclimit", limit.to_string()),
            ("ucdir", "older".to_string()),
            ("ucprop", "title|ids|timestamp|comment|size".to_string()),
        ])?;
        let parsed: QueryResponse = decode(response, "usercontribs")?;
        Ok(parsed
            .query
            .usercontribs
            .into_iter()
            .map(|item| Contribution {
                page: item.title,
                revision_id: item.revid,
                timestamp: item.timestamp,
                comment: item.comment.unwrap_or_default(),
                size: item.size.unwrap_or(0),
            })
            .collect())
    }

    fn page_content(&mut self, title: &str) -> Result<PageContent> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions|info".to_string()),
            ("rvprop", "content|ids".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let parsed: QueryResponse = decode(response, "page content")?;
        let page = match parsed.query.pages.into_iter().next() {
            Some(page) if !page.missing.unwrap_or(false) && !page.invalid.unwrap_or(false) => page,
            _ => {
                return Ok(PageContent {
                    exists: false,
                    text: String::new(),
                    revision_id: None,
                    length: 0,
                });
            }
        };
        let revision = page.revisions.into_iter().next();
        Ok(PageContent {
            exists: true,
            revision_id: revision.as_ref().map(|revision| revision.revid),
            text: revision
                .and_then(|revision| revision.slots)
                .and_then(|slots| slots.main)
                .map(|slot| slot.content)
                .unwrap_or_default(),
            length: page.length.unwrap_or(0),
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiEditApi for WikiClient {
    fn edit_page(&mut self, title: &str, text: &str, summary: &str) -> Result<EditOutcome> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(&[
            ("action", "edit".to_string()),
            ("title", title.to_string()),
            ("text", text.to_string()),
            ("summary", summary.to_string()),
            ("assert", "user".to_string()),
            ("token", token),
        ]);
        let response = match response {
            Ok(response) => response,
            Err(Error::RemoteApi { code, info }) => {
                return Ok(EditOutcome {
                    success: false,
                    revision_id: None,
                    detail: Some(format!("API Error: {code} - {info}")),
                });
            }
            Err(error) => return Err(error),
        };
        let parsed: EditResponse = decode(response, "edit")?;
        let edit = parsed
            .edit
            .ok_or_else(|| invalid_response("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            return Ok(EditOutcome {
                success: false,
                revision_id: None,
                detail: Some(format!(
                    "edit result: {}",
                    edit.result.unwrap_or_else(|| "unknown".to_string())
                )),
            });
        }
        Ok(EditOutcome {
            success: true,
            revision_id: edit.newrevid,
            detail: edit.nochange.unwrap_or(false).then(|| "nochange".to_string()),
        })
    }
}

/// Edit count of `username` on the client's wiki.
pub fn edit_count<A: WikiApi>(client: &mut A, username: &str) -> Result<u64> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::invalid("username cannot be empty"));
    }
    client.user_edit_count(username)
}

/// Most recent contributions, newest first, at most `limit` (capped at [`MAX_CONTRIBUTIONS`]).
///
/// Each call is an independent snapshot; repeated calls may overlap or skip
/// entries while the wiki changes.
pub fn recent_contributions<A: WikiApi>(
    client: &mut A,
    username: &str,
    limit: usize,
) -> Result<Vec<Contribution>> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::invalid("username cannot be empty"));
    }
    let limit = limit.min(MAX_CONTRIBUTIONS);
    if limit == 0 {
        return Ok(Vec::new());
    }
    let mut contributions = client.user_contributions(username, limit)?;
    contributions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    contributions.truncate(limit);
    Ok(contributions)
}

/// Current wikitext of `title` as the client's user sees it.
pub fn current_page<A: WikiApi>(client: &mut A, title: &str) -> Result<PageContent> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::invalid("page title cannot be empty"));
    }
    tracing::debug!(wiki = %client.site(), title, "fetching page content");
    client.page_content(title)
}

/// Save `new_text` to `title`. Must only be called from an explicit user action.
pub fn submit_edit<A: WikiEditApi>(
    client: &mut A,
    title: &str,
    new_text: &str,
    summary: &str,
) -> Result<EditOutcome> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::invalid("page title cannot be empty"));
    }
    tracing::info!(wiki = %client.site(), title, "submitting edit");
    let outcome = client.edit_page(title, new_text, summary)?;
    if !outcome.success {
        tracing::warn!(title, detail = ?outcome.detail, "edit was not saved");
    }
    Ok(outcome)
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    pairs.extend(
        params
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone())),
    );
    pairs
}

fn decode_response(
    response: std::result::Result<reqwest::blocking::Response, reqwest::Error>,
) -> Result<Value> {
    let response = response.map_err(|error| Error::RemoteUnavailable {
        detail: format!("failed to call MediaWiki API: {error}"),
    })?;
    let status = response.status();
    if let Some(error) = classify_status(status) {
        return Err(error);
    }
    let payload: Value = response.json().map_err(|error| {
        if error.is_timeout() {
            Error::RemoteUnavailable {
                detail: format!("timed out reading MediaWiki API response: {error}"),
            }
        } else {
            invalid_response(format!("failed to decode MediaWiki API JSON response: {error}"))
        }
    })?;
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        return Err(classify_api_error(code, info));
    }
    Ok(payload)
}

fn classify_status(status: StatusCode) -> Option<Error> {
    if status.is_success() {
        return None;
    }
    let detail = format!("MediaWiki API request failed with HTTP {status}");
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::RemoteAuth {
            code: format!("http_{}", status.as_u16()),
            info: detail,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Error::RemoteUnavailable { detail }
        }
        _ if status.is_server_error() => Error::RemoteUnavailable { detail },
        _ => Error::RemoteApi {
            code: format!("http_{}", status.as_u16()),
            info: detail,
        },
    })
}

pub(crate) fn classify_api_error(code: &str, info: &str) -> Error {
    let is_auth = code.starts_with("mwoauth-")
        || matches!(
            code,
            "notloggedin" | "badtoken" | "assertuserfailed" | "assertnameduserfailed" | "readapidenied"
        );
    if is_auth {
        Error::RemoteAuth {
            code: code.to_string(),
            info: info.to_string(),
        }
    } else if matches!(code, "maxlag" | "readonly" | "ratelimited") {
        Error::RemoteUnavailable {
            detail: format!("[{code}] {info}"),
        }
    } else {
        Error::RemoteApi {
            code: code.to_string(),
            info: info.to_string(),
        }
    }
}

fn invalid_response(detail: impl Into<String>) -> Error {
    Error::RemoteApi {
        code: "invalid_response".to_string(),
        info: detail.into(),
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|error| invalid_response(format!("failed to decode {what} response: {error}")))
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    userinfo: Option<UserInfoItem>,
    #[serde(default)]
    users: Vec<UserItem>,
    #[serde(default)]
    usercontribs: Vec<ContributionItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct UserInfoItem {
    #[serde(default)]
    id: i64,
    name: String,
    anon: Option<bool>,
    editcount: Option<u64>,
    registration: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserItem {
    missing: Option<bool>,
    editcount: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ContributionItem {
    title: String,
    revid: i64,
    timestamp: String,
    comment: Option<String>,
    size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    missing: Option<bool>,
    invalid: Option<bool>,
    length: Option<u64>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    newrevid: Option<i64>,
    nochange: Option<bool>,
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    use serde_json::json;

    use super::*;
    use crate::credentials::tests::migrated_databases;
    use crate::credentials::{CredentialStore, extra_data_for};

    #[derive(Default)]
    pub(crate) struct MockApi {
        pub(crate) site: Option<WikiSite>,
        pub(crate) info: Option<UserInfo>,
        pub(crate) edit_counts: Vec<(String, u64)>,
        pub(crate) contributions: Vec<Contribution>,
        pub(crate) edits: Vec<(String, String, String)>,
        pub(crate) fail_with: Option<fn() -> Error>,
        pub(crate) request_count: usize,
    }

    impl MockApi {
        fn check(&mut self) -> Result<()> {
            self.request_count += 1;
            match self.fail_with {
                Some(make_error) => Err(make_error()),
                None => Ok(()),
            }
        }
    }

    pub(crate) fn unreachable() -> Error {
        Error::RemoteUnavailable {
            detail: "connection refused".to_string(),
        }
    }

    pub(crate) fn rejected() -> Error {
        Error::RemoteAuth {
            code: "mwoauth-invalid-authorization".to_string(),
            info: "The authorization headers in your request are not valid".to_string(),
        }
    }

    impl WikiApi for MockApi {
        fn site(&self) -> &WikiSite {
            self.site.as_ref().expect("mock site")
        }

        fn user_info(&mut self) -> Result<UserInfo> {
            self.check()?;
            Ok(self.info.clone().expect("mock user info"))
        }

        fn user_edit_count(&mut self, username: &str) -> Result<u64> {
            self.check()?;
            Ok(self
                .edit_counts
                .iter()
                .find(|(name, _)| name == username)
                .map(|(_, count)| *count)
                .unwrap_or(0))
        }

        fn user_contributions(
            &mut self,
            _username: &str,
            limit: usize,
        ) -> Result<Vec<Contribution>> {
            self.check()?;
            Ok(self.contributions.iter().take(limit).cloned().collect())
        }

        fn page_content(&mut self, _title: &str) -> Result<PageContent> {
            self.check()?;
            Ok(PageContent {
                exists: false,
                text: String::new(),
                revision_id: None,
                length: 0,
            })
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    impl WikiEditApi for MockApi {
        fn edit_page(&mut self, title: &str, text: &str, summary: &str) -> Result<EditOutcome> {
            self.check()?;
            self.edits
                .push((title.to_string(), text.to_string(), summary.to_string()));
            Ok(EditOutcome {
                success: true,
                revision_id: Some(9001),
                detail: None,
            })
        }
    }

    fn contribution(page: &str, timestamp: &str) -> Contribution {
        Contribution {
            page: page.to_string(),
            revision_id: 1,
            timestamp: timestamp.to_string(),
            comment: String::new(),
            size: 10,
        }
    }

    fn factory(api_url: Option<&str>) -> ClientFactory {
        ClientFactory::new(
            ConsumerToken::new("consumer", "consumer-secret"),
            WikiSite::new("meta", "wikimedia"),
            api_url.map(ToString::to_string),
            HttpSettings {
                user_agent: "wikiauth-test/0.1".to_string(),
                timeout_ms: 2_000,
            },
        )
    }

    /// A local API endpoint answering one connection per canned JSON body, in order.
    /// Joining the handle yields each raw request (head and form body).
    fn canned_wiki(bodies: Vec<Value>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind free port");
        let url = format!(
            "http://{}/w/api.php",
            listener.local_addr().expect("local addr")
        );
        let handle = thread::spawn(move || {
            let mut requests = Vec::new();
            for body in bodies {
                let (stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream);
                let mut request = String::new();
                let mut content_length = 0_usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("read request line");
                    if line.trim_end().is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':')
                        && name.eq_ignore_ascii_case("content-length")
                    {
                        content_length = value.trim().parse().expect("content length");
                    }
                    request.push_str(&line);
                }
                let mut form = vec![0_u8; content_length];
                reader.read_exact(&mut form).expect("read request body");
                request.push_str(&String::from_utf8_lossy(&form));

                let body = body.to_string();
                let mut stream = reader.into_inner();
                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .expect("write response");
                requests.push(request);
            }
            requests
        });
        (url, handle)
    }

    fn client_at(url: &str) -> WikiClient {
        let factory = factory(Some(url));
        factory
            .client_for_token(factory.home(), AccessToken::new("user-token", "user-secret"))
            .expect("client")
    }

    fn csrf_response(token: &str) -> Value {
        json!({"batchcomplete": true, "query": {"tokens": {"csrftoken": token}}})
    }

    #[test]
    fn site_api_urls_follow_hostname_conventions() {
        let url = |code: &str, family: &str| WikiSite::new(code, family).api_url();
        assert_eq!(
            url("meta", "wikimedia").expect("meta"),
            "https://meta.wikimedia.org/w/api.php"
        );
        assert_eq!(
            url("fi", "wikipedia").expect("fiwiki"),
            "https://fi.wikipedia.org/w/api.php"
        );
        assert_eq!(
            url("wikidata", "wikidata").expect("wikidata"),
            "https://www.wikidata.org/w/api.php"
        );
        assert_eq!(
            url("commons", "commons").expect("commons"),
            "https://commons.wikimedia.org/w/api.php"
        );
        assert!(matches!(
            url("fi", "example"),
            Err(Error::InvalidSite { .. })
        ));
        assert!(matches!(
            url("fi/../x", "wikipedia"),
            Err(Error::InvalidSite { .. })
        ));
    }

    #[test]
    fn home_override_applies_only_to_home_site() {
        let factory = factory(Some("http://localhost:8080/w/api.php"));
        assert_eq!(
            factory.api_url_for(&WikiSite::new("meta", "wikimedia")).expect("home"),
            "http://localhost:8080/w/api.php"
        );
        assert_eq!(
            factory.api_url_for(&WikiSite::new("fi", "wikipedia")).expect("other"),
            "https://fi.wikipedia.org/w/api.php"
        );
    }

    #[test]
    fn create_client_without_credential_is_credential_missing() {
        let (_temp, databases) = migrated_databases();
        let store = CredentialStore::new(&databases);
        let user = store.ensure_user("Alice").expect("user");
        // Port 9 would refuse connections; no request is ever made.
        let factory = factory(Some("http://127.0.0.1:9/w/api.php"));
        let error = factory
            .create_client(&store, &user, None)
            .err()
            .expect("must fail");
        assert!(matches!(error, Error::CredentialMissing { ref username } if username == "Alice"));
    }

    #[test]
    fn create_client_with_half_token_is_malformed() {
        let (_temp, databases) = migrated_databases();
        let store = CredentialStore::new(&databases);
        let user = store.ensure_user("Alice").expect("user");
        store
            .link(
                &user,
                "1",
                &json!({"access_token": {"oauth_token": "only-token"}}),
            )
            .expect("link");

        let error = factory(None)
            .create_client(&store, &user, None)
            .err()
            .expect("must fail");
        assert!(matches!(
            error,
            Error::CredentialMalformed {
                missing: "oauth_token_secret",
                ..
            }
        ));
    }

    #[test]
    fn create_client_binds_requested_site() {
        let (_temp, databases) = migrated_databases();
        let store = CredentialStore::new(&databases);
        let user = store.ensure_user("Alice").expect("user");
        store
            .link(
                &user,
                "1",
                &extra_data_for(&AccessToken::new("t", "s"), "Alice", 1),
            )
            .expect("link");

        let factory = factory(None);
        let home = factory.create_client(&store, &user, None).expect("home client");
        assert_eq!(home.site(), &WikiSite::new("meta", "wikimedia"));
        assert_eq!(home.request_count(), 0);

        let fiwiki = WikiSite::new("fi", "wikipedia");
        let client = factory
            .create_client(&store, &user, Some(&fiwiki))
            .expect("fiwiki client");
        assert_eq!(client.api_url().as_str(), "https://fi.wikipedia.org/w/api.php");
    }

    #[test]
    fn unreachable_wiki_reports_remote_unavailable() {
        let factory = factory(Some("http://127.0.0.1:9/w/api.php"));
        let mut client = factory
            .client_for_token(factory.home(), AccessToken::new("t", "s"))
            .expect("client");
        let error = edit_count(&mut client, "Alice").expect_err("must fail");
        assert!(matches!(error, Error::RemoteUnavailable { .. }));
        assert_eq!(client.request_count(), 1);
    }

    #[test]
    fn recent_contributions_are_bounded_and_newest_first() {
        let mut api = MockApi {
            contributions: vec![
                contribution("Old", "2025-01-01T00:00:00Z"),
                contribution("New", "2025-03-01T00:00:00Z"),
                contribution("Mid", "2025-02-01T00:00:00Z"),
            ],
            ..MockApi::default()
        };
        let contributions = recent_contributions(&mut api, "Alice", 10).expect("contribs");
        let pages: Vec<_> = contributions.iter().map(|c| c.page.as_str()).collect();
        assert_eq!(pages, vec!["New", "Mid", "Old"]);

        let limited = recent_contributions(&mut api, "Alice", 2).expect("contribs");
        assert_eq!(limited.len(), 2);

        let requests = api.request_count();
        assert!(recent_contributions(&mut api, "Alice", 0).expect("empty").is_empty());
        assert_eq!(api.request_count(), requests);
    }

    #[test]
    fn contributions_limit_is_capped() {
        let mut api = MockApi {
            contributions: (0..200)
                .map(|i| contribution(&format!("P{i}"), &format!("2025-01-01T00:{:02}:00Z", i % 60)))
                .collect(),
            ..MockApi::default()
        };
        let contributions = recent_contributions(&mut api, "Alice", 1_000).expect("contribs");
        assert_eq!(contributions.len(), MAX_CONTRIBUTIONS);
    }

    #[test]
    fn edit_count_propagates_remote_errors() {
        let mut api = MockApi {
            fail_with: Some(rejected),
            ..MockApi::default()
        };
        assert!(matches!(
            edit_count(&mut api, "Alice"),
            Err(Error::RemoteAuth { .. })
        ));

        let mut api = MockApi {
            fail_with: Some(unreachable),
            ..MockApi::default()
        };
        assert!(matches!(
            edit_count(&mut api, "Alice"),
            Err(Error::RemoteUnavailable { .. })
        ));
    }

    #[test]
    fn submit_edit_requires_title_and_records_edit() {
        let mut api = MockApi {
            site: Some(WikiSite::new("meta", "wikimedia")),
            ..MockApi::default()
        };
        assert!(matches!(
            submit_edit(&mut api, "  ", "text", "summary"),
            Err(Error::InvalidInput { .. })
        ));
        assert_eq!(api.request_count(), 0);

        let outcome =
            submit_edit(&mut api, "User:Alice/Sandbox", "hello", "testing").expect("edit");
        assert!(outcome.success);
        assert_eq!(outcome.revision_id, Some(9001));
        assert_eq!(
            api.edits,
            vec![(
                "User:Alice/Sandbox".to_string(),
                "hello".to_string(),
                "testing".to_string()
            )]
        );
    }

    #[test]
    fn refused_edit_is_an_unsaved_outcome() {
        let (url, server) = canned_wiki(vec![
            csrf_response("abc123+\\"),
            json!({"error": {
                "code": "protectedpage",
                "info": "This page has been protected to prevent editing or other actions."
            }}),
        ]);
        let mut client = client_at(&url);

        let outcome = submit_edit(&mut client, "Main Page", "vandalism", "test").expect("outcome");
        assert!(!outcome.success);
        assert_eq!(outcome.revision_id, None);
        assert_eq!(
            outcome.detail.as_deref(),
            Some("API Error: protectedpage - This page has been protected to prevent editing or other actions.")
        );
        assert_eq!(client.request_count(), 2);

        let requests = server.join().expect("server thread");
        assert!(requests[0].starts_with("GET "));
        assert!(requests[0].contains("meta=tokens"));
        assert!(requests[1].starts_with("POST "));
        assert!(requests[1].contains("action=edit"));
        assert!(requests[1].contains("token=abc123%2B%5C"));
        assert!(
            requests
                .iter()
                .all(|request| request.to_ascii_lowercase().contains("authorization: oauth "))
        );
    }

    #[test]
    fn edit_without_success_result_is_not_saved() {
        let (url, server) = canned_wiki(vec![
            csrf_response("abc123+\\"),
            json!({"edit": {"result": "Failure", "captcha": {"type": "image"}}}),
        ]);
        let mut client = client_at(&url);

        let outcome = submit_edit(&mut client, "Sandbox", "text", "").expect("outcome");
        assert!(!outcome.success);
        assert_eq!(outcome.revision_id, None);
        assert_eq!(outcome.detail.as_deref(), Some("edit result: Failure"));
        server.join().expect("server thread");
    }

    #[test]
    fn saved_edits_reuse_the_csrf_token() {
        let (url, server) = canned_wiki(vec![
            csrf_response("abc123+\\"),
            json!({"edit": {"result": "Success", "pageid": 5, "title": "Sandbox", "newrevid": 9002}}),
            json!({"edit": {"result": "Success", "pageid": 5, "title": "Sandbox", "nochange": true}}),
        ]);
        let mut client = client_at(&url);

        let first = submit_edit(&mut client, "Sandbox", "v2", "update").expect("first edit");
        assert!(first.success);
        assert_eq!(first.revision_id, Some(9002));
        assert_eq!(first.detail, None);

        let second = submit_edit(&mut client, "Sandbox", "v2", "update").expect("second edit");
        assert!(second.success);
        assert_eq!(second.detail.as_deref(), Some("nochange"));
        assert_eq!(client.request_count(), 3);

        let requests = server.join().expect("server thread");
        assert_eq!(
            requests.iter().filter(|request| request.contains("meta=tokens")).count(),
            1
        );
    }

    #[test]
    fn anonymous_csrf_token_is_an_auth_error() {
        let (url, server) = canned_wiki(vec![csrf_response("+\\")]);
        let mut client = client_at(&url);

        let error = submit_edit(&mut client, "Sandbox", "text", "").expect_err("must fail");
        match error {
            Error::RemoteAuth { code, .. } => assert_eq!(code, "anon"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.request_count(), 1);
        let requests = server.join().expect("server thread");
        assert_eq!(requests.len(), 1);
    }

    #[test]
    fn current_page_reads_main_slot_and_missing_pages() {
        let (url, server) = canned_wiki(vec![
            json!({"batchcomplete": true, "query": {"pages": [{
                "pageid": 5, "ns": 0, "title": "Sandbox", "length": 11,
                "revisions": [{"revid": 9002, "parentid": 9001,
                    "slots": {"main": {"contentmodel": "wikitext", "contentformat": "text/x-wiki",
                                       "content": "hello world"}}}]
            }]}}),
            json!({"batchcomplete": true, "query": {"pages": [
                {"ns": 0, "title": "Nowhere", "missing": true}
            ]}}),
            json!({"batchcomplete": true, "query": {"pages": [
                {"title": "Bad|Title", "invalidreason": "illegal characters", "invalid": true}
            ]}}),
        ]);
        let mut client = client_at(&url);

        assert!(matches!(
            current_page(&mut client, " "),
            Err(Error::InvalidInput { .. })
        ));
        assert_eq!(client.request_count(), 0);

        let page = current_page(&mut client, "Sandbox").expect("page");
        assert_eq!(
            page,
            PageContent {
                exists: true,
                text: "hello world".to_string(),
                revision_id: Some(9002),
                length: 11,
            }
        );
        let missing = current_page(&mut client, "Nowhere").expect("missing page");
        assert!(!missing.exists);
        assert!(missing.text.is_empty());
        assert_eq!(missing.revision_id, None);
        let invalid = current_page(&mut client, "Bad|Title").expect("invalid title");
        assert!(!invalid.exists);

        let requests = server.join().expect("server thread");
        assert!(requests[0].contains("titles=Sandbox"));
        assert!(requests[0].contains("rvslots=main"));
    }

    #[test]
    fn api_error_codes_are_classified() {
        assert!(matches!(
            classify_api_error("mwoauth-invalid-authorization", "bad"),
            Error::RemoteAuth { .. }
        ));
        assert!(matches!(
            classify_api_error("badtoken", "bad"),
            Error::RemoteAuth { .. }
        ));
        assert!(matches!(
            classify_api_error("maxlag", "lagged"),
            Error::RemoteUnavailable { .. }
        ));
        assert!(matches!(
            classify_api_error("protectedpage", "nope"),
            Error::RemoteApi { .. }
        ));
    }

    #[test]
    fn http_statuses_are_classified() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            Some(Error::RemoteAuth { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(Error::RemoteUnavailable { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(Error::RemoteUnavailable { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Some(Error::RemoteApi { .. })
        ));
    }

    #[test]
    fn query_payloads_decode() {
        let parsed: QueryResponse = decode(
            json!({
                "batchcomplete": true,
                "query": {
                    "userinfo": {
                        "id": 42,
                        "name": "Alice",
                        "editcount": 1234,
                        "registration": "2010-01-01T00:00:00Z",
                        "groups": ["*", "user", "autoconfirmed"]
                    },
                    "usercontribs": [
                        {"userid": 42, "user": "Alice", "pageid": 1, "revid": 77, "parentid": 76,
                         "ns": 0, "title": "Main Page", "timestamp": "2025-01-15T12:00:00Z",
                         "comment": "Test edit", "size": 1000}
                    ]
                }
            }),
            "test",
        )
        .expect("decode");
        let info = parsed.query.userinfo.expect("userinfo");
        assert_eq!(info.name, "Alice");
        assert_eq!(info.editcount, Some(1234));
        assert_eq!(info.groups.len(), 3);
        assert_eq!(parsed.query.usercontribs[0].revid, 77);
        assert_eq!(parsed.query.usercontribs[0].title, "Main Page");
    }
}
