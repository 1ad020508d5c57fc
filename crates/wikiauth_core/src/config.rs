use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};


pub const DEFAULT_USER_AGENT: &str = "wikiauth/0.1";
pub const DEFAULT_CONFIG_FILENAME: &str = "wikiauth.toml";
pub const DEFAULT_HOME_WIKI_CODE: &str = "meta";
pub const DEFAULT_HOME_WIKI_FAMILY: &str = "wikimedia";
pub const DEFAULT_OAUTH_HOME_URL: &str = "https://meta.wikimedia.org";
pub const DEFAULT_OAUTH_CALLBACK: &str = "oob";
pub const DEFAULT_PRIMARY_DB_PATH: &str = ".wikiauth/wikiauth.db";
pub const DEFAULT_REPLICA_WIKI_CODE: &str = "metawiki";
pub const DEFAULT_MAX_ROWS: usize = 500;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const PRIMARY_CONNECTION_NAME: &str = "default";

/// Raw file contents; every field optional so partial files load.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub oauth: OAuthSection,
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OAuthSection {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub callback: Option<String>,
    pub home_wiki_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub code: Option<String>,
    pub family: Option<String>,
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DatabaseSection {
    pub primary_path: Option<PathBuf>,
    pub replica_wiki_code: Option<String>,
    pub replica_path: Option<PathBuf>,
    pub replica_host: Option<String>,
    pub max_rows: Option<usize>,
}

/// Load and parse an AppConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    if !config_path.exists() {
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: AppConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Fully resolved settings, built once at startup and passed explicitly.
#[derive(Debug, Clone)]
pub struct Settings {
    pub consumer: ConsumerSettings,
    pub home_wiki: HomeWikiSettings,
    pub http: HttpSettings,
    pub primary: ConnectionSettings,
    pub replica: ReplicaSettings,
}

#[derive(Clone)]
pub struct ConsumerSettings {
    pub key: String,
    pub secret: String,
    pub callback: String,
    /// Base URL of the wiki hosting `Special:OAuth`.
    pub home_wiki_url: String,
}

impl std::fmt::Debug for ConsumerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSettings")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("callback", &self.callback)
            .field("home_wiki_url", &self.home_wiki_url)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeWikiSettings {
    pub code: String,
    pub family: String,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSettings {
    pub wiki_code: String,
    pub host: String,
    pub connection: ConnectionSettings,
    pub max_rows: usize,
}

impl Settings {
    pub fn resolve(config: &AppConfig, base_dir: &Path) -> Result<Self> {
        Self::resolve_with(config, base_dir, |key| env::var(key).ok())
    }

    /// Resolution order: env > config file > default.
    pub fn resolve_with<F>(config: &AppConfig, base_dir: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let consumer = ConsumerSettings {
            key: env_value("OAUTH_CONSUMER_KEY")
                .or_else(|| config.oauth.consumer_key.clone())
                .unwrap_or_default(),
            secret: env_value("OAUTH_CONSUMER_SECRET")
                .or_else(|| config.oauth.consumer_secret.clone())
                .unwrap_or_default(),
            callback: env_value("OAUTH_CALLBACK")
                .or_else(|| config.oauth.callback.clone())
                .unwrap_or_else(|| DEFAULT_OAUTH_CALLBACK.to_string()),
            home_wiki_url: env_value("OAUTH_HOME_WIKI_URL")
                .or_else(|| config.oauth.home_wiki_url.clone())
                .unwrap_or_else(|| DEFAULT_OAUTH_HOME_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        let home_wiki = HomeWikiSettings {
            code: env_value("WIKI_CODE")
                .or_else(|| config.wiki.code.clone())
                .unwrap_or_else(|| DEFAULT_HOME_WIKI_CODE.to_string()),
            family: env_value("WIKI_FAMILY")
                .or_else(|| config.wiki.family.clone())
                .unwrap_or_else(|| DEFAULT_HOME_WIKI_FAMILY.to_string()),
            api_url: env_value("WIKI_API_URL").or_else(|| config.wiki.api_url.clone()),
        };

        let timeout_ms = match env_value("WIKI_HTTP_TIMEOUT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid WIKI_HTTP_TIMEOUT_MS: {raw}"))?,
            None => config.wiki.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        };
        let http = HttpSettings {
            user_agent: env_value("WIKI_USER_AGENT")
                .or_else(|| config.wiki.user_agent.clone())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms,
        };

        let primary_path = env_value("PRIMARY_DB_PATH")
            .map(PathBuf::from)
            .or_else(|| config.database.primary_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PRIMARY_DB_PATH));
        let primary = ConnectionSettings {
            name: PRIMARY_CONNECTION_NAME.to_string(),
            path: absolutize(base_dir, primary_path),
        };

        let wiki_code = env_value("REPLICA_WIKI_CODE")
            .or_else(|| config.database.replica_wiki_code.clone())
            .unwrap_or_else(|| DEFAULT_REPLICA_WIKI_CODE.to_string());
        if wiki_code.contains(['/', '\\', '.']) {
            bail!("invalid replica wiki code: {wiki_code}");
        }
        let replica_name = replica_database_name(&wiki_code);
        let replica_path = env_value("REPLICA_DB_PATH")
            .map(PathBuf::from)
            .or_else(|| config.database.replica_path.clone())
            .unwrap_or_else(|| {
                primary
                    .path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default()
                    .join(format!("{replica_name}.sqlite"))
            });
        let max_rows = match env_value("REPLICA_MAX_ROWS") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid REPLICA_MAX_ROWS: {raw}"))?,
            None => config.database.max_rows.unwrap_or(DEFAULT_MAX_ROWS),
        };
        if max_rows == 0 {
            bail!("replica max_rows must be positive");
        }
        let replica = ReplicaSettings {
            host: env_value("REPLICA_DB_HOST")
                .or_else(|| config.database.replica_host.clone())
                .unwrap_or_else(|| replica_host(&wiki_code)),
            connection: ConnectionSettings {
                name: replica_name,
                path: absolutize(base_dir, replica_path),
            },
            wiki_code,
            max_rows,
        };
        if replica.connection.name == primary.name {
            bail!("replica and primary connections must have distinct names");
        }

        Ok(Self {
            consumer,
            home_wiki,
            http,
            primary,
            replica,
        })
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "home_wiki={}.{}\noauth_home={}\nconsumer_key_set={}\nprimary={} ({})\nreplica={} ({}) host={}\nreplica_max_rows={}",
            self.home_wiki.code,
            self.home_wiki.family,
            self.consumer.home_wiki_url,
            !self.consumer.key.is_empty(),
            self.primary.name,
            self.primary.path.display(),
            self.replica.connection.name,
            self.replica.connection.path.display(),
            self.replica.host,
            self.replica.max_rows,
        )
    }
}

/// Public replicas are named `<wikicode>_p` by hosting convention.
pub fn replica_database_name(wiki_code: &str) -> String {
    format!("{wiki_code}_p")
}

pub fn replica_host(wiki_code: &str) -> String {
    format!("{wiki_code}.analytics.db.svc.wikimedia.cloud")
}

fn absolutize(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
