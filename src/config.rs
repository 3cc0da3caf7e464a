//! Runtime configuration from `GTM_*` environment variables.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const RESULTS_QUEUE_VAR: &str = "GTM_SQS_RESULTS_QUEUE";
pub const RESULTS_TOPIC_VAR: &str = "GTM_SNS_RESULTS_TOPIC";
pub const WEBHOOK_SECRET_VAR: &str = "GTM_GITHUB_WEBHOOK_SECRET";
pub const GITHUB_HOST_VAR: &str = "GTM_GITHUB_HOST";
pub const GITHUB_PATH_PREFIX_VAR: &str = "GTM_GITHUB_PATH_PREFIX";
pub const GITHUB_TIMEOUT_VAR: &str = "GTM_GITHUB_TIMEOUT";
pub const GITHUB_PROXY_VAR: &str = "GTM_GITHUB_PROXY";
pub const GITHUB_TOKEN_VAR: &str = "GTM_GITHUB_TOKEN";
pub const TLS_REJECT_UNAUTHORIZED_VAR: &str = "GTM_TLS_REJECT_UNAUTHORIZED";
pub const TASK_CONFIG_VAR: &str = "GTM_TASK_CONFIG";
pub const LISTEN_ADDR_VAR: &str = "GTM_LISTEN_ADDR";
pub const QUEUE_DIR_VAR: &str = "GTM_QUEUE_DIR";

const DEFAULT_RESULTS_QUEUE: &str = "gtm-results";
const DEFAULT_RESULTS_TOPIC: &str = "gtm-results";
const DEFAULT_GITHUB_HOST: &str = "api.github.com";
const DEFAULT_GITHUB_TIMEOUT_MS: u64 = 5000;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_QUEUE_DIR: &str = "./gtm-queue";

/// Prefix of per-context token variables, e.g. `GTM_GITHUB_TOKEN_JENKINS`.
const CONTEXT_TOKEN_PREFIX: &str = "GTM_GITHUB_TOKEN_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} must be true or false, got '{value}'")]
    InvalidBool { key: &'static str, value: String },

    #[error("{key} must be a socket address, got '{value}'")]
    InvalidAddr { key: &'static str, value: String },
}

/// Settings for the GitHub API client used by the status consumer.
#[derive(Clone, PartialEq, Eq)]
pub struct GitHubConfig {
    pub host: String,
    pub path_prefix: String,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub reject_unauthorized: bool,
    default_token: Option<String>,
    context_tokens: HashMap<String, String>,
}

impl GitHubConfig {
    /// `https://<host><prefix>`, the API base the client talks to.
    pub fn base_uri(&self) -> String {
        let prefix = self.path_prefix.trim_end_matches('/');
        if prefix.is_empty() || prefix.starts_with('/') {
            format!("https://{}{}", self.host, prefix)
        } else {
            format!("https://{}/{}", self.host, prefix)
        }
    }

    /// Token for a status context.
    ///
    /// Looks up `GTM_GITHUB_TOKEN_<CONTEXT>` (context upper-cased, `-` replaced
    /// by `_`), falling back to `GTM_GITHUB_TOKEN`.
    pub fn token_for_context(&self, context: &str) -> Option<&str> {
        self.context_tokens
            .get(&context_token_key(context))
            .map(String::as_str)
            .or(self.default_token.as_deref())
    }
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut contexts: Vec<&String> = self.context_tokens.keys().collect();
        contexts.sort();
        f.debug_struct("GitHubConfig")
            .field("host", &self.host)
            .field("path_prefix", &self.path_prefix)
            .field("timeout", &self.timeout)
            .field("proxy", &self.proxy)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("has_default_token", &self.default_token.is_some())
            .field("token_contexts", &contexts)
            .finish()
    }
}

fn context_token_key(context: &str) -> String {
    context.to_uppercase().replace('-', "_")
}

/// Agent configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub results_queue: String,
    pub results_topic: String,
    pub webhook_secret: Option<String>,
    pub github: GitHubConfig,
    pub task_config_path: Option<PathBuf>,
    pub listen_addr: SocketAddr,
    pub queue_dir: PathBuf,
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Builds a configuration from `(key, value)` pairs. Empty values count
    /// as unset.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let get = |key: &str| vars.get(key).cloned();

        let timeout_ms = match get(GITHUB_TIMEOUT_VAR) {
            Some(value) => value.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
                key: GITHUB_TIMEOUT_VAR,
                value,
            })?,
            None => DEFAULT_GITHUB_TIMEOUT_MS,
        };

        let reject_unauthorized = match get(TLS_REJECT_UNAUTHORIZED_VAR) {
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidBool {
                key: TLS_REJECT_UNAUTHORIZED_VAR,
                value,
            })?,
            None => true,
        };

        let listen_addr_raw = get(LISTEN_ADDR_VAR).unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_addr_raw
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidAddr {
                key: LISTEN_ADDR_VAR,
                value: listen_addr_raw.clone(),
            })?;

        let context_tokens = vars
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(CONTEXT_TOKEN_PREFIX)
                    .filter(|context| !context.is_empty())
                    .map(|context| (context.to_string(), value.clone()))
            })
            .collect();

        Ok(Config {
            results_queue: get(RESULTS_QUEUE_VAR).unwrap_or_else(|| DEFAULT_RESULTS_QUEUE.to_string()),
            results_topic: get(RESULTS_TOPIC_VAR).unwrap_or_else(|| DEFAULT_RESULTS_TOPIC.to_string()),
            webhook_secret: get(WEBHOOK_SECRET_VAR),
            github: GitHubConfig {
                host: get(GITHUB_HOST_VAR).unwrap_or_else(|| DEFAULT_GITHUB_HOST.to_string()),
                path_prefix: get(GITHUB_PATH_PREFIX_VAR).unwrap_or_default(),
                timeout: Duration::from_millis(timeout_ms),
                proxy: get(GITHUB_PROXY_VAR),
                reject_unauthorized,
                default_token: get(GITHUB_TOKEN_VAR),
                context_tokens,
            },
            task_config_path: get(TASK_CONFIG_VAR).map(PathBuf::from),
            listen_addr,
            queue_dir: get(QUEUE_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_QUEUE_DIR)),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("results_queue", &self.results_queue)
            .field("results_topic", &self.results_topic)
            .field("has_webhook_secret", &self.webhook_secret.is_some())
            .field("github", &self.github)
            .field("task_config_path", &self.task_config_path)
            .field("listen_addr", &self.listen_addr)
            .field("queue_dir", &self.queue_dir)
            .finish()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
