//! Process configuration resolved from environment variables.
//!
//! All backend credentials are required and checked together at startup, so a
//! misconfigured deployment fails before it opens any connection.

use std::time::Duration;

use secrecy::SecretString;

use crate::security::PasswordGrant;

/// Environment variable names.
pub mod env_vars {
    pub const LOGIN_URL: &str = "SALESFORCE_LOGIN_URL";
    pub const CLIENT_ID: &str = "SALESFORCE_CLIENT_ID";
    pub const CLIENT_SECRET: &str = "SALESFORCE_CLIENT_SECRET";
    pub const USERNAME: &str = "SALESFORCE_USERNAME";
    pub const PASSWORD: &str = "SALESFORCE_PASSWORD";
    pub const TOKEN: &str = "SALESFORCE_TOKEN";
    pub const USER_ID: &str = "SALESFORCE_USER_ID";
    pub const API_VERSION: &str = "SALESFORCE_API_VERSION";
    pub const HOST: &str = "BRIDGE_HOST";
    pub const PORT: &str = "BRIDGE_PORT";
    pub const HTTP_TIMEOUT_SECS: &str = "BRIDGE_HTTP_TIMEOUT_SECS";
    pub const DEDUP_WINDOW_SECS: &str = "BRIDGE_DEDUP_WINDOW_SECS";
    pub const LOG_JSON: &str = "BRIDGE_LOG_JSON";

    pub const REQUIRED: [&str; 7] = [
        LOGIN_URL,
        CLIENT_ID,
        CLIENT_SECRET,
        USERNAME,
        PASSWORD,
        TOKEN,
        USER_ID,
    ];
}

pub const DEFAULT_API_VERSION: &str = "52.0";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub login_url: String,
    pub grant: PasswordGrant,
    /// Acting principal stamped on outbound events.
    pub user_id: String,
    pub api_version: String,
    pub host: String,
    pub port: u16,
    /// Per-request timeout for authentication, query and publish calls.
    pub http_timeout: Duration,
    /// Window in which identical approvals are published once. Zero disables.
    pub dedup_window: Duration,
    pub log_json: bool,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve the configuration through an arbitrary lookup. Empty values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let missing: Vec<&'static str> = env_vars::REQUIRED
            .iter()
            .copied()
            .filter(|name| get(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        let required = |name: &'static str| get(name).unwrap_or_default();

        let login_url = required(env_vars::LOGIN_URL);
        if !(login_url.starts_with("https://") || login_url.starts_with("http://")) {
            return Err(ConfigError::Invalid {
                name: env_vars::LOGIN_URL,
                value: login_url,
            });
        }

        let port = match get(env_vars::PORT) {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                name: env_vars::PORT,
                value: v,
            })?,
            None => DEFAULT_PORT,
        };
        let http_timeout =
            parse_secs(&get, env_vars::HTTP_TIMEOUT_SECS)?.unwrap_or(DEFAULT_HTTP_TIMEOUT);
        if http_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: env_vars::HTTP_TIMEOUT_SECS,
                value: "0".into(),
            });
        }
        let dedup_window =
            parse_secs(&get, env_vars::DEDUP_WINDOW_SECS)?.unwrap_or(DEFAULT_DEDUP_WINDOW);
        let log_json = match get(env_vars::LOG_JSON).as_deref() {
            None | Some("0" | "false" | "no") => false,
            Some("1" | "true" | "yes") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: env_vars::LOG_JSON,
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            login_url: login_url.trim_end_matches('/').to_string(),
            grant: PasswordGrant {
                client_id: required(env_vars::CLIENT_ID),
                client_secret: SecretString::from(required(env_vars::CLIENT_SECRET)),
                username: required(env_vars::USERNAME),
                password: SecretString::from(required(env_vars::PASSWORD)),
                security_token: SecretString::from(required(env_vars::TOKEN)),
            },
            user_id: required(env_vars::USER_ID),
            api_version: get(env_vars::API_VERSION)
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            host: get(env_vars::HOST).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            http_timeout,
            dedup_window,
            log_json,
        })
    }

    /// OAuth token endpoint derived from the login URL.
    pub fn token_url(&self) -> String {
        format!("{}/services/oauth2/token", self.login_url)
    }
}

fn parse_secs(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match get(name) {
        Some(v) => v
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::Invalid { name, value: v }),
        None => Ok(None),
    }
}
