//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::api::DEFAULT_API_URL;
use crate::operation::PollSettings;

/// CLC account configuration derived from environment variables,
/// configuration files, and CLI flags.
///
/// The `CLC` prefix maps fields onto the conventional variables
/// (`CLC_V2_API_USERNAME`, `CLC_V2_API_PASSWD`, `CLC_V2_API_TOKEN`,
/// `CLC_ACCT_ALIAS`, `CLC_LOCATION`, `CLC_V2_API_URL`).
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CLC",
    discovery(
        app_name = "clc",
        env_var = "CLC_CONFIG_PATH",
        config_file_name = "clc.toml",
        dotfile_name = ".clc.toml",
        project_file_name = "clc.toml"
    )
)]
pub struct ClcConfig {
    /// API username, exchanged together with the password for a token.
    pub v2_api_username: Option<String>,
    /// API password.
    pub v2_api_passwd: Option<String>,
    /// Pre-issued bearer token. Requires `acct_alias`.
    pub v2_api_token: Option<String>,
    /// Account alias; overrides the alias returned by login.
    pub acct_alias: Option<String>,
    /// Default datacenter; overrides the location returned by login.
    pub location: Option<String>,
    /// API endpoint.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    pub v2_api_url: String,
    /// Seconds to sleep between operation status polls.
    #[ortho_config(default = 2)]
    pub poll_interval_secs: u64,
    /// Maximum status polls per asynchronous operation.
    #[ortho_config(default = 300)]
    pub max_polls: u32,
}

/// Credentials selected from a validated [`ClcConfig`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Credentials {
    /// Bearer token plus the account alias it belongs to.
    Token {
        /// Bearer token.
        token: String,
        /// Account alias.
        alias: String,
    },
    /// Username and password for the login exchange.
    Password {
        /// API username.
        username: String,
        /// API password.
        password: String,
    },
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "{}: set {} or add {} to clc.toml",
            self.description, self.env_var, self.toml_key
        )
    }
}

const USERNAME: FieldMetadata =
    FieldMetadata::new("API username", "CLC_V2_API_USERNAME", "v2_api_username");
const PASSWORD: FieldMetadata =
    FieldMetadata::new("API password", "CLC_V2_API_PASSWD", "v2_api_passwd");
const TOKEN: FieldMetadata = FieldMetadata::new("API token", "CLC_V2_API_TOKEN", "v2_api_token");
const ALIAS: FieldMetadata = FieldMetadata::new("account alias", "CLC_ACCT_ALIAS", "acct_alias");
const API_URL: FieldMetadata = FieldMetadata::new("API URL", "CLC_V2_API_URL", "v2_api_url");

fn present(value: Option<&String>) -> Option<String> {
    value
        .map(|inner| inner.trim().to_owned())
        .filter(|inner| !inner.is_empty())
}

impl ClcConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("clc")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Selects the credentials to authenticate with. A token wins over a
    /// username and password.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when neither a token plus alias
    /// nor a username plus password is configured.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        if let Some(token) = present(self.v2_api_token.as_ref()) {
            let alias = present(self.acct_alias.as_ref()).ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "missing {} to use with the API token",
                    ALIAS.hint()
                ))
            })?;
            return Ok(Credentials::Token { token, alias });
        }

        let username = present(self.v2_api_username.as_ref());
        let password = present(self.v2_api_passwd.as_ref());
        match (username, password) {
            (Some(user), Some(secret)) => Ok(Credentials::Password {
                username: user,
                password: secret,
            }),
            (Some(_), None) => Err(ConfigError::MissingField(format!(
                "missing {}",
                PASSWORD.hint()
            ))),
            (None, _) => Err(ConfigError::MissingField(format!(
                "missing credentials: provide {} and {}, or {}",
                USERNAME.hint(),
                PASSWORD.hint(),
                TOKEN.hint()
            ))),
        }
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values via environment variables or configuration
    /// files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when credentials or the API URL
    /// are missing, and [`ConfigError::Invalid`] when polling is disabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.credentials()?;
        if self.v2_api_url.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}",
                API_URL.hint()
            )));
        }
        if self.max_polls == 0 {
            return Err(ConfigError::Invalid(String::from(
                "max_polls must be at least 1",
            )));
        }
        Ok(())
    }

    /// Returns the polling cadence for asynchronous operations.
    #[must_use]
    pub const fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_polls: self.max_polls,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
