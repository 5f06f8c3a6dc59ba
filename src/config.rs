//! Connection settings for the Odoo backend.
//!
//! Values come either from the host's own configuration (the struct is
//! `Deserialize`) or from the environment:
//! - `ODOO_URL`
//! - `ODOO_DB`
//! - `ODOO_USER`
//! - `ODOO_PASSWORD`
//!
//! A `.env` file in the working directory is honoured when present.

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid Odoo URL: {0}")]
    InvalidUrl(String),
}

/// Credentials and location of the Odoo instance.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct OdooConfig {
    /// Base URL, e.g. `https://helpdesk.example.com`
    pub url: String,
    /// Database name
    pub database: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for OdooConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OdooConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl OdooConfig {
    pub fn new(
        url: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            url: url.into().trim_end_matches('/').to_string(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the environment, reading `.env` first if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming the first unset variable, or
    /// `ConfigError::InvalidUrl` for a URL without an http(s) scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is not an error; the variables may be exported directly.
        let _ = dotenvy::dotenv();

        Self::new(
            env_var("ODOO_URL")?,
            env_var("ODOO_DB")?,
            env_var("ODOO_USER")?,
            env_var("ODOO_PASSWORD")?,
        )
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("ODOO_URL"));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Missing("ODOO_DB"));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing("ODOO_USER"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("ODOO_PASSWORD"));
        }
        Ok(())
    }

    /// JSON-RPC gateway of the instance.
    pub fn rpc_endpoint(&self) -> String {
        format!("{}/jsonrpc", self.url.trim_end_matches('/'))
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}
