use serde::Deserialize;

use crate::connection::ConnectionUrl;

/// Control table used when the caller does not name one.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Query parameter naming the control table.
pub const MIGRATIONS_TABLE_PARAM: &str = "x-migrations-table";

/// Query parameter enabling multi-instruction transactions where they are optional.
pub const TRANSACTION_MODE_PARAM: &str = "x-transaction-mode";

/// Per-driver settings, resolved once when the driver is constructed.
///
/// `database_name` and `schema_name` are overwritten with what the backend
/// reports about the live connection whenever the backend can answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub migrations_table: String,
    pub database_name: String,
    pub schema_name: String,
    pub transaction_mode: bool,
}

impl Config {
    /// Build a config from the driver-private parameters of a connection URL.
    pub fn from_url(url: &ConnectionUrl) -> tidemark_common::Result<Self> {
        let transaction_mode = match url.param(TRANSACTION_MODE_PARAM) {
            Some(raw) => parse_bool(raw).ok_or_else(|| {
                tidemark_common::Error::Url(format!(
                    "{TRANSACTION_MODE_PARAM} must be a boolean, got {raw:?}"
                ))
            })?,
            None => false,
        };

        Ok(Self {
            migrations_table: url.param(MIGRATIONS_TABLE_PARAM).unwrap_or_default().to_string(),
            database_name: url.database().unwrap_or_default().to_string(),
            schema_name: String::new(),
            transaction_mode,
        })
    }

    /// Fill in the default control table if none was given.
    pub fn with_defaults(mut self) -> Self {
        if self.migrations_table.is_empty() {
            self.migrations_table = DEFAULT_MIGRATIONS_TABLE.to_string();
        }
        self
    }
}

/// A migration target as written in a config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub migrations_table: Option<String>,
    #[serde(default)]
    pub transaction_mode: Option<bool>,
}

impl TargetConfig {
    /// Resolve the URL and driver config; file values win over URL parameters.
    pub fn resolve(&self) -> tidemark_common::Result<(ConnectionUrl, Config)> {
        let raw = self
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(tidemark_common::Error::NilConfig)?;
        let url = ConnectionUrl::parse(raw)?;
        let mut config = Config::from_url(&url)?;

        if let Some(table) = &self.migrations_table {
            config.migrations_table = table.clone();
        }
        if let Some(mode) = self.transaction_mode {
            config.transaction_mode = mode;
        }
        Ok((url, config.with_defaults()))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
