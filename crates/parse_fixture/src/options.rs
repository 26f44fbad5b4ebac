use std::{fs, path::Path};

use db_runtime::DEFAULT_MONGODB_PORT;
use parse_server::{normalize_mount_path, ServerConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::FixtureError;

pub const MONGODB_PORT_VAR: &str = "MONGODB_PORT";
pub const VERBOSE_VAR: &str = "VERBOSE";

pub const DEFAULT_DATABASE_NAME: &str = "parse-test";
pub const DEFAULT_MASTER_KEY: &str = "test";
pub const DEFAULT_JAVASCRIPT_KEY: &str = "test";
pub const DEFAULT_APP_ID: &str = "test";
pub const DEFAULT_PORT: u16 = 30001;
pub const DEFAULT_MOUNT_PATH: &str = "/1";

/// Caller overrides. Every absent field falls back to its default in
/// [`resolve_options`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixtureOptions {
    pub database_name: Option<String>,
    #[serde(rename = "databaseURI")]
    pub database_uri: Option<String>,
    pub master_key: Option<String>,
    pub javascript_key: Option<String>,
    pub app_id: Option<String>,
    pub port: Option<u16>,
    pub mount_path: Option<String>,
    #[serde(rename = "serverURL")]
    pub server_url: Option<String>,
    pub silent: Option<bool>,
    /// Passed through untouched to the application server.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FixtureOptions {
    pub fn from_toml_str(raw: &str) -> Result<Self, FixtureError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| FixtureError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Fields set on `overrides` replace the ones on `self`.
    pub fn merge(self, overrides: FixtureOptions) -> Self {
        let mut extra = self.extra;
        extra.extend(overrides.extra);
        Self {
            database_name: overrides.database_name.or(self.database_name),
            database_uri: overrides.database_uri.or(self.database_uri),
            master_key: overrides.master_key.or(self.master_key),
            javascript_key: overrides.javascript_key.or(self.javascript_key),
            app_id: overrides.app_id.or(self.app_id),
            port: overrides.port.or(self.port),
            mount_path: overrides.mount_path.or(self.mount_path),
            server_url: overrides.server_url.or(self.server_url),
            silent: overrides.silent.or(self.silent),
            extra,
        }
    }
}

/// The process environment, captured once so resolution stays pure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    pub mongodb_port: Option<String>,
    pub verbose: Option<String>,
}

impl EnvSnapshot {
    pub fn from_process() -> Self {
        Self {
            mongodb_port: std::env::var(MONGODB_PORT_VAR).ok(),
            verbose: std::env::var(VERBOSE_VAR).ok(),
        }
    }

    pub fn mongodb_port(&self) -> u16 {
        let Some(raw) = self.mongodb_port.as_deref() else {
            return DEFAULT_MONGODB_PORT;
        };
        raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = %raw, "ignoring unparsable {MONGODB_PORT_VAR}");
            DEFAULT_MONGODB_PORT
        })
    }

    pub fn verbose(&self) -> bool {
        self.verbose.as_deref() == Some("1")
    }
}

/// Configuration a fixture is actually started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveOptions {
    pub database_name: String,
    #[serde(rename = "databaseURI")]
    pub database_uri: String,
    pub master_key: String,
    pub javascript_key: String,
    pub app_id: String,
    pub port: u16,
    pub mount_path: String,
    #[serde(rename = "serverURL")]
    pub server_url: String,
    pub silent: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EffectiveOptions {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            app_id: self.app_id.clone(),
            master_key: self.master_key.clone(),
            javascript_key: self.javascript_key.clone(),
            server_url: self.server_url.clone(),
            database_uri: self.database_uri.clone(),
            silent: self.silent,
            extra: self.extra.clone(),
        }
    }

    pub fn uses_embedded_database(&self) -> bool {
        self.database_uri.starts_with("sqlite:")
    }
}

pub fn resolve_options(options: &FixtureOptions, env: &EnvSnapshot) -> EffectiveOptions {
    let database_name = options
        .database_name
        .clone()
        .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());
    let database_uri = options.database_uri.clone().unwrap_or_else(|| {
        format!(
            "mongodb://localhost:{}/{database_name}",
            env.mongodb_port()
        )
    });
    let port = options.port.unwrap_or(DEFAULT_PORT);
    let mount_path = normalize_mount_path(
        options
            .mount_path
            .as_deref()
            .unwrap_or(DEFAULT_MOUNT_PATH),
    );
    let server_url = options.server_url.clone().unwrap_or_else(|| {
        let path = if mount_path == "/" { "" } else { mount_path.as_str() };
        format!("http://localhost:{port}{path}")
    });

    EffectiveOptions {
        database_name,
        database_uri,
        master_key: options
            .master_key
            .clone()
            .unwrap_or_else(|| DEFAULT_MASTER_KEY.to_string()),
        javascript_key: options
            .javascript_key
            .clone()
            .unwrap_or_else(|| DEFAULT_JAVASCRIPT_KEY.to_string()),
        app_id: options
            .app_id
            .clone()
            .unwrap_or_else(|| DEFAULT_APP_ID.to_string()),
        port,
        mount_path,
        server_url,
        silent: options.silent.unwrap_or(!env.verbose()),
        extra: options.extra.clone(),
    }
}

#[cfg(test)]
#[path = "tests/options_tests.rs"]
mod tests;
