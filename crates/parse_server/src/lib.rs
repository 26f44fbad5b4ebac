//! In-process stand-in for the external Parse application server.
//!
//! It covers only what fixture tests talk to: a health probe, key checks,
//! server info, and creating and reading class objects. It can be mounted
//! under any path of an `axum` router.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use storage::Storage;
use thiserror::Error;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info;

mod api;
mod app_state;
mod auth;

use app_state::AppState;

const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub app_id: String,
    pub master_key: String,
    pub javascript_key: String,
    #[serde(rename = "serverURL")]
    pub server_url: String,
    #[serde(rename = "databaseURI")]
    pub database_uri: String,
    pub silent: bool,
    /// Caller options the server does not interpret, kept for introspection.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone)]
pub struct ParseServer {
    state: Arc<AppState>,
}

impl ParseServer {
    pub fn new(config: ServerConfig, storage: Storage) -> Self {
        if !config.silent {
            info!(
                app_id = %config.app_id,
                server_url = %config.server_url,
                database = %storage.database_name(),
                "parse server configured"
            );
        }
        Self {
            state: Arc::new(AppState { config, storage }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    pub fn storage(&self) -> &Storage {
        &self.state.storage
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    let keyed = Router::new()
        .route("/serverInfo", get(api::server_info))
        .route(
            "/classes/:class_name",
            post(api::create_object).get(api::list_objects),
        )
        .route("/classes/:class_name/:object_id", get(api::get_object))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_application_id,
        ));

    let router = Router::new()
        .route("/health", get(api::health))
        .merge(keyed)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state.clone());

    if state.config.silent {
        router
    } else {
        router.layer(TraceLayer::new_for_http())
    }
}

/// Leading slash, no trailing slash; the empty path becomes `/`.
pub fn normalize_mount_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Mount paths are literal; route patterns would make `Router::nest` panic
/// or capture parts of the path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MountPathError {
    #[error("mount path '{0}' contains a wildcard")]
    Wildcard(String),
    #[error("mount path '{0}' contains a capture segment")]
    Capture(String),
}

/// Normalizes `raw` and rejects route pattern syntax.
pub fn check_mount_path(raw: &str) -> Result<String, MountPathError> {
    let mount_path = normalize_mount_path(raw);
    if mount_path.contains('*') {
        return Err(MountPathError::Wildcard(mount_path));
    }
    if mount_path.split('/').any(|segment| segment.starts_with(':')) {
        return Err(MountPathError::Capture(mount_path));
    }
    Ok(mount_path)
}

/// Mounts `server` on `app` under `mount_path`.
pub fn mount(
    app: Router,
    mount_path: &str,
    server: &ParseServer,
) -> Result<Router, MountPathError> {
    let mount_path = check_mount_path(mount_path)?;
    Ok(if mount_path == "/" {
        app.merge(server.router())
    } else {
        app.nest(&mount_path, server.router())
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
