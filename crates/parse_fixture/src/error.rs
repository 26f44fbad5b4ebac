use std::path::PathBuf;

use db_runtime::RuntimeError;
use storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to start database runtime")]
    DatabaseStart(#[source] RuntimeError),
    #[error("failed to connect to database at '{uri}'")]
    DatabaseConnect {
        uri: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to bind http listener on port {port}")]
    ListenerBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("http listener failed while shutting down")]
    ListenerClose(#[source] std::io::Error),
    #[error("http serve task did not finish cleanly")]
    ServeTask(#[source] tokio::task::JoinError),
    #[error("failed to stop database runtime")]
    DatabaseStop(#[source] RuntimeError),
    #[error("failed to drop fixture data")]
    ResetData(#[source] StorageError),
    #[error("failed to read fixture config '{path}'")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid fixture config")]
    ConfigParse(#[from] toml::de::Error),
    #[error("invalid mount path")]
    MountPath(#[source] parse_server::MountPathError),
    #[error("process-wide fixture runtime is unavailable")]
    FixtureRuntime(#[source] std::io::Error),
    #[error("process-wide fixture operation did not complete")]
    FixtureTask(#[source] tokio::task::JoinError),
    #[error("no fixture is running")]
    NotRunning,
    #[error("a fixture is already running")]
    AlreadyRunning,
}
