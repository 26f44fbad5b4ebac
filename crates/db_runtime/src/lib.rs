//! Database processes a fixture can own for the duration of a test run.

use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;
use thiserror::Error;
use tokio::{net::TcpStream, process::Child, process::Command};
use tracing::{debug, info, warn};

pub const DEFAULT_MONGODB_PORT: u16 = 27017;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn '{binary}'")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("port {0} is already accepting connections")]
    PortInUse(u16),
    #[error("database process exited before becoming ready ({0})")]
    Exited(ExitStatus),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An external database process with an async start/stop lifecycle.
#[async_trait]
pub trait DatabaseRuntime: Send + Sync {
    /// Resolves once the database accepts connections.
    async fn start(&mut self) -> Result<(), RuntimeError>;
    /// Stopping a runtime that is not running is a no-op.
    async fn stop(&mut self) -> Result<(), RuntimeError>;
    fn name(&self) -> &'static str;
}

/// Runtime for databases that live inside the test process, such as SQLite.
#[derive(Debug, Default)]
pub struct InProcessRuntime {
    running: bool,
}

impl InProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

#[async_trait]
impl DatabaseRuntime for InProcessRuntime {
    async fn start(&mut self) -> Result<(), RuntimeError> {
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RuntimeError> {
        self.running = false;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-process"
    }
}

#[derive(Debug, Clone)]
pub struct MongodConfig {
    pub binary: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Default for MongodConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("mongod"),
            host: "127.0.0.1".into(),
            port: DEFAULT_MONGODB_PORT,
        }
    }
}

impl MongodConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}

/// Spawns a throwaway `mongod` backed by a temporary data directory.
#[derive(Debug)]
pub struct MongodRunner {
    config: MongodConfig,
    child: Option<Child>,
    data_dir: Option<TempDir>,
}

impl MongodRunner {
    pub fn new(config: MongodConfig) -> Self {
        Self {
            config,
            child: None,
            data_dir: None,
        }
    }

    pub fn config(&self) -> &MongodConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    async fn accepts_connections(&self) -> bool {
        TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .is_ok()
    }
}

#[async_trait]
impl DatabaseRuntime for MongodRunner {
    async fn start(&mut self) -> Result<(), RuntimeError> {
        if self.child.is_some() {
            return Ok(());
        }
        if self.accepts_connections().await {
            return Err(RuntimeError::PortInUse(self.config.port));
        }

        let data_dir = tempfile::Builder::new()
            .prefix("mongod-fixture-")
            .tempdir()?;
        let binary = self.config.binary.display().to_string();
        let mut child = Command::new(&self.config.binary)
            .arg("--port")
            .arg(self.config.port.to_string())
            .arg("--bind_ip")
            .arg(&self.config.host)
            .arg("--dbpath")
            .arg(data_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                binary: binary.clone(),
                source,
            })?;
        debug!(%binary, port = self.config.port, pid = ?child.id(), "mongod spawned");

        loop {
            if let Some(status) = child.try_wait()? {
                return Err(RuntimeError::Exited(status));
            }
            if self.accepts_connections().await {
                break;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        info!(port = self.config.port, "mongod ready");
        self.child = Some(child);
        self.data_dir = Some(data_dir);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RuntimeError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        child.kill().await?;
        if let Some(data_dir) = self.data_dir.take() {
            if let Err(error) = data_dir.close() {
                warn!(%error, "failed to remove mongod data directory");
            }
        }
        info!(port = self.config.port, "mongod stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mongod"
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
