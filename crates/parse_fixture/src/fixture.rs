use std::net::{Ipv4Addr, SocketAddr};

use axum::Router;
use db_runtime::{DatabaseRuntime, InProcessRuntime, MongodConfig, MongodRunner};
use parse_server::ParseServer;
use serde::{Deserialize, Serialize};
use storage::{redact_uri, Storage};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    options::{resolve_options, EffectiveOptions, EnvSnapshot, FixtureOptions},
    FixtureError,
};

/// Read-only view of a running fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureSnapshot {
    pub options: EffectiveOptions,
    pub local_addr: SocketAddr,
    #[serde(rename = "serverURL")]
    pub server_url: String,
    pub local_base_url: String,
    pub database_name: String,
}

/// A running application server bound to its own database.
///
/// Only a fully successful [`Fixture::start`] produces a value, so holding a
/// `Fixture` means every handle is live. [`Fixture::stop`] consumes it.
pub struct Fixture {
    options: EffectiveOptions,
    runtime: Box<dyn DatabaseRuntime>,
    storage: Storage,
    server: ParseServer,
    router: Router,
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    serve_task: JoinHandle<std::io::Result<()>>,
}

impl Fixture {
    /// Starts with the runtime matching the resolved database uri: nothing
    /// to launch for `sqlite:`, a local `mongod` otherwise.
    pub async fn start(options: FixtureOptions, env: &EnvSnapshot) -> Result<Self, FixtureError> {
        let options = resolve_options(&options, env);
        let runtime = default_runtime(&options, env);
        Self::launch(options, runtime).await
    }

    pub async fn start_with_runtime(
        options: FixtureOptions,
        env: &EnvSnapshot,
        runtime: Box<dyn DatabaseRuntime>,
    ) -> Result<Self, FixtureError> {
        Self::launch(resolve_options(&options, env), runtime).await
    }

    async fn launch(
        options: EffectiveOptions,
        mut runtime: Box<dyn DatabaseRuntime>,
    ) -> Result<Self, FixtureError> {
        let uri = redact_uri(&options.database_uri);
        let mount_path =
            parse_server::check_mount_path(&options.mount_path).map_err(FixtureError::MountPath)?;

        debug!(runtime = runtime.name(), "starting database runtime");
        runtime.start().await.map_err(FixtureError::DatabaseStart)?;

        let storage = match Storage::connect(&options.database_uri, &options.database_name).await
        {
            Ok(storage) => storage,
            Err(source) => {
                rollback(runtime.as_mut(), None).await;
                return Err(FixtureError::DatabaseConnect { uri, source });
            }
        };

        let server = ParseServer::new(options.server_config(), storage.clone());
        let router = match parse_server::mount(Router::new(), &mount_path, &server) {
            Ok(router) => router,
            Err(error) => {
                rollback(runtime.as_mut(), Some(&storage)).await;
                return Err(FixtureError::MountPath(error));
            }
        };

        let bound = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, options.port)).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(error) => Err(error),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                rollback(runtime.as_mut(), Some(&storage)).await;
                return Err(FixtureError::ListenerBind {
                    port: options.port,
                    source,
                });
            }
        };

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = router.clone();
        let serve_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        if !options.silent {
            info!(
                %local_addr,
                server_url = %options.server_url,
                database = %uri,
                "fixture started"
            );
        }

        Ok(Self {
            options,
            runtime,
            storage,
            server,
            router,
            local_addr,
            shutdown,
            serve_task,
        })
    }

    /// Closes the listener, then the connection, then the database runtime.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned.
    pub async fn stop(self) -> Result<(), FixtureError> {
        let Self {
            options,
            mut runtime,
            storage,
            shutdown,
            serve_task,
            local_addr,
            ..
        } = self;

        let _ = shutdown.send(());
        let closed = match serve_task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(FixtureError::ListenerClose(error)),
            // The runtime that spawned the listener shut down and took it along.
            Err(error) if error.is_cancelled() => {
                debug!(%local_addr, "serve task was already cancelled");
                Ok(())
            }
            Err(error) => Err(FixtureError::ServeTask(error)),
        };
        debug!(%local_addr, "listener closed");

        storage.close().await;
        let stopped = runtime.stop().await.map_err(FixtureError::DatabaseStop);

        if !options.silent {
            info!(%local_addr, "fixture stopped");
        }
        closed.and(stopped)
    }

    /// Drops all data in the fixture database; listener and server stay up.
    pub async fn reset_data(&self) -> Result<(), FixtureError> {
        self.storage
            .drop_database()
            .await
            .map_err(FixtureError::ResetData)
    }

    /// False once the serve task has ended, e.g. because the runtime that
    /// started the fixture was shut down.
    pub fn is_serving(&self) -> bool {
        !self.serve_task.is_finished()
    }

    pub fn options(&self) -> &EffectiveOptions {
        &self.options
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Advertised base url, as configured.
    pub fn server_url(&self) -> &str {
        &self.options.server_url
    }

    /// Base url reachable from this process, using the port actually bound.
    pub fn local_base_url(&self) -> String {
        let path = if self.options.mount_path == "/" {
            ""
        } else {
            self.options.mount_path.as_str()
        };
        format!("http://127.0.0.1:{}{path}", self.local_addr.port())
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn server(&self) -> &ParseServer {
        &self.server
    }

    /// The mounted application, usable without going through the listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn snapshot(&self) -> FixtureSnapshot {
        FixtureSnapshot {
            options: self.options.clone(),
            local_addr: self.local_addr,
            server_url: self.options.server_url.clone(),
            local_base_url: self.local_base_url(),
            database_name: self.storage.database_name().to_string(),
        }
    }
}

fn default_runtime(options: &EffectiveOptions, env: &EnvSnapshot) -> Box<dyn DatabaseRuntime> {
    if options.uses_embedded_database() {
        Box::new(InProcessRuntime::new())
    } else {
        Box::new(MongodRunner::new(MongodConfig::with_port(env.mongodb_port())))
    }
}

async fn rollback(runtime: &mut dyn DatabaseRuntime, storage: Option<&Storage>) {
    if let Some(storage) = storage {
        storage.close().await;
    }
    let name = runtime.name();
    if let Err(error) = runtime.stop().await {
        warn!(%error, runtime = name, "failed to stop database runtime during rollback");
    }
}
