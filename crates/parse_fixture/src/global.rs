use std::{future::Future, io, sync::OnceLock};

use storage::Storage;
use tokio::runtime::{Builder, Runtime};

use crate::{EnvSnapshot, FixtureController, FixtureError, FixtureOptions, FixtureSnapshot};

static CONTROLLER: OnceLock<FixtureController> = OnceLock::new();
static RUNTIME: OnceLock<io::Result<Runtime>> = OnceLock::new();

fn controller() -> &'static FixtureController {
    CONTROLLER.get_or_init(FixtureController::new)
}

/// Runs `operation` on a runtime owned by the process-wide fixture.
///
/// Each `#[tokio::test]` drops its runtime on return, so a listener spawned
/// on the caller's runtime would die with the test that started it.
async fn on_fixture_runtime<F, T>(operation: F) -> Result<T, FixtureError>
where
    F: Future<Output = Result<T, FixtureError>> + Send + 'static,
    T: Send + 'static,
{
    let runtime = RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("parse-fixture")
                .enable_all()
                .build()
        })
        .as_ref()
        .map_err(|error| {
            FixtureError::FixtureRuntime(io::Error::new(error.kind(), error.to_string()))
        })?;
    runtime
        .spawn(operation)
        .await
        .map_err(FixtureError::FixtureTask)?
}

/// Starts the process-wide fixture, reading `MONGODB_PORT` and `VERBOSE`
/// from the environment.
pub async fn start_parse_server(options: FixtureOptions) -> Result<FixtureSnapshot, FixtureError> {
    let env = EnvSnapshot::from_process();
    on_fixture_runtime(async move { controller().start(options, &env).await }).await
}

pub async fn stop_parse_server() -> Result<(), FixtureError> {
    on_fixture_runtime(async { controller().stop().await }).await
}

pub async fn drop_db() -> Result<(), FixtureError> {
    on_fixture_runtime(async { controller().reset_data().await }).await
}

pub async fn parse_server_state() -> Option<FixtureSnapshot> {
    on_fixture_runtime(async { Ok(controller().snapshot().await) })
        .await
        .ok()
        .flatten()
}

pub async fn parse_server_storage() -> Option<Storage> {
    on_fixture_runtime(async { Ok(controller().storage().await) })
        .await
        .ok()
        .flatten()
}
