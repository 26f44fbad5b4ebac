use db_runtime::DatabaseRuntime;
use storage::Storage;
use tokio::sync::Mutex;
use tracing::warn;

use crate::{EnvSnapshot, Fixture, FixtureError, FixtureOptions, FixtureSnapshot};

/// Holds at most one running [`Fixture`].
///
/// Each operation holds the lock until it completes, so concurrent callers
/// are serialized and a second `start` sees [`FixtureError::AlreadyRunning`]
/// instead of replacing the live fixture. A fixture whose listener has ended
/// with the runtime that started it is torn down and forgotten the next time
/// the controller is consulted.
#[derive(Default)]
pub struct FixtureController {
    current: Mutex<Option<Fixture>>,
}

impl FixtureController {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(
        &self,
        options: FixtureOptions,
        env: &EnvSnapshot,
    ) -> Result<FixtureSnapshot, FixtureError> {
        let mut current = self.current.lock().await;
        reap_finished(&mut current).await;
        if current.is_some() {
            return Err(FixtureError::AlreadyRunning);
        }
        let fixture = Fixture::start(options, env).await?;
        let snapshot = fixture.snapshot();
        *current = Some(fixture);
        Ok(snapshot)
    }

    pub async fn start_with_runtime(
        &self,
        options: FixtureOptions,
        env: &EnvSnapshot,
        runtime: Box<dyn DatabaseRuntime>,
    ) -> Result<FixtureSnapshot, FixtureError> {
        let mut current = self.current.lock().await;
        reap_finished(&mut current).await;
        if current.is_some() {
            return Err(FixtureError::AlreadyRunning);
        }
        let fixture = Fixture::start_with_runtime(options, env, runtime).await?;
        let snapshot = fixture.snapshot();
        *current = Some(fixture);
        Ok(snapshot)
    }

    /// The fixture is forgotten even when stopping it fails.
    pub async fn stop(&self) -> Result<(), FixtureError> {
        let mut current = self.current.lock().await;
        let fixture = current.take().ok_or(FixtureError::NotRunning)?;
        fixture.stop().await
    }

    pub async fn reset_data(&self) -> Result<(), FixtureError> {
        let mut current = self.current.lock().await;
        reap_finished(&mut current).await;
        let fixture = current.as_ref().ok_or(FixtureError::NotRunning)?;
        fixture.reset_data().await
    }

    pub async fn snapshot(&self) -> Option<FixtureSnapshot> {
        let mut current = self.current.lock().await;
        reap_finished(&mut current).await;
        current.as_ref().map(Fixture::snapshot)
    }

    pub async fn storage(&self) -> Option<Storage> {
        let mut current = self.current.lock().await;
        reap_finished(&mut current).await;
        current.as_ref().map(|fixture| fixture.storage().clone())
    }

    pub async fn is_running(&self) -> bool {
        let mut current = self.current.lock().await;
        reap_finished(&mut current).await;
        current.is_some()
    }
}

async fn reap_finished(current: &mut Option<Fixture>) {
    if current.as_ref().is_some_and(Fixture::is_serving) {
        return;
    }
    let Some(fixture) = current.take() else {
        return;
    };
    warn!(local_addr = %fixture.local_addr(), "http listener is gone; discarding fixture");
    if let Err(error) = fixture.stop().await {
        warn!(%error, "failed to tear down fixture without a listener");
    }
}
