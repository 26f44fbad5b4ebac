//! Lifecycle helper that boots a Parse-style backend for a test run.
//!
//! ```no_run
//! use parse_fixture::{EnvSnapshot, Fixture, FixtureOptions};
//!
//! # async fn run() -> Result<(), parse_fixture::FixtureError> {
//! let fixture = Fixture::start(FixtureOptions::default(), &EnvSnapshot::from_process()).await?;
//! // exercise `fixture.server_url()` ...
//! fixture.reset_data().await?;
//! fixture.stop().await?;
//! # Ok(())
//! # }
//! ```

mod controller;
mod error;
mod fixture;
mod global;
pub mod options;

pub use controller::FixtureController;
pub use error::FixtureError;
pub use fixture::{Fixture, FixtureSnapshot};
pub use global::{
    drop_db, parse_server_state, parse_server_storage, start_parse_server, stop_parse_server,
};
pub use options::{resolve_options, EffectiveOptions, EnvSnapshot, FixtureOptions};

pub use db_runtime::{DatabaseRuntime, InProcessRuntime, MongodConfig, MongodRunner, RuntimeError};
pub use parse_server::MountPathError;
pub use storage::{Storage, StorageError};
