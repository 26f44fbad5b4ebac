use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use parse_fixture::{
    resolve_options, EnvSnapshot, Fixture, FixtureOptions, MongodConfig, MongodRunner,
};
use tracing::info;

/// Runs a Parse-style backend fixture until interrupted.
#[derive(Parser, Debug)]
struct Cli {
    /// TOML file with fixture options (camelCase keys, e.g. `appId`).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    mount_path: Option<String>,
    #[arg(long)]
    app_id: Option<String>,
    #[arg(long)]
    master_key: Option<String>,
    #[arg(long)]
    javascript_key: Option<String>,
    #[arg(long)]
    database_name: Option<String>,
    #[arg(long)]
    database_uri: Option<String>,
    #[arg(long)]
    server_url: Option<String>,
    /// `mongod` executable used when the database uri is not `sqlite:`.
    #[arg(long)]
    mongod_bin: Option<PathBuf>,
}

impl Cli {
    fn options(&self) -> Result<FixtureOptions> {
        let file = match &self.config {
            Some(path) => FixtureOptions::from_toml_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => FixtureOptions::default(),
        };
        let flags = FixtureOptions {
            database_name: self.database_name.clone(),
            database_uri: self.database_uri.clone(),
            master_key: self.master_key.clone(),
            javascript_key: self.javascript_key.clone(),
            app_id: self.app_id.clone(),
            port: self.port,
            mount_path: self.mount_path.clone(),
            server_url: self.server_url.clone(),
            ..FixtureOptions::default()
        };
        Ok(file.merge(flags))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env = EnvSnapshot::from_process();
    let filter = if env.verbose() { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    let options = cli.options()?;
    let fixture = match &cli.mongod_bin {
        Some(binary) if !resolve_options(&options, &env).uses_embedded_database() => {
            let runtime = MongodRunner::new(MongodConfig {
                binary: binary.clone(),
                ..MongodConfig::with_port(env.mongodb_port())
            });
            Fixture::start_with_runtime(options, &env, Box::new(runtime)).await?
        }
        _ => Fixture::start(options, &env).await?,
    };

    println!("{}", fixture.server_url());
    info!(local = %fixture.local_base_url(), "fixture running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    fixture.stop().await?;
    Ok(())
}
