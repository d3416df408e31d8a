pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod dates;
pub mod guard;
pub mod machines;
pub mod render;
pub mod repository;
pub mod schedule;
pub mod status;
pub mod store;
pub mod task;
pub mod views;

use std::ffi::OsString;
use std::io;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use crate::dates::SystemClock;

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let cli = cli::GlobalCli::parse_from(raw_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting millwright CLI"
    );

    let mut cfg = config::Config::load(cli.config.as_deref())?;
    cfg.apply_overrides(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value)));
    debug!(files = ?cfg.loaded_files, "configuration loaded");

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;

    let store = datastore::JsonlStore::open(&data_dir)
        .with_context(|| format!("failed to open datastore at {}", data_dir.display()))?;

    let clock = match cfg.timezone()? {
        Some(zone) => SystemClock::in_zone(zone),
        None => SystemClock::local(),
    };
    let policy = guard::CompletionPolicy::from_config(&cfg)?;
    let machines = machines::MachineCatalog::load(&store)
        .context("failed to load machine catalog")?;
    let renderer = render::Renderer::new(&cfg)?;

    let mut repo = repository::TaskRepository::new(&store, clock, policy);
    let mut stdout = io::stdout().lock();
    commands::dispatch(
        &mut repo,
        &machines,
        &renderer,
        cli.command,
        &mut stdout,
        &mut commands::terminal_prompt,
    )?;

    info!("done");
    Ok(())
}
