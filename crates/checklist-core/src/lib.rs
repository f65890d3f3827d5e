pub mod cli;
pub mod commands;
pub mod config;
pub mod controller;
pub mod datetime;
pub mod model;
pub mod render;
pub mod state;
pub mod stats;
pub mod storage;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use crate::cli::Action;
use crate::datetime::{Clock, SystemClock};
use crate::storage::CorruptPolicy;

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args)?;
    let cli = cli::GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting checklist CLI"
    );
    debug!(?pre.rc_overrides, "preprocessed rc overrides");

    let mut cfg = config::Config::load(cli.checklistrc.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;

    let store = storage::FileStore::open(&data_dir)
        .with_context(|| format!("failed to open store at {}", data_dir.display()))?;

    let action = match cli.action {
        Some(action) => action,
        None => commands::default_action(&cfg)?,
    };

    // A confirmed reset must work even when the stored slots no longer parse.
    let policy = if matches!(action, Action::Reset { yes: true }) {
        CorruptPolicy::Reset
    } else {
        cfg.corrupt_policy()?
    };

    let clock = SystemClock;
    let mut ctl = controller::Controller::open(store, policy, clock.today(), cfg.windows()?)?;
    let mut renderer = render::Renderer::new(&cfg)?;

    commands::dispatch(&mut ctl, &cfg, &mut renderer, &clock, action)?;

    info!("done");
    Ok(())
}
