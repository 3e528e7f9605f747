pub mod advisory;
pub mod board;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod reconcile;
pub mod render;
pub mod repository;
pub mod store;
pub mod todo;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let (cleaned, rc_overrides) =
    cli::split_rc_overrides(&raw_args);
  let cli =
    cli::GlobalCli::parse_from(cleaned);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting keeper CLI"
  );
  debug!(?rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.keeperrc.as_deref()
  )?;
  cfg.apply_overrides(
    rc_overrides
      .into_iter()
      .chain(
        cli
          .rc_overrides
          .into_iter()
          .map(|kv| (kv.key, kv.value))
      )
      .chain(cli.owner.map(|owner| {
        ("owner".to_string(), owner)
      }))
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    store::FileStore::open(&data_dir)
      .with_context(|| {
        format!(
          "failed to open store at {}",
          data_dir.display()
        )
      })?;

  let renderer =
    render::Renderer::new(&cfg)?;
  let command =
    cli.command.unwrap_or_else(|| {
      cli::Command::List(
        cli::ListArgs::default()
      )
    });

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .build()
      .context(
        "failed to start async runtime"
      )?;
  runtime.block_on(commands::dispatch(
    store, &cfg, &renderer, command
  ))?;

  info!("done");
  Ok(())
}
