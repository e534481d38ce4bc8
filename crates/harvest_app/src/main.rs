mod cli;
mod logging;
mod settings;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command, RunArgs};
use harvest_engine::{EngineConfig, Pipeline};
use harvest_logging::{harvest_error, harvest_info, harvest_warn};
use log::LevelFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match settings::build_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::from(2);
        }
    };
    let level = harvest_logging::parse_level(&config.log_level).unwrap_or(LevelFilter::Info);
    logging::initialize(level, &config.paths.logs_dir());

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            harvest_error!("Could not start the async runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(cli.action(), config)) {
        Ok(code) => code,
        Err(err) => {
            harvest_error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: EngineConfig) -> anyhow::Result<ExitCode> {
    let mut pipeline = Pipeline::from_config(config).context("setting up the pipeline")?;

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            harvest_warn!("Interrupted; finishing in-flight work and saving progress");
            cancel.cancel();
        }
    });

    match command {
        Command::Run(RunArgs {
            full,
            collection: Some(name),
        }) => {
            let outcome = pipeline.process_collection(&name, !full).await;
            pipeline.flush_all().context("saving progress")?;
            let result = outcome.with_context(|| format!("processing collection {name}"))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Run(RunArgs {
            full,
            collection: None,
        }) => {
            let report = pipeline.process_all_collections(!full).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.summary.failed_collections > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::RebuildCache => {
            let rebuilt = pipeline.rebuild_cache()?;
            harvest_info!("Resume cache rebuilt with {} URLs", rebuilt);
        }
        Command::Prune { days } => {
            let pruned = pipeline.prune_cache(chrono::Duration::days(i64::from(days)))?;
            harvest_info!("Pruned {} cache entries older than {} days", pruned, days);
        }
        Command::HealthCheck { url } => {
            let healthy = pipeline.health_check(&url).await;
            println!("{}", if healthy { "healthy" } else { "unreachable" });
            if !healthy {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Export { collection, status } => {
            let urls = pipeline
                .store_mut()
                .export_urls(&collection, status.as_deref())
                .with_context(|| format!("exporting {collection}"))?;
            for url in urls {
                println!("{url}");
            }
        }
        Command::Report => {
            println!("{}", serde_json::to_string_pretty(&pipeline.cache().report())?);
        }
        Command::Stats => {
            let overview = pipeline.store_mut().overview()?;
            println!("{}", serde_json::to_string_pretty(&overview)?);
        }
        Command::Merge { target, sources } => {
            let changed = pipeline
                .store_mut()
                .merge(&target, &sources)
                .with_context(|| format!("merging into {target}"))?;
            harvest_info!(
                "Merged {} collections into {}: {} records changed",
                sources.len(),
                target,
                changed
            );
        }
        Command::CheckIntegrity => {
            let reports = pipeline.store_mut().check_integrity()?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            let damaged = reports.iter().filter(|r| r.issues() > 0).count();
            if damaged > 0 {
                harvest_warn!("{} of {} collections need fixing", damaged, reports.len());
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Fix { collection, backup } => {
            let report = pipeline
                .store_mut()
                .repair(&collection, backup)
                .with_context(|| format!("fixing {collection}"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::CleanupBackups { keep } => {
            let removed = pipeline.store().prune_backups(keep)?;
            harvest_info!("Removed {} old backups, kept the newest {}", removed, keep);
        }
    }
    Ok(ExitCode::SUCCESS)
}
