//! `warden replay`: run a scenario fixture end to end.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use warden_core::WardenConfig;
use warden_core::testing::{Scenario, ScenarioRunner, WatchdogPlan};

#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Scenario fixture (YAML)
    pub fixture: PathBuf,

    /// Run one watchdog sweep past the retry threshold if the fixture has no plan
    #[arg(long)]
    pub watchdog: bool,
}

pub async fn execute(config: WardenConfig, args: ReplayArgs) -> Result<()> {
    let mut scenario = Scenario::from_file(&args.fixture)
        .with_context(|| format!("failed to load scenario {}", args.fixture.display()))?;
    if args.watchdog && scenario.watchdog.is_none() {
        scenario.watchdog = Some(WatchdogPlan {
            advance_secs: config.watchdog.retry_threshold_secs + 1,
            sweeps: 1,
        });
    }

    let result = ScenarioRunner::new(config)
        .run(&scenario)
        .await
        .context("scenario replay failed")?;
    info!(
        scenario = %result.scenario,
        status = ?result.record.as_ref().map(|record| record.status),
        "Replay finished"
    );

    let json = serde_json::to_string_pretty(&result).context("failed to render result")?;
    println!("{json}");

    if result.expectation_met == Some(false) {
        bail!("scenario expectation not met");
    }
    Ok(())
}
