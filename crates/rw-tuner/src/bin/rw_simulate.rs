use rw_clock::{Clock, SimulatedTimeKeeper};
use rw_tuner::{CampaignConfig, SimulatedBackend, Tuner, TunerCheckpoint};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let campaign = CampaignConfig::from_env()?;
    let scheduler = campaign.scheduler.build(
        &campaign.tuner.metric,
        campaign.tuner.mode,
        campaign.tuner.seed,
    )?;

    let keeper = SimulatedTimeKeeper::new();
    let backend = SimulatedBackend::new(campaign.simulation.benchmark.clone(), keeper.clone())
        .with_overhead_charging(campaign.simulation.charge_overhead);
    let clock = Clock::simulated(keeper);

    let existing = campaign
        .tuner
        .checkpoint_path
        .as_ref()
        .filter(|path| path.exists());
    let mut tuner = match existing {
        Some(path) => {
            info!(path = %path.display(), "resuming from checkpoint");
            let checkpoint = TunerCheckpoint::load(path)?;
            Tuner::from_checkpoint(backend, scheduler, campaign.tuner.clone(), clock, checkpoint)?
        }
        None => Tuner::new(backend, scheduler, campaign.tuner.clone(), clock)?,
    };

    let outcome = tuner.run().await;
    println!("{}", tuner.summary());

    if let Some(path) = std::env::var_os("RUNGWAY_RESULTS").map(PathBuf::from) {
        let rows: Vec<_> = tuner.results().iter().map(|r| r.to_row()).collect();
        std::fs::write(&path, serde_json::to_vec_pretty(&rows)?)?;
        info!(path = %path.display(), rows = rows.len(), "results written");
    }

    if let Err(e) = &outcome {
        warn!(error = %e, fatal = e.is_fatal(), "campaign ended with an error");
    }
    outcome?;
    Ok(())
}
