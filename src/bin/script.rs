use anyhow::Context;
use dotenv::dotenv;
use futures::stream::{self, StreamExt};
use std::{env, fs::File, io::Write, path::PathBuf, time::Instant};
use tokio::task;
use topo_evolve::evolution::population::{EvolutionConfig, ScheduleEntry};
use topo_evolve::evolution::topology::TopologyFamily;
use topo_evolve::experiment::{run_synthetic, ExperimentRequest};
use topo_evolve::sampling::SyntheticTaskConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Runs every topology family over the same shrinking schedule and dumps
// one JSON report per family.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let out_dir = PathBuf::from(env::var("TOPO_EVOLVE_OUT").unwrap_or_else(|_| ".".to_string()));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;

    let seed = 42;
    let schedule = vec![
        ScheduleEntry::new(200, 140, 5),
        ScheduleEntry::new(200, 100, 4),
        ScheduleEntry::new(200, 60, 3),
    ];
    let task_config = SyntheticTaskConfig {
        features: 16,
        batch_size: 60,
        noise: 0.1,
        initial_spread: 10.0,
        seed: Some(seed),
    };

    info!("starting experiment");
    let start = Instant::now();

    stream::iter(TopologyFamily::ALL)
        .map(|family| {
            let mut config = EvolutionConfig::new(156, family);
            config.seed = Some(seed);
            config.schedule = Some(schedule.clone());
            // the three runs already share the machine
            config.max_concurrency = (num_cpus::get() / TopologyFamily::ALL.len()).max(1);
            let request = ExperimentRequest {
                config,
                task: task_config.clone(),
            };
            let out_dir = out_dir.clone();

            async move {
                info!(%family, "run launched");
                let report = task::spawn_blocking(move || run_synthetic(request))
                    .await
                    .context("evolution task panicked")??;

                let path = out_dir.join(format!("evolution_{}.json", family.name().to_lowercase()));
                let json = serde_json::to_string_pretty(&report)?;
                task::spawn_blocking(move || {
                    let mut f = File::create(&path)?;
                    f.write_all(json.as_bytes())?;
                    Ok::<_, std::io::Error>(())
                })
                .await??;

                anyhow::Ok((family, report))
            }
        })
        .buffer_unordered(TopologyFamily::ALL.len())
        .for_each(|res| async move {
            match res {
                Ok((family, report)) => info!(
                    %family,
                    final_mean_fitness = report.tracking.mean_fitness.last().copied(),
                    final_mean_lr = report.tracking.mean_hyperparameter.last().copied(),
                    retired = report.retired.len(),
                    "run finished"
                ),
                Err(e) => error!("experiment failed: {e:#}"),
            }
        })
        .await;

    info!(elapsed = ?start.elapsed(), "experiment done");
    Ok(())
}
