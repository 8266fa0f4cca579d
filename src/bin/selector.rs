use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, Registry, TextEncoder};
use resource_selector::{
    capacity::CapacitySource,
    config::Config,
    in_memory_store::InMemoryJobStore,
    instrumented_selector::InstrumentedSelector,
    metrics::{MeasurementSink, PrometheusMeasurementSink, TracingMeasurementSink},
    resource::{Cluster, PlacementRequest},
    selector::ResourceSelector,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Select a cluster for a job and print the result as JSON.
    Select {
        /// Path to the selector config file.
        #[arg(short, long)]
        config: PathBuf,
        /// Path to the placement request (job request and candidate clusters).
        #[arg(short, long)]
        input: PathBuf,
        /// Path to a list of job records used for capacity accounting.
        #[arg(short, long)]
        jobs: Option<PathBuf>,
        /// Print the selection metrics in Prometheus text format. Without it the timing is only logged.
        #[arg(long)]
        dump_metrics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Select {
            config,
            input,
            jobs,
            dump_metrics,
        } => {
            let config = Config::from_file(&config)
                .await
                .with_context(|| format!("reading config {config:?}"))?;
            let request = PlacementRequest::from_file(&input)
                .await
                .with_context(|| format!("reading placement request {input:?}"))?;

            let store = match jobs {
                None => InMemoryJobStore::new(),
                Some(path) => InMemoryJobStore::from_file(&path)
                    .await
                    .with_context(|| format!("reading job records {path:?}"))?,
            };
            let capacity: Arc<dyn CapacitySource> = Arc::new(store);

            let registry = Registry::new();
            let sink: Arc<dyn MeasurementSink> = if dump_metrics {
                Arc::new(PrometheusMeasurementSink::new(registry.clone()))
            } else {
                Arc::new(TracingMeasurementSink)
            };

            let selector = InstrumentedSelector::with_metric_name(
                config.build_selector::<Cluster>(capacity)?,
                sink,
                config.metrics.timer_name.clone(),
            );

            let job_id = request
                .job_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            info!(%job_id, candidates = request.candidates.len(), "selecting cluster");

            let result = selector
                .select(request.candidates.as_slice(), &request.job_request, &job_id)
                .await;

            if dump_metrics {
                let mut buffer = Vec::new();
                TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
                eprintln!("{}", String::from_utf8_lossy(&buffer));
            }

            let result = result.with_context(|| format!("selecting cluster for job {job_id}"))?;

            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
