use crate::dataset::{resolve_position, Dataset};
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use mortality_core::{
    BaselineMethod, BaselineParams, CacheStats, MetricFields, MortalityPipeline, PipelineConfig,
    RunReport, TimelineInfo,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mortality-cli")]
#[command(about = "Mortality baseline and excess pipeline")]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute baselines and excess for one metric of a dataset
    Run(RunArgs),
    /// Start the mock regression service
    MockServer {
        #[arg(short, long, default_value = "5000")]
        port: u16,
        /// Fraction of requests answered with a 500
        #[arg(short, long, default_value = "0.0")]
        error_rate: f64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Dataset JSON
    #[arg(short, long)]
    pub input: PathBuf,
    /// Observed metric field, e.g. `deaths` or `cmr`
    #[arg(short, long)]
    pub metric: String,
    /// First baseline period (label or 0-based index)
    #[arg(long)]
    pub window_start: String,
    /// Last baseline period, inclusive (label or 0-based index)
    #[arg(long)]
    pub window_end: String,
    #[arg(long, default_value = "lin_reg")]
    pub method: String,
    /// Treat the metric as a cumulative series
    #[arg(long)]
    pub cumulative: bool,
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Regression service URL, overrides the configuration
    #[arg(long)]
    pub endpoint: Option<String>,
    /// Maximum concurrent estimations, overrides the configuration
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Chart payload destination; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Printed to stderr after a run
#[derive(Serialize)]
struct RunSummary<'a> {
    report: &'a RunReport,
    timeline: &'a TimelineInfo,
    caches: Vec<CacheStats>,
}

pub async fn run_command(args: RunArgs) -> Result<()> {
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(endpoint) = args.endpoint {
        config.service.endpoint = endpoint;
    }
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            bail!("--concurrency must be at least 1");
        }
        config.orchestrator.max_concurrency = concurrency;
    }

    let method: BaselineMethod = args.method.parse()?;
    let dataset = Dataset::load(&args.input).await?;
    info!(
        "Loaded {} entries over {} {} periods from {}",
        dataset.entries.len(),
        dataset.labels.len(),
        dataset.granularity,
        args.input.display()
    );

    let pipeline = MortalityPipeline::new(config)?;
    let mut entries = pipeline.align(dataset.granularity, dataset.labels, &dataset.entries);

    let timeline = pipeline.timeline_info(&entries);
    if !timeline.invalid_labels.is_empty() {
        warn!(
            "{} timeline labels do not match the {} format; alignment hints are omitted for them",
            timeline.invalid_labels.len(),
            timeline.granularity
        );
    }

    let window_start = resolve_position(&entries.timeline, &args.window_start)?;
    let window_end = resolve_position(&entries.timeline, &args.window_end)?;
    if window_start > window_end {
        bail!(
            "Window start '{}' comes after window end '{}'",
            args.window_start,
            args.window_end
        );
    }

    let params = BaselineParams {
        window_start,
        window_end,
        method,
        granularity: entries.granularity,
        cumulative: args.cumulative,
    };
    let fields = MetricFields::for_metric(&args.metric);

    let report = pipeline
        .compute_baselines_with_progress(&mut entries, &fields, &params, |done, total| {
            let step = (total / 10).max(1);
            if done % step == 0 || done == total {
                info!("Progress: {}/{}", done, total);
            }
        })
        .await;

    if report.degraded() {
        warn!(
            "{} of {} entries use the flat fallback baseline",
            report.fallback, report.total
        );
    }

    let payload = pipeline.chart_payload(&entries, &fields);
    let json = serde_json::to_string_pretty(&*payload)?;
    match args.output {
        Some(path) => {
            tokio::fs::write(&path, json).await?;
            info!("Chart payload written to {}", path.display());
        }
        None => println!("{}", json),
    }

    let summary = RunSummary {
        report: &report,
        timeline: &timeline,
        caches: pipeline.cache_stats(),
    };
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
