use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};

use forecast_monitor::config::Config;
use forecast_monitor::feed::{build_quote_source, spawn_ingestion_worker, IngestionSettings};
use forecast_monitor::history::SharedHistory;
use forecast_monitor::model::observation::Observation;
use forecast_monitor::pipeline::SymbolPipeline;
use forecast_monitor::tracker::AlertAccuracyTracker;
use forecast_monitor::tuner::{JsonFileTunerStore, TunerConfigStore};

const OBSERVATION_CHANNEL_CAPACITY: usize = 64;

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn init_tracing(config: &Config) -> Result<()> {
    let log_file = std::fs::File::create(&config.logging.file)
        .with_context(|| format!("failed to create log file {}", config.logging.file))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config.logging.level.as_str())
            }),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .json()
        .init();
    Ok(())
}

async fn run_pipeline(
    mut pipeline: SymbolPipeline,
    mut observed_rx: mpsc::Receiver<Observation>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            obs = observed_rx.recv() => {
                let Some(obs) = obs else { break };
                match pipeline.on_observation(now_ms()) {
                    Ok(step) => {
                        if let Some(f) = &step.forecast {
                            tracing::info!(
                                symbol = %pipeline.symbol(),
                                price = obs.price,
                                predicted = f.predicted_price,
                                lower = f.lower_bound,
                                upper = f.upper_bound,
                                trend = ?f.trend,
                                confidence = ?f.confidence,
                                model = %f.model_label,
                                "Forecast issued"
                            );
                        }
                        if !step.validated_predictions.is_empty() {
                            let metrics = pipeline.prediction_metrics();
                            tracing::info!(
                                symbol = %pipeline.symbol(),
                                validated = step.validated_predictions.len(),
                                total_validated = metrics.validated_predictions,
                                effectiveness = ?metrics.effectiveness_index(),
                                summary = %metrics.summary_label,
                                "Predictions validated"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(symbol = %pipeline.symbol(), error = %e, "Pipeline step failed");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::info!(symbol = %pipeline.symbol(), "Pipeline stopped");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set FORECAST_MONITOR_CONFIG or create config/default.toml");
            std::process::exit(1);
        }
    };

    init_tracing(&config)?;

    let symbols = config.feed.monitored_symbols();
    tracing::info!(
        symbols = ?symbols,
        provider = ?config.feed.provider,
        rest_url = %config.feed.base_url(),
        model = ?config.forecast.model,
        horizon_minutes = config.forecast.horizon_minutes,
        "Starting forecast-monitor"
    );

    let source = build_quote_source(&config.feed).context("failed to build quote source")?;
    let store: Arc<dyn TunerConfigStore> = Arc::new(JsonFileTunerStore::new(&config.tuner.state_dir));
    let alerts = Arc::new(Mutex::new(AlertAccuracyTracker::new(
        config.alerts.clone(),
        config.tracker.tolerance_ms(),
        config.tracker.retention_ms(),
    )));
    let settings = IngestionSettings::from_feed_config(&config.feed)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = Vec::with_capacity(symbols.len());
    let mut pipelines = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        let history = SharedHistory::new(symbol, config.feed.history_capacity);
        let pipeline = SymbolPipeline::new(
            symbol,
            &config,
            history.clone(),
            alerts.clone(),
            store.clone(),
        );
        let (observed_tx, observed_rx) = mpsc::channel(OBSERVATION_CHANNEL_CAPACITY);
        let worker = spawn_ingestion_worker(
            source.clone(),
            &history,
            settings.clone(),
            Some(observed_tx),
            shutdown_rx.clone(),
        )
        .with_context(|| format!("failed to start ingestion for {}", symbol))?;
        workers.push(worker);
        pipelines.push(tokio::spawn(run_pipeline(
            pipeline,
            observed_rx,
            shutdown_rx.clone(),
        )));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Ctrl+C received");
    let _ = shutdown_tx.send(true);

    for worker in workers {
        match worker.await {
            Ok(stats) => tracing::debug!(?stats, "Ingestion worker joined"),
            Err(e) => tracing::warn!(error = %e, "Ingestion worker panicked"),
        }
    }
    for pipeline in pipelines {
        if let Err(e) = pipeline.await {
            tracing::warn!(error = %e, "Pipeline task panicked");
        }
    }

    if let Ok(tracker) = alerts.lock() {
        let metrics = tracker.metrics();
        tracing::info!(
            total_alerts = metrics.total_alerts,
            validated = metrics.validated,
            accuracy = ?metrics.accuracy,
            "Final alert accuracy"
        );
    }
    Ok(())
}
