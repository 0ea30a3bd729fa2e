use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::FeedConfig;
use crate::feed::QuoteSource;
use crate::history::{HistoryWriter, SharedHistory};
use crate::model::observation::Observation;

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub poll_interval: Duration,
    /// Consecutive failures between escalated log lines.
    pub max_consecutive_errors: u32,
}

impl IngestionSettings {
    pub fn from_feed_config(cfg: &FeedConfig) -> Result<Self> {
        Ok(Self {
            poll_interval: Duration::from_millis(cfg.poll_interval_ms()?),
            max_consecutive_errors: cfg.max_consecutive_errors.max(1),
        })
    }
}

/// Counters returned when the worker stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub polls: u64,
    pub appended: u64,
    pub rejected: u64,
    /// Polls where the source had no sample (market closed).
    pub skipped: u64,
    pub errors: u64,
}

/// Claim the writer for `history` and poll `source` until `shutdown` flips.
///
/// Every accepted observation is forwarded on `observed_tx` when given. Fails
/// immediately if another writer already holds the history.
pub fn spawn_ingestion_worker(
    source: Arc<dyn QuoteSource>,
    history: &SharedHistory,
    settings: IngestionSettings,
    observed_tx: Option<mpsc::Sender<Observation>>,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<IngestionStats>> {
    let writer = history.claim_writer()?;
    Ok(tokio::spawn(async move {
        run_ingestion(source, writer, settings, observed_tx, shutdown).await
    }))
}

async fn run_ingestion(
    source: Arc<dyn QuoteSource>,
    writer: HistoryWriter,
    settings: IngestionSettings,
    observed_tx: Option<mpsc::Sender<Observation>>,
    mut shutdown: watch::Receiver<bool>,
) -> IngestionStats {
    let symbol = writer.symbol().to_string();
    let mut stats = IngestionStats::default();
    let mut consecutive_errors: u32 = 0;
    let mut ticker = tokio::time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        symbol = %symbol,
        source = source.name(),
        interval_ms = settings.poll_interval.as_millis() as u64,
        "Ingestion worker started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        stats.polls += 1;
        match source.fetch_quote(&symbol).await {
            Ok(None) => {
                stats.skipped += 1;
                tracing::debug!(symbol = %symbol, source = source.name(), "No quote available");
            }
            Ok(Some(obs)) => {
                if consecutive_errors > 0 {
                    tracing::info!(
                        symbol = %symbol,
                        failed_polls = consecutive_errors,
                        "Feed recovered"
                    );
                }
                consecutive_errors = 0;
                match writer.append(obs.clone()) {
                    Ok(true) => {
                        stats.appended += 1;
                        tracing::debug!(symbol = %symbol, price = obs.price, "Observation appended");
                        if let Some(tx) = &observed_tx {
                            if tx.try_send(obs).is_err() {
                                tracing::warn!(symbol = %symbol, "Observation channel full, dropping notification");
                            }
                        }
                    }
                    Ok(false) => {
                        stats.rejected += 1;
                        tracing::debug!(
                            symbol = %symbol,
                            timestamp_ms = obs.timestamp_ms,
                            "Observation rejected by history"
                        );
                    }
                    Err(e) => {
                        stats.errors += 1;
                        tracing::error!(symbol = %symbol, error = %e, "History append failed");
                    }
                }
            }
            Err(e) => {
                stats.errors += 1;
                consecutive_errors = consecutive_errors.saturating_add(1);
                if consecutive_errors % settings.max_consecutive_errors.max(1) == 0 {
                    tracing::error!(
                        symbol = %symbol,
                        consecutive_errors,
                        error = %e,
                        "Feed failing repeatedly"
                    );
                } else if consecutive_errors == 1 {
                    tracing::warn!(symbol = %symbol, error = %e, retryable = e.is_retryable(), "Quote fetch failed");
                } else {
                    tracing::debug!(symbol = %symbol, consecutive_errors, error = %e, "Quote fetch failed");
                }
            }
        }
    }

    tracing::info!(
        symbol = %symbol,
        polls = stats.polls,
        appended = stats.appended,
        skipped = stats.skipped,
        errors = stats.errors,
        "Ingestion worker stopped"
    );
    stats
}
