use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::worker::{ReplacedCohorts, WorkQueue, Worker};
use crate::db::DocumentStore;
use crate::io::ObjectStore;
use crate::telemetry::{ProgressStats, TelemetryEvent};

/// Configuration for a load run
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub worker_count: usize,
    pub batch_size: usize,
    /// Only object keys ending with this are loaded
    pub suffix: String,
    /// Target genes, in output order
    pub genes: Vec<String>,
    /// Delete a cohort's documents before inserting it again
    pub replace_existing: bool,
    pub quiet: bool,
}

/// Result of a completed load run
#[derive(Debug)]
pub struct LoadResult {
    pub job_id: String,
    pub objects_processed: usize,
    pub objects_skipped: usize,
    pub objects_failed: usize,
    pub documents_inserted: u64,
    pub documents_failed: u64,
    pub duration: Duration,
}

/// The LoadCoordinator fans object keys out to a pool of workers and folds
/// their telemetry into a single result.
pub struct LoadCoordinator {
    store: Arc<dyn ObjectStore>,
    documents: DocumentStore,
}

impl LoadCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, documents: DocumentStore) -> Self {
        Self { store, documents }
    }

    /// Run the complete load:
    /// 1. Make sure the documents table exists
    /// 2. List matching objects
    /// 3. Spawn workers over a shared key queue
    /// 4. Wait for completion and aggregate telemetry
    pub async fn run_load(&self, config: LoadConfig) -> Result<LoadResult> {
        let start_time = Instant::now();

        let job_id = Uuid::new_v4().to_string();
        info!("Starting load job: {}", job_id);

        self.documents.ensure_table().await?;

        let keys = self.matching_keys(&config.suffix).await?;
        info!(
            "Found {} objects ending with '{}' in bucket '{}'",
            keys.len(),
            config.suffix,
            self.store.bucket()
        );

        let total_objects = keys.len();
        let queue: WorkQueue = Arc::new(Mutex::new(keys.into_iter().collect::<VecDeque<_>>()));

        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        let worker_handles = self.spawn_worker_pool(&config, &queue, telemetry_tx.clone());

        // Drop the coordinator's copy of the sender so the channel closes when workers finish
        drop(telemetry_tx);

        let aggregator = Self::spawn_telemetry_aggregator(total_objects, config.quiet, telemetry_rx);

        let worker_results = futures::future::join_all(worker_handles).await;
        for (i, result) in worker_results.iter().enumerate() {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Worker {} failed: {:#}", i, e);
                }
                Err(e) => {
                    warn!("Worker {} panicked: {:#}", i, e);
                }
            }
        }

        let stats = aggregator
            .await
            .context("Telemetry aggregator stopped unexpectedly")?;
        let duration = start_time.elapsed();

        info!(
            "Load complete: {} objects loaded, {} skipped, {} failed, {} documents inserted, {} failed in {:.2}s",
            stats.objects_completed,
            stats.objects_skipped,
            stats.objects_failed,
            stats.documents_inserted,
            stats.documents_failed,
            duration.as_secs_f64()
        );

        Ok(LoadResult {
            job_id,
            objects_processed: stats.objects_completed,
            objects_skipped: stats.objects_skipped,
            objects_failed: stats.objects_failed,
            documents_inserted: stats.documents_inserted,
            documents_failed: stats.documents_failed,
            duration,
        })
    }

    /// Keys ending with `suffix`, sorted so runs are reproducible
    async fn matching_keys(&self, suffix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .list_objects()
            .await
            .with_context(|| format!("Failed to list bucket '{}'", self.store.bucket()))?
            .into_iter()
            .filter(|object| object.key.ends_with(suffix))
            .map(|object| {
                debug!("Matched {} ({} bytes)", object.key, object.size);
                object.key
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn spawn_worker_pool(
        &self,
        config: &LoadConfig,
        queue: &WorkQueue,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Vec<tokio::task::JoinHandle<Result<()>>> {
        let worker_count = config.worker_count.max(1);
        info!("Spawning {} workers...", worker_count);

        let genes = Arc::new(config.genes.clone());
        let replaced = config
            .replace_existing
            .then(ReplacedCohorts::default);
        let mut worker_handles = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let worker = Worker::new(
                Arc::clone(&self.store),
                self.documents.clone(),
                Arc::clone(&genes),
                config.batch_size,
                replaced.clone(),
                telemetry_tx.clone(),
            );
            let queue = Arc::clone(queue);

            worker_handles.push(tokio::spawn(async move { worker.run(queue).await }));
        }

        worker_handles
    }

    /// Fold telemetry into stats, drawing progress bars unless quiet
    fn spawn_telemetry_aggregator(
        total_objects: usize,
        quiet: bool,
        mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
    ) -> tokio::task::JoinHandle<ProgressStats> {
        let bars = (!quiet).then(|| ProgressBars::new(total_objects as u64));

        tokio::spawn(async move {
            let mut stats = ProgressStats::new();

            while let Some(event) = telemetry_rx.recv().await {
                stats.update(&event);
                if let Some(bars) = &bars {
                    bars.update(&stats);
                }
            }

            if let Some(bars) = bars {
                bars.finish(&stats);
            }
            stats
        })
    }
}

struct ProgressBars {
    _multi: MultiProgress,
    objects: ProgressBar,
    documents: ProgressBar,
    batch_time: ProgressBar,
}

impl ProgressBars {
    fn new(total_objects: u64) -> Self {
        let multi = MultiProgress::new();

        let objects = multi.add(ProgressBar::new(total_objects));
        objects.set_style(
            ProgressStyle::default_bar()
                .template(
                    "[{elapsed_precise}] Objects:    [{bar:30.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
                )
                .unwrap()
                .progress_chars("=>-"),
        );

        let documents = multi.add(ProgressBar::new(0));
        documents.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] Documents:  {human_pos} inserted | {per_sec}")
                .unwrap(),
        );

        let batch_time = multi.add(ProgressBar::new(0));
        batch_time.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] Batch Time: {msg}")
                .unwrap(),
        );

        Self {
            _multi: multi,
            objects,
            documents,
            batch_time,
        }
    }

    fn update(&self, stats: &ProgressStats) {
        self.objects.set_position(stats.objects_finished() as u64);
        let in_flight = stats.objects_started.saturating_sub(stats.objects_finished());
        self.objects.set_message(format!("{} in flight", in_flight));
        self.documents.set_position(stats.documents_inserted);

        if let (Some(p50), Some(p90), Some(p99)) = stats.get_percentiles() {
            self.batch_time
                .set_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
        }
    }

    fn finish(self, stats: &ProgressStats) {
        self.objects.finish_with_message("All objects processed");
        self.documents.finish();

        if let (Some(p50), Some(p90), Some(p99)) = stats.get_percentiles() {
            self.batch_time
                .finish_with_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
        } else {
            self.batch_time.finish();
        }
    }
}
