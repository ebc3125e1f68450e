/// Telemetry events sent from load workers to the coordinator for progress tracking
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Worker started processing an object
    ObjectStarted,
    /// Batch of documents was inserted
    BatchInserted { documents: u64, duration_ms: u64 },
    /// Batch of documents could not be inserted after retries
    BatchFailed { documents: u64 },
    /// Worker finished an object
    ObjectCompleted,
    /// Object held none of the target genes
    ObjectSkipped,
    /// Object could not be read or parsed
    ObjectFailed,
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub objects_started: usize,
    pub objects_completed: usize,
    pub objects_skipped: usize,
    pub objects_failed: usize,
    pub documents_inserted: u64,
    pub documents_failed: u64,
    pub batch_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::ObjectStarted => {
                self.objects_started += 1;
            }
            TelemetryEvent::BatchInserted {
                documents,
                duration_ms,
            } => {
                self.documents_inserted += documents;
                self.batch_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::BatchFailed { documents } => {
                self.documents_failed += documents;
            }
            TelemetryEvent::ObjectCompleted => {
                self.objects_completed += 1;
            }
            TelemetryEvent::ObjectSkipped => {
                self.objects_skipped += 1;
            }
            TelemetryEvent::ObjectFailed => {
                self.objects_failed += 1;
            }
        }
    }

    /// Objects that reached a terminal state
    pub fn objects_finished(&self) -> usize {
        self.objects_completed + self.objects_skipped + self.objects_failed
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
