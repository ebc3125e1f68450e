use anyhow::{Context, Result, anyhow};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{MAX_RETRIES, QUERY_TIMEOUT};
use crate::db::{DocumentStore, PatientDocument};
use crate::formats::ExpressionMatrix;
use crate::formats::compression::decode_text;
use crate::io::ObjectStore;
use crate::telemetry::TelemetryEvent;

/// Keys waiting to be loaded, shared by every worker of a job
pub type WorkQueue = Arc<Mutex<VecDeque<String>>>;

/// Cohorts already replaced during a job. Only the first object of a cohort
/// clears its old documents; later objects of the same cohort append.
pub type ReplacedCohorts = Arc<Mutex<HashSet<String>>>;

/// Outcome of loading a single object
#[derive(Debug, PartialEq, Eq)]
enum ObjectOutcome {
    Loaded { inserted: u64, failed: u64 },
    NoTargetGenes,
}

/// Worker that turns expression matrices into patient documents
pub struct Worker {
    pub worker_id: String,
    pub store: Arc<dyn ObjectStore>,
    pub documents: DocumentStore,
    pub genes: Arc<Vec<String>>,
    pub batch_size: usize,
    /// Set when existing cohort documents are to be replaced
    pub replaced: Option<ReplacedCohorts>,
    pub telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        documents: DocumentStore,
        genes: Arc<Vec<String>>,
        batch_size: usize,
        replaced: Option<ReplacedCohorts>,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4().to_string(),
            store,
            documents,
            genes,
            batch_size: batch_size.max(1),
            replaced,
            telemetry_tx,
        }
    }

    /// Run the worker loop until the queue is drained
    pub async fn run(&self, queue: WorkQueue) -> Result<()> {
        loop {
            let next = queue.lock().await.pop_front();
            let Some(key) = next else {
                break;
            };
            self.process_object(&key).await;
        }

        debug!("Worker {} finished", self.worker_id);
        Ok(())
    }

    /// Load one object and report its outcome. Errors end up in telemetry and
    /// the log; they never stop the worker.
    async fn process_object(&self, key: &str) {
        let _ = self.telemetry_tx.send(TelemetryEvent::ObjectStarted);

        match self.load_object(key).await {
            Ok(ObjectOutcome::Loaded { inserted, failed }) => {
                info!(
                    "Loaded {}: {} documents inserted, {} failed",
                    key, inserted, failed
                );
                let _ = self.telemetry_tx.send(TelemetryEvent::ObjectCompleted);
            }
            Ok(ObjectOutcome::NoTargetGenes) => {
                warn!("Target genes not found in {}", key);
                let _ = self.telemetry_tx.send(TelemetryEvent::ObjectSkipped);
            }
            Err(e) => {
                error!("Failed to load {}: {:#}", key, e);
                let _ = self.telemetry_tx.send(TelemetryEvent::ObjectFailed);
            }
        }
    }

    async fn load_object(&self, key: &str) -> Result<ObjectOutcome> {
        let payload = self
            .store
            .get_object(key)
            .await
            .with_context(|| format!("Failed to download {}", key))?;
        let text = decode_text(&payload)?;
        let matrix = ExpressionMatrix::parse(&text, &self.genes)
            .with_context(|| format!("Failed to parse expression matrix {}", key))?;

        debug!(
            "{} holds {} target genes x {} samples",
            key,
            matrix.genes.len(),
            matrix.samples.len()
        );

        let present = matrix.genes_present(&self.genes);
        if present.is_empty() {
            return Ok(ObjectOutcome::NoTargetGenes);
        }

        let cohort = cohort_name(key);
        let documents: Vec<PatientDocument> = matrix
            .sample_profiles(&present)
            .into_iter()
            .map(|profile| PatientDocument::new(profile.sample_id, cohort.clone(), profile.genes))
            .collect();

        let claimed = match &self.replaced {
            Some(replaced) => replaced.lock().await.insert(cohort.clone()),
            None => false,
        };
        if claimed {
            return Ok(self.replace_cohort(key, &cohort, &documents).await);
        }

        let mut inserted = 0u64;
        let mut failed = 0u64;
        for batch in documents.chunks(self.batch_size) {
            let start = Instant::now();
            match self.insert_with_retry(batch).await {
                Ok(rows) => {
                    inserted += rows;
                    let _ = self.telemetry_tx.send(TelemetryEvent::BatchInserted {
                        documents: rows,
                        duration_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Err(e) => {
                    error!(
                        "Batch of {} documents from {} failed: {:#}",
                        batch.len(),
                        key,
                        e
                    );
                    failed += batch.len() as u64;
                    let _ = self.telemetry_tx.send(TelemetryEvent::BatchFailed {
                        documents: batch.len() as u64,
                    });
                }
            }
        }

        Ok(ObjectOutcome::Loaded { inserted, failed })
    }

    /// Clear the cohort and insert its documents as one transaction. On
    /// failure the previous documents stay and every new one counts as failed.
    async fn replace_cohort(
        &self,
        key: &str,
        cohort: &str,
        documents: &[PatientDocument],
    ) -> ObjectOutcome {
        let start = Instant::now();
        let result = self
            .with_retry(|| self.documents.replace_cohort(cohort, documents, self.batch_size))
            .await;

        match result {
            Ok(replacement) => {
                if replacement.removed > 0 {
                    info!(
                        "Replaced {} existing documents of cohort {}",
                        replacement.removed, cohort
                    );
                }
                let _ = self.telemetry_tx.send(TelemetryEvent::BatchInserted {
                    documents: replacement.inserted,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
                ObjectOutcome::Loaded {
                    inserted: replacement.inserted,
                    failed: 0,
                }
            }
            Err(e) => {
                error!(
                    "Replacing cohort {} from {} failed, existing documents kept: {:#}",
                    cohort, key, e
                );
                let failed = documents.len() as u64;
                let _ = self
                    .telemetry_tx
                    .send(TelemetryEvent::BatchFailed { documents: failed });
                ObjectOutcome::Loaded {
                    inserted: 0,
                    failed,
                }
            }
        }
    }

    async fn insert_with_retry(&self, batch: &[PatientDocument]) -> Result<u64> {
        self.with_retry(|| self.documents.insert_batch(batch)).await
    }

    /// Run a database write, retrying transient failures and timeouts with
    /// exponential backoff
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay_ms = 100 * 2u64.pow(attempt - 1);
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
            }

            match tokio::time::timeout(QUERY_TIMEOUT, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(
                        "Write attempt {}/{} failed: {:#}",
                        attempt + 1,
                        MAX_RETRIES,
                        e
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        "Write attempt {}/{} timed out after {} seconds",
                        attempt + 1,
                        MAX_RETRIES,
                        QUERY_TIMEOUT.as_secs()
                    );
                    last_error = Some(anyhow!(
                        "Query execution timed out after {} seconds",
                        QUERY_TIMEOUT.as_secs()
                    ));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("No insert attempts were made"))
            .context(format!("Failed after {} attempts", MAX_RETRIES)))
    }
}

/// Cohort label of an object: the last path segment with `.tsv` removed
pub fn cohort_name(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).replace(".tsv", "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Pool;
    use crate::io::LocalObjectStore;
    use tempfile::TempDir;

    const MATRIX: &str = "sample\tTCGA-A1-A0SB-01\tTCGA-A1-A0SD-01\n\
                          CCL5\t1.5\t2.5\n\
                          GAPDH\t9.0\t9.1\n\
                          IL6\tNA\t0.25\n";

    async fn setup() -> (TempDir, Worker, mpsc::UnboundedReceiver<TelemetryEvent>) {
        let (dir, worker, _pool, rx) = setup_with_pool().await;
        (dir, worker, rx)
    }

    async fn setup_with_pool() -> (
        TempDir,
        Worker,
        Pool,
        mpsc::UnboundedReceiver<TelemetryEvent>,
    ) {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path(), "tcga");
        store.create_bucket().await.unwrap();

        let pool = Pool::sqlite_in_memory().await.unwrap();
        let documents = DocumentStore::new(pool.clone(), "patients").unwrap();
        documents.ensure_table().await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(
            Arc::new(store),
            documents,
            Arc::new(vec!["IL6".to_string(), "CCL5".to_string()]),
            1,
            None,
            tx,
        );
        (dir, worker, pool, rx)
    }

    fn put(dir: &TempDir, key: &str, contents: &str) {
        let path = dir.path().join("tcga").join(key);
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_cohort_name() {
        assert_eq!(
            cohort_name("TCGA.BRCA.sampleMap_HiSeqV2_PANCAN"),
            "TCGA.BRCA.sampleMap_HiSeqV2_PANCAN"
        );
        assert_eq!(cohort_name("raw/BRCA_PANCAN.tsv"), "BRCA_PANCAN");
    }

    #[tokio::test]
    async fn test_load_object_builds_documents() {
        let (dir, worker, mut rx) = setup().await;
        put(&dir, "BRCA_PANCAN", MATRIX);

        let outcome = worker.load_object("BRCA_PANCAN").await.unwrap();
        assert_eq!(
            outcome,
            ObjectOutcome::Loaded {
                inserted: 2,
                failed: 0
            }
        );

        let first = worker
            .documents
            .find_by_patient_id("TCGA-A1-A0SB-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.cancer_cohort, "BRCA_PANCAN");
        assert_eq!(first.genes.len(), 1);
        assert_eq!(first.genes["CCL5"], 1.5);

        let second = worker
            .documents
            .find_by_patient_id("TCGA-A1-A0SD-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.genes["IL6"], 0.25);
        assert!(!second.genes.contains_key("GAPDH"));

        // batch_size 1 means one event per sample
        let mut batches = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TelemetryEvent::BatchInserted { .. }) {
                batches += 1;
            }
        }
        assert_eq!(batches, 2);
    }

    #[tokio::test]
    async fn test_object_without_target_genes_is_skipped() {
        let (dir, worker, mut rx) = setup().await;
        put(&dir, "OV_PANCAN", "sample\tS1\nGAPDH\t1.0\n");

        worker.process_object("OV_PANCAN").await;
        assert_eq!(worker.documents.count().await.unwrap(), 0);

        assert!(matches!(rx.try_recv(), Ok(TelemetryEvent::ObjectStarted)));
        assert!(matches!(rx.try_recv(), Ok(TelemetryEvent::ObjectSkipped)));
    }

    #[tokio::test]
    async fn test_missing_object_fails_without_stopping() {
        let (dir, worker, mut rx) = setup().await;
        put(&dir, "BRCA_PANCAN", MATRIX);

        let queue: WorkQueue = Arc::new(Mutex::new(VecDeque::from([
            "MISSING_PANCAN".to_string(),
            "BRCA_PANCAN".to_string(),
        ])));
        worker.run(queue.clone()).await.unwrap();

        assert!(queue.lock().await.is_empty());
        assert_eq!(worker.documents.count().await.unwrap(), 2);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.iter().any(|e| matches!(e, TelemetryEvent::ObjectFailed)));
        assert!(events.iter().any(|e| matches!(e, TelemetryEvent::ObjectCompleted)));
    }

    #[tokio::test]
    async fn test_replace_existing_cohort() {
        let (dir, mut worker, _rx) = setup().await;
        put(&dir, "BRCA_PANCAN", MATRIX);

        worker.load_object("BRCA_PANCAN").await.unwrap();
        worker.load_object("BRCA_PANCAN").await.unwrap();
        assert_eq!(worker.documents.count().await.unwrap(), 4);

        worker.replaced = Some(ReplacedCohorts::default());
        worker.load_object("BRCA_PANCAN").await.unwrap();
        assert_eq!(worker.documents.count().await.unwrap(), 2);

        // Same cohort again within the job: appended, not cleared twice
        worker.load_object("BRCA_PANCAN").await.unwrap();
        assert_eq!(worker.documents.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_existing_documents() {
        let (dir, mut worker, pool, _rx) = setup_with_pool().await;
        put(&dir, "BRCA_PANCAN", MATRIX);
        worker.load_object("BRCA_PANCAN").await.unwrap();

        pool.execute_query(
            "CREATE TRIGGER reject_inserts BEFORE INSERT ON patients \
             BEGIN SELECT RAISE(ABORT, 'inserts disabled'); END",
        )
        .await
        .unwrap();

        worker.replaced = Some(ReplacedCohorts::default());
        let outcome = worker.load_object("BRCA_PANCAN").await.unwrap();

        assert_eq!(
            outcome,
            ObjectOutcome::Loaded {
                inserted: 0,
                failed: 2
            }
        );
        assert_eq!(worker.documents.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_gzip_payload() {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        let (dir, worker, _rx) = setup().await;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(MATRIX.as_bytes()).unwrap();
        std::fs::write(
            dir.path().join("tcga").join("LUAD_PANCAN"),
            encoder.finish().unwrap(),
        )
        .unwrap();

        let outcome = worker.load_object("LUAD_PANCAN").await.unwrap();
        assert!(matches!(outcome, ObjectOutcome::Loaded { inserted: 2, .. }));
    }
}
