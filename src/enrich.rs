//! Copy survival outcomes onto stored patient documents

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::db::DocumentStore;
use crate::formats::compression::decode_text;
use crate::formats::{SurvivalTable, base_patient_id};
use crate::io::{S3ObjectStore, SourceUri};

#[derive(Debug)]
pub struct EnrichResult {
    /// Documents whose base barcode matched a survival record
    pub updated: u64,
    /// Documents examined
    pub total: u64,
    pub duration: Duration,
}

impl EnrichResult {
    pub fn patients_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total as f64 / secs
        } else {
            0.0
        }
    }
}

/// Read the survival table from a local path, `file://` URI or `s3://bucket/key`
pub async fn read_survival_table(
    source: &str,
    s3: Option<&S3ObjectStore>,
) -> Result<SurvivalTable> {
    let uri = SourceUri::parse(source)?;
    let payload = uri
        .read_all(s3)
        .await
        .with_context(|| format!("Failed to read survival table from {}", source))?;
    let table = SurvivalTable::parse(&decode_text(&payload)?)?;
    if table.is_empty() {
        warn!("Survival table {} holds no records; nothing will be enriched", source);
    } else {
        info!("Read {} survival records from {}", table.len(), source);
    }
    Ok(table)
}

pub struct Enricher {
    documents: DocumentStore,
}

impl Enricher {
    pub fn new(documents: DocumentStore) -> Self {
        Self { documents }
    }

    /// Join every stored document against `table` by base patient barcode and
    /// overwrite the clinical fields of the matches
    pub async fn run(&self, table: &SurvivalTable) -> Result<EnrichResult> {
        let start = Instant::now();
        self.documents.ensure_table().await?;

        let keys = self
            .documents
            .list_keys()
            .await
            .context("Failed to list patient documents")?;

        let mut updated = 0u64;
        for key in &keys {
            let Some(clinical) = table.get(base_patient_id(&key.patient_id)) else {
                continue;
            };

            match self.documents.update_clinical(key.id, clinical).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to update {}: {:#}", key.patient_id, e),
            }
        }

        let result = EnrichResult {
            updated,
            total: keys.len() as u64,
            duration: start.elapsed(),
        };

        info!(
            "Enriched {}/{} patient documents in {:.2}s ({:.1} patients/s)",
            result.updated,
            result.total,
            result.duration.as_secs_f64(),
            result.patients_per_second()
        );

        Ok(result)
    }
}
