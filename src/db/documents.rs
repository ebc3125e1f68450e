//! Patient documents: one row per sample with its gene values and clinical outcome

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(test)]
use super::pool::sqlite_placeholders;
use super::pool::{Pool, PoolConnection};
use crate::config::validate_identifier;
use crate::formats::ClinicalRecord;

/// A patient/sample record as stored and served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientDocument {
    /// Database id, never serialized
    #[serde(skip)]
    pub id: Option<i64>,
    pub patient_id: String,
    pub cancer_cohort: String,
    pub genes: BTreeMap<String, f64>,
    #[serde(rename = "DSS")]
    pub dss: Option<i64>,
    #[serde(rename = "OS")]
    pub os: Option<i64>,
    pub clinical_stage: Option<String>,
}

impl PatientDocument {
    pub fn new(
        patient_id: impl Into<String>,
        cancer_cohort: impl Into<String>,
        genes: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            id: None,
            patient_id: patient_id.into(),
            cancer_cohort: cancer_cohort.into(),
            genes,
            dss: None,
            os: None,
            clinical_stage: None,
        }
    }
}

/// Id and patient barcode of a stored document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentKey {
    pub id: i64,
    pub patient_id: String,
}

type DocumentRow = (
    i64,
    String,
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<String>,
);

const DOCUMENT_COLUMNS: &str =
    "\"id\", \"patient_id\", \"cancer_cohort\", \"genes\", \"dss\", \"os\", \"clinical_stage\"";

/// Bound values per inserted document
const INSERT_ARITY: usize = 6;

/// Bind every document of a batch, in `insert_sql` column order
macro_rules! bind_documents {
    ($query:expr, $documents:expr, $genes:expr) => {{
        let mut query = $query;
        for (doc, genes) in $documents.iter().zip($genes.iter()) {
            query = query
                .bind(&doc.patient_id)
                .bind(&doc.cancer_cohort)
                .bind(genes)
                .bind(doc.dss)
                .bind(doc.os)
                .bind(&doc.clinical_stage);
        }
        query
    }};
}

/// Rows touched by `DocumentStore::replace_cohort`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CohortReplacement {
    pub removed: u64,
    pub inserted: u64,
}

fn genes_json(documents: &[PatientDocument]) -> Result<Vec<String>> {
    documents
        .iter()
        .map(|d| serde_json::to_string(&d.genes).context("Failed to encode genes"))
        .collect()
}

fn document_from_row(row: DocumentRow) -> Result<PatientDocument> {
    let (id, patient_id, cancer_cohort, genes, dss, os, clinical_stage) = row;
    let genes = serde_json::from_str(&genes)
        .with_context(|| format!("Corrupt genes column for document {}", id))?;

    Ok(PatientDocument {
        id: Some(id),
        patient_id,
        cancer_cohort,
        genes,
        dss,
        os,
        clinical_stage,
    })
}

/// Typed access to the documents table
#[derive(Debug, Clone)]
pub struct DocumentStore {
    pool: Pool,
    table: String,
}

impl DocumentStore {
    pub fn new(pool: Pool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self { pool, table })
    }

    pub async fn ensure_table(&self) -> Result<()> {
        super::schema::ensure_documents_table(&self.pool, &self.table).await
    }

    /// Insert documents with a single multi-row INSERT.
    /// Returns the number of rows written.
    pub async fn insert_batch(&self, documents: &[PatientDocument]) -> Result<u64> {
        if documents.is_empty() {
            return Ok(0);
        }

        let sql = self.insert_sql(documents.len());
        let genes = genes_json(documents)?;

        let mut conn = self.pool.acquire().await?;
        let rows = match &mut conn {
            PoolConnection::Postgres(c) => {
                bind_documents!(sqlx::query(&sql), documents, genes)
                    .execute(&mut **c)
                    .await?
                    .rows_affected()
            }
            #[cfg(test)]
            PoolConnection::Sqlite(c) => {
                let sql = sqlite_placeholders(&sql);
                bind_documents!(sqlx::query(&sql), documents, genes)
                    .execute(&mut **c)
                    .await?
                    .rows_affected()
            }
        };

        Ok(rows)
    }

    /// Remove every document of a cohort. Returns the number removed.
    pub async fn delete_cohort(&self, cohort: &str) -> Result<u64> {
        let sql = self.delete_cohort_sql();

        let mut conn = self.pool.acquire().await?;
        let rows = match &mut conn {
            PoolConnection::Postgres(c) => {
                sqlx::query(&sql)
                    .bind(cohort)
                    .execute(&mut **c)
                    .await?
                    .rows_affected()
            }
            #[cfg(test)]
            PoolConnection::Sqlite(c) => {
                sqlx::query(&sqlite_placeholders(&sql))
                    .bind(cohort)
                    .execute(&mut **c)
                    .await?
                    .rows_affected()
            }
        };

        Ok(rows)
    }

    /// Swap a cohort's documents for `documents` in one transaction, inserting
    /// `batch_size` rows per statement. Any failure rolls back to the old rows.
    pub async fn replace_cohort(
        &self,
        cohort: &str,
        documents: &[PatientDocument],
        batch_size: usize,
    ) -> Result<CohortReplacement> {
        let delete_sql = self.delete_cohort_sql();
        let batches = documents
            .chunks(batch_size.max(1))
            .map(|batch| Ok((batch, self.insert_sql(batch.len()), genes_json(batch)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.pool.acquire().await?;
        let replacement = match &mut conn {
            PoolConnection::Postgres(c) => {
                let mut tx = sqlx::Connection::begin(&mut **c).await?;
                let removed = sqlx::query(&delete_sql)
                    .bind(cohort)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();

                let mut inserted = 0;
                for (batch, sql, genes) in &batches {
                    inserted += bind_documents!(sqlx::query(sql), batch, genes)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                tx.commit().await?;

                CohortReplacement { removed, inserted }
            }
            #[cfg(test)]
            PoolConnection::Sqlite(c) => {
                let mut tx = sqlx::Connection::begin(&mut **c).await?;
                let removed = sqlx::query(&sqlite_placeholders(&delete_sql))
                    .bind(cohort)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();

                let mut inserted = 0;
                for (batch, sql, genes) in &batches {
                    let sql = sqlite_placeholders(sql);
                    inserted += bind_documents!(sqlx::query(&sql), batch, genes)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                tx.commit().await?;

                CohortReplacement { removed, inserted }
            }
        };

        Ok(replacement)
    }

    fn insert_sql(&self, rows: usize) -> String {
        let value_groups: Vec<String> = (0..rows)
            .map(|row| {
                let placeholders: Vec<String> = (1..=INSERT_ARITY)
                    .map(|col| format!("${}", row * INSERT_ARITY + col))
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();

        format!(
            "INSERT INTO \"{}\" (\"patient_id\", \"cancer_cohort\", \"genes\", \"dss\", \"os\", \"clinical_stage\") VALUES {}",
            self.table,
            value_groups.join(", ")
        )
    }

    fn delete_cohort_sql(&self) -> String {
        format!(
            "DELETE FROM \"{}\" WHERE \"cancer_cohort\" = $1",
            self.table
        )
    }

    /// First stored document for a patient barcode
    pub async fn find_by_patient_id(&self, patient_id: &str) -> Result<Option<PatientDocument>> {
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE \"patient_id\" = $1 ORDER BY \"id\" LIMIT 1",
            DOCUMENT_COLUMNS, self.table
        );

        let mut conn = self.pool.acquire().await?;
        let row = match &mut conn {
            PoolConnection::Postgres(c) => {
                sqlx::query_as::<_, DocumentRow>(&sql)
                    .bind(patient_id)
                    .fetch_optional(&mut **c)
                    .await?
            }
            #[cfg(test)]
            PoolConnection::Sqlite(c) => {
                sqlx::query_as::<_, DocumentRow>(&sqlite_placeholders(&sql))
                    .bind(patient_id)
                    .fetch_optional(&mut **c)
                    .await?
            }
        };

        row.map(document_from_row).transpose()
    }

    /// Ids and barcodes of every document, oldest first
    pub async fn list_keys(&self) -> Result<Vec<DocumentKey>> {
        let sql = format!(
            "SELECT \"id\", \"patient_id\" FROM \"{}\" ORDER BY \"id\"",
            self.table
        );

        let mut conn = self.pool.acquire().await?;
        let rows: Vec<(i64, String)> = match &mut conn {
            PoolConnection::Postgres(c) => sqlx::query_as(&sql).fetch_all(&mut **c).await?,
            #[cfg(test)]
            PoolConnection::Sqlite(c) => sqlx::query_as(&sql).fetch_all(&mut **c).await?,
        };

        Ok(rows
            .into_iter()
            .map(|(id, patient_id)| DocumentKey { id, patient_id })
            .collect())
    }

    /// Overwrite the clinical fields of one document. Returns false when the
    /// id no longer exists.
    pub async fn update_clinical(&self, id: i64, clinical: &ClinicalRecord) -> Result<bool> {
        let sql = format!(
            "UPDATE \"{}\" SET \"dss\" = $1, \"os\" = $2, \"clinical_stage\" = $3 WHERE \"id\" = $4",
            self.table
        );

        let mut conn = self.pool.acquire().await?;
        let rows = match &mut conn {
            PoolConnection::Postgres(c) => {
                sqlx::query(&sql)
                    .bind(clinical.dss)
                    .bind(clinical.os)
                    .bind(&clinical.clinical_stage)
                    .bind(id)
                    .execute(&mut **c)
                    .await?
                    .rows_affected()
            }
            #[cfg(test)]
            PoolConnection::Sqlite(c) => {
                sqlx::query(&sqlite_placeholders(&sql))
                    .bind(clinical.dss)
                    .bind(clinical.os)
                    .bind(&clinical.clinical_stage)
                    .bind(id)
                    .execute(&mut **c)
                    .await?
                    .rows_affected()
            }
        };

        Ok(rows > 0)
    }

    pub async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", self.table);

        let mut conn = self.pool.acquire().await?;
        let (count,): (i64,) = match &mut conn {
            PoolConnection::Postgres(c) => sqlx::query_as(&sql).fetch_one(&mut **c).await?,
            #[cfg(test)]
            PoolConnection::Sqlite(c) => sqlx::query_as(&sql).fetch_one(&mut **c).await?,
        };

        Ok(count)
    }
}
