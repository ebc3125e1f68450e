use anyhow::{Context, Result};
use tracing::info;

use super::pool::Pool;
use crate::config::validate_identifier;

/// Generate the DDL for the patient documents table and its lookup index.
/// `genes` holds a JSON object of gene -> expression value.
pub fn documents_ddl(table_name: &str, postgres: bool) -> Vec<String> {
    let id_column = if postgres {
        "\"id\" BIGSERIAL PRIMARY KEY"
    } else {
        "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
    };

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (\n  \
               {id_column},\n  \
               \"patient_id\" TEXT NOT NULL,\n  \
               \"cancer_cohort\" TEXT NOT NULL,\n  \
               \"genes\" TEXT NOT NULL,\n  \
               \"dss\" BIGINT,\n  \
               \"os\" BIGINT,\n  \
               \"clinical_stage\" TEXT\n\
             );",
            table = table_name,
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS \"{table}_patient_id_idx\" ON \"{table}\" (\"patient_id\");",
            table = table_name,
        ),
    ]
}

/// Create the documents table if it does not exist yet
pub async fn ensure_documents_table(pool: &Pool, table_name: &str) -> Result<()> {
    validate_identifier(table_name)?;

    for statement in documents_ddl(table_name, pool.is_postgres()) {
        pool.execute_query(&statement)
            .await
            .with_context(|| format!("Failed to create table '{}'", table_name))?;
    }

    info!("Documents table '{}' is ready", table_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_per_backend() {
        let pg = documents_ddl("patients", true);
        assert!(pg[0].contains("BIGSERIAL PRIMARY KEY"));
        assert!(pg[0].contains("\"clinical_stage\" TEXT"));
        assert!(pg[1].contains("\"patients_patient_id_idx\""));

        let sqlite = documents_ddl("patients", false);
        assert!(sqlite[0].contains("AUTOINCREMENT"));
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        ensure_documents_table(&pool, "patients").await.unwrap();
        ensure_documents_table(&pool, "patients").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_bad_table_name() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        assert!(ensure_documents_table(&pool, "x; DROP").await.is_err());
    }
}
