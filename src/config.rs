//! Configuration constants and the secrets file
//!
//! This module centralizes all tunable parameters and constants used throughout
//! the application, plus the JSON secrets file that carries object-store and
//! database credentials.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Connection Pool Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Loader Configuration
// ============================================================================

pub const MAX_RETRIES: u32 = 5;

/// Timeout for individual database queries
///
/// Batch inserts of a full cohort can be large, so this is generous.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(180); // 3 minutes

/// Genes extracted from every expression matrix
pub const TARGET_GENES: &[&str] = &[
    "C6orf150", "CCL5", "CXCL10", "TMEM173", "CXCL9", "CXCL11", "NFKB1", "IKBKE", "IRF3", "TREX1",
    "ATM", "IL6", "IL8",
];

/// Object keys (and local file names) ending with this are expression matrices
pub const PANCAN_SUFFIX: &str = "PANCAN";

/// Length of the base patient barcode, e.g. `TCGA-A1-A0SB`
pub const BASE_PATIENT_ID_LEN: usize = 12;

pub const DEFAULT_TABLE: &str = "patients";

pub const DEFAULT_REGION: &str = "us-east-1";

/// Clinical survival table joined onto loaded documents
pub const DEFAULT_SURVIVAL_SOURCE: &str = "resources/TCGA_clinical_survival_data.tsv";

// ============================================================================
// Scraper Configuration
// ============================================================================

pub const DEFAULT_HUB_URL: &str = "https://xenabrowser.net/datapages/?host=https%3A%2F%2Ftcga.xenahubs.net&removeHub=https%3A%2F%2Fpancanatlas.xenahubs.net";

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";

/// Cohort links clicked on the hub page, in order
pub const DEFAULT_COHORTS: &[&str] = &[
    "TCGA Breast Cancer (BRCA)",
    "TCGA Lung Adenocarcinoma (LUAD)",
    "TCGA Colon Cancer (COAD)",
];

/// Partial link text of the dataset to open inside a cohort page
pub const DEFAULT_DATASET_LINK: &str = "pancan normalized";

pub const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra wait after `<body>` appears; the hub renders its tables client-side
pub const PAGE_SETTLE_DELAY: Duration = Duration::from_secs(5);

pub const PAGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

pub const DOWNLOAD_EXTENSIONS: &[&str] = &[".zip", ".gz", ".tar", ".tar.gz", ".bz2", ".xz"];

pub const MAX_FILENAME_LEN: usize = 100;

/// Subdirectory of the downloads folder that receives gunzipped files
pub const UNCOMPRESSED_DIR: &str = "uncompressed";

// ============================================================================
// Server Configuration
// ============================================================================

pub const DEFAULT_SERVER_HOST: &str = "localhost";

pub const DEFAULT_SERVER_PORT: u16 = 5555;

// ============================================================================
// Secrets
// ============================================================================

pub const DEFAULT_SECRETS_FILE: &str = "_secrets.json";

/// Credentials and locations read from the secrets file
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub object_store: ObjectStoreSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreSettings {
    /// S3-compatible endpoint, e.g. `http://localhost:9000` for MinIO
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

impl Settings {
    /// Load and validate the secrets file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid secrets file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(raw).context("Invalid JSON")?;
        validate_identifier(&settings.database.table)?;
        Ok(settings)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        anyhow::bail!(
            "Invalid table name '{}': use letters, digits and underscores",
            name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "object_store": {
            "endpoint": "http://localhost:9000",
            "access_key": "minio",
            "secret_key": "minio123",
            "bucket": "tcga"
        },
        "database": { "url": "postgres://localhost/genes" }
    }"#;

    #[test]
    fn test_parse_applies_defaults() {
        let settings = Settings::parse(SAMPLE).unwrap();
        assert_eq!(settings.object_store.bucket, "tcga");
        assert_eq!(settings.object_store.region, "us-east-1");
        assert_eq!(settings.database.table, "patients");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.database.url, "postgres://localhost/genes");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Settings::load(Path::new("/nonexistent/_secrets.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read secrets file"));
    }

    #[test]
    fn test_parse_missing_section() {
        assert!(Settings::parse(r#"{"database": {"url": "x"}}"#).is_err());
    }

    #[test]
    fn test_rejects_bad_table_name() {
        let raw = SAMPLE.replace(
            r#""url": "postgres://localhost/genes""#,
            r#""url": "postgres://localhost/genes", "table": "patients; DROP TABLE x""#,
        );
        assert!(Settings::parse(&raw).is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("patients").is_ok());
        assert!(validate_identifier("_p2").is_ok());
        assert!(validate_identifier("2p").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a-b").is_err());
    }
}
