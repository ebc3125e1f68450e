//! High-level runner API for the TCGA cohort loader.
//!
//! One entry point per stage. Each hides the setup of browsers, object-store
//! clients, connection pools and coordinators behind a plain argument struct.
//!
//! This is the primary API for the CLI.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::coordination::{LoadConfig, LoadCoordinator};
use crate::db::pool::PoolArgsBuilder;
use crate::db::{DocumentStore, Pool};
use crate::enrich::{Enricher, read_survival_table};
use crate::io::{LocalObjectStore, ObjectStore, S3ObjectStore};
use crate::scrape::{CohortScraper, Downloader, ScrapeConfig, WebDriverSession};
use crate::server::{self, ServerConfig};
use crate::upload::Uploader;

pub use crate::config::{
    DEFAULT_COHORTS, DEFAULT_DATASET_LINK, DEFAULT_DOWNLOADS_DIR, DEFAULT_HUB_URL,
    DEFAULT_SECRETS_FILE, DEFAULT_SURVIVAL_SOURCE, DEFAULT_WEBDRIVER_URL, PANCAN_SUFFIX,
    TARGET_GENES, Settings,
};
pub use crate::coordination::LoadResult;
pub use crate::enrich::EnrichResult;
pub use crate::scrape::ScrapeResult;
pub use crate::upload::UploadResult;

/// Read the secrets file
pub fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load(path)
}

/// Arguments for scraping the cohort hub
#[derive(Debug, Clone)]
pub struct ScrapeArgs {
    pub hub_url: String,
    pub webdriver_url: String,
    pub downloads_dir: PathBuf,
    pub cohort_links: Vec<String>,
    pub dataset_link: String,
    pub max_downloads: Option<usize>,
    pub discover: bool,
}

/// Arguments for uploading downloaded files to the object store
#[derive(Clone)]
pub struct UploadArgs {
    pub settings: Settings,
    pub source_dir: PathBuf,
    pub suffix: String,
    pub dry_run: bool,
    /// Use a local directory in place of S3. The bucket is a subdirectory.
    pub store_dir: Option<PathBuf>,
}

/// Arguments for loading expression matrices into patient documents
#[derive(Clone)]
pub struct LoadArgs {
    pub settings: Settings,
    pub worker_count: usize,
    pub batch_size: usize,
    pub suffix: String,
    pub genes: Vec<String>,
    pub replace_existing: bool,
    pub quiet: bool,
    pub store_dir: Option<PathBuf>,

    // Test-only: inject a pre-created pool (for SQLite testing)
    #[cfg(test)]
    pub test_pool: Option<Pool>,
}

/// Arguments for joining survival data onto stored documents
#[derive(Clone)]
pub struct EnrichArgs {
    pub settings: Settings,
    /// Local path, `file://` URI or `s3://bucket/key`
    pub survival_source: String,

    #[cfg(test)]
    pub test_pool: Option<Pool>,
}

/// Arguments for the lookup server. Raw values as read from the environment.
#[derive(Clone)]
pub struct ServeArgs {
    pub settings: Settings,
    pub host: Option<String>,
    pub port: Option<String>,
}

/// Scrape, upload, load and enrich in one go
#[derive(Clone)]
pub struct PipelineArgs {
    pub scrape: ScrapeArgs,
    pub upload: UploadArgs,
    pub load: LoadArgs,
    pub enrich: EnrichArgs,
}

#[derive(Debug)]
pub struct PipelineResult {
    pub scrape: ScrapeResult,
    pub upload: UploadResult,
    pub load: LoadResult,
    pub enrich: EnrichResult,
}

/// Drive chromedriver through the hub and download the cohort files
pub async fn run_scrape(args: ScrapeArgs) -> Result<ScrapeResult> {
    let downloader = Downloader::new(&args.hub_url, &args.downloads_dir)?;
    let browser = WebDriverSession::start(&args.webdriver_url, &args.downloads_dir)
        .await
        .context("Failed to start the browser session. Is chromedriver running?")?;

    let config = ScrapeConfig {
        hub_url: args.hub_url,
        cohort_links: args.cohort_links,
        dataset_link: args.dataset_link,
        max_downloads: args.max_downloads,
        discover: args.discover,
        settle_delay: crate::config::PAGE_SETTLE_DELAY,
    };

    CohortScraper::new(browser, config).run(&downloader).await
}

pub async fn run_upload(args: UploadArgs) -> Result<UploadResult> {
    let store = object_store(&args.settings, args.store_dir.as_deref()).await?;

    Uploader::new(store, args.suffix, args.dry_run)
        .run(&args.source_dir)
        .await
}

pub async fn run_load(args: LoadArgs) -> Result<LoadResult> {
    let store = object_store(&args.settings, args.store_dir.as_deref()).await?;

    #[cfg(test)]
    let documents = document_store(&args.settings, args.test_pool).await?;

    #[cfg(not(test))]
    let documents = document_store(&args.settings, None).await?;

    let config = LoadConfig {
        worker_count: args.worker_count,
        batch_size: args.batch_size,
        suffix: args.suffix,
        genes: args.genes,
        replace_existing: args.replace_existing,
        quiet: args.quiet,
    };

    LoadCoordinator::new(store, documents).run_load(config).await
}

pub async fn run_enrich(args: EnrichArgs) -> Result<EnrichResult> {
    #[cfg(test)]
    let documents = document_store(&args.settings, args.test_pool).await?;

    #[cfg(not(test))]
    let documents = document_store(&args.settings, None).await?;

    // Only S3 sources need a client
    let s3 = if args.survival_source.starts_with("s3://") {
        Some(S3ObjectStore::from_settings(&args.settings.object_store).await?)
    } else {
        None
    };

    let table = read_survival_table(&args.survival_source, s3.as_ref()).await?;
    Enricher::new(documents).run(&table).await
}

/// Serve patient lookups until Ctrl-C
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig::from_values(args.host.as_deref(), args.port.as_deref());
    let documents = document_store(&args.settings, None).await?;
    documents.ensure_table().await?;
    server::serve(&config, documents).await
}

pub async fn run_pipeline(args: PipelineArgs) -> Result<PipelineResult> {
    let scrape = run_scrape(args.scrape).await?;
    let upload = run_upload(args.upload).await?;
    let load = run_load(args.load).await?;
    let enrich = run_enrich(args.enrich).await?;

    Ok(PipelineResult {
        scrape,
        upload,
        load,
        enrich,
    })
}

/// S3 from the secrets file, or a directory store when `store_dir` is given
async fn object_store(settings: &Settings, store_dir: Option<&Path>) -> Result<Arc<dyn ObjectStore>> {
    match store_dir {
        Some(dir) => Ok(Arc::new(LocalObjectStore::new(
            dir,
            &settings.object_store.bucket,
        ))),
        None => Ok(Arc::new(
            S3ObjectStore::from_settings(&settings.object_store).await?,
        )),
    }
}

/// Connect to the configured database, or wrap an injected pool
async fn document_store(settings: &Settings, injected: Option<Pool>) -> Result<DocumentStore> {
    let pool = match injected {
        Some(pool) => pool,
        None => {
            let pool_args = PoolArgsBuilder::default()
                .url(&settings.database.url)
                .build()?;
            crate::db::pool::pool(pool_args).await?
        }
    };
    DocumentStore::new(pool, &settings.database.table)
}
