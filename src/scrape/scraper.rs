use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use super::download::Downloader;
use super::html::{discover_cohorts, download_links};
use super::webdriver::Browser;

/// A cohort and the download links found for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cohort {
    pub name: String,
    pub download_links: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub hub_url: String,
    /// Link texts clicked on the hub page, one per cohort
    pub cohort_links: Vec<String>,
    /// Partial text of the dataset link on a cohort page
    pub dataset_link: String,
    /// Stop after this many successful downloads
    pub max_downloads: Option<usize>,
    /// Parse the hub page for cohorts instead of clicking through it
    pub discover: bool,
    /// Pause after each navigation so client-side rendering can finish
    pub settle_delay: Duration,
}

#[derive(Debug, Default)]
pub struct ScrapeResult {
    pub cohorts_visited: usize,
    pub downloaded: Vec<PathBuf>,
    pub extracted: Vec<PathBuf>,
}

pub struct CohortScraper<B: Browser> {
    browser: B,
    config: ScrapeConfig,
}

impl<B: Browser> CohortScraper<B> {
    pub fn new(browser: B, config: ScrapeConfig) -> Self {
        Self { browser, config }
    }

    /// Scrape, download and decompress. The browser is closed on every path.
    pub async fn run(mut self, downloader: &Downloader) -> Result<ScrapeResult> {
        info!("Starting TCGA cohort scraping pipeline");
        let outcome = self.scrape_and_download(downloader).await;

        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {:#}", e);
        }

        if let Err(e) = &outcome {
            error!("Scraping pipeline error: {:#}", e);
        }
        outcome
    }

    async fn scrape_and_download(&mut self, downloader: &Downloader) -> Result<ScrapeResult> {
        let cohorts = self.scrape_cohorts().await?;
        if cohorts.is_empty() {
            warn!("No cohorts found");
            return Ok(ScrapeResult::default());
        }

        let downloaded = downloader
            .download_cohort_files(&cohorts, self.config.max_downloads)
            .await;
        let extracted = downloader.decompress_all(&downloaded).await;

        info!(
            "Pipeline completed. Downloaded {} files, extracted {}",
            downloaded.len(),
            extracted.len()
        );

        Ok(ScrapeResult {
            cohorts_visited: cohorts.len(),
            downloaded,
            extracted,
        })
    }

    /// Collect cohorts with their download links from the hub
    pub async fn scrape_cohorts(&mut self) -> Result<Vec<Cohort>> {
        self.open_hub().await?;

        let cohorts = if self.config.discover {
            let page = self.browser.page_source().await?;
            discover_cohorts(&page)
        } else {
            self.click_through_cohorts().await?
        };

        info!("Successfully extracted {} cohorts", cohorts.len());
        Ok(cohorts)
    }

    async fn open_hub(&mut self) -> Result<()> {
        self.browser.goto(&self.config.hub_url).await?;
        tokio::time::sleep(self.config.settle_delay).await;
        Ok(())
    }

    async fn click_through_cohorts(&mut self) -> Result<Vec<Cohort>> {
        let mut cohorts = Vec::new();

        for link_text in self.config.cohort_links.clone() {
            if !self.browser.click_link(&link_text, false).await? {
                warn!("Cohort link '{}' not found, skipping", link_text);
                continue;
            }
            tokio::time::sleep(self.config.settle_delay).await;

            if !self
                .browser
                .click_link(&self.config.dataset_link, true)
                .await?
            {
                warn!(
                    "Dataset link '{}' not found for cohort '{}'",
                    self.config.dataset_link, link_text
                );
                self.browser.back().await?;
                tokio::time::sleep(self.config.settle_delay).await;
                continue;
            }
            tokio::time::sleep(self.config.settle_delay).await;

            let page = self.browser.page_source().await?;
            let links = download_links(&page);
            info!("Found {} download links for {}", links.len(), link_text);
            cohorts.push(Cohort {
                name: link_text,
                download_links: links,
            });

            self.open_hub().await?;
        }

        Ok(cohorts)
    }
}
