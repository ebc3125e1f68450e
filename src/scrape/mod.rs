//! Cohort hub scraping: browser automation, link extraction and downloads

pub mod download;
pub mod html;
pub mod scraper;
pub mod webdriver;

pub use download::Downloader;
pub use scraper::{CohortScraper, ScrapeConfig, ScrapeResult};
pub use webdriver::WebDriverSession;
