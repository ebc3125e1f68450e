use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use url::Url;

use super::html::sanitize_filename;
use super::scraper::Cohort;
use crate::config::{DOWNLOAD_TIMEOUT, UNCOMPRESSED_DIR};
use crate::formats::compression::{extract_zip, gunzip_file};

/// Fetches cohort files over HTTP into a per-cohort folder layout
pub struct Downloader {
    client: Client,
    base_url: Url,
    downloads_dir: PathBuf,
}

impl Downloader {
    /// `base_url` resolves relative links found on the hub page
    pub fn new(base_url: &str, downloads_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = Url::parse(base_url).with_context(|| format!("Invalid hub URL: {}", base_url))?;

        Ok(Self {
            client,
            base_url,
            downloads_dir: downloads_dir.into(),
        })
    }

    /// Download every link of every cohort, stopping after `max_downloads`
    /// successes (`None` or 0 means no limit). Failed links are logged and
    /// skipped.
    pub async fn download_cohort_files(
        &self,
        cohorts: &[Cohort],
        max_downloads: Option<usize>,
    ) -> Vec<PathBuf> {
        let max_downloads = max_downloads.filter(|&max| max > 0);
        let limit_reached = |count: usize| max_downloads.is_some_and(|max| count >= max);
        let mut downloaded = Vec::new();

        'cohorts: for cohort in cohorts {
            if limit_reached(downloaded.len()) {
                break;
            }
            info!("Processing cohort: {}", cohort.name);

            for link in &cohort.download_links {
                if limit_reached(downloaded.len()) {
                    break 'cohorts;
                }

                let result = match self.base_url.join(link) {
                    Ok(url) => self.download_file(&url, &cohort.name).await,
                    Err(e) => Err(e).with_context(|| format!("Invalid link {}", link)),
                };

                match result {
                    Ok(path) => downloaded.push(path),
                    Err(e) => error!("Error downloading {}: {:#}", link, e),
                }
            }
        }

        info!("Downloaded {} files", downloaded.len());
        downloaded
    }

    /// Stream one URL to `<downloads>/<sanitized cohort>/<file name>`
    pub async fn download_file(&self, url: &Url, cohort_name: &str) -> Result<PathBuf> {
        info!("Downloading: {}", url);

        let cohort_dir = self.downloads_dir.join(sanitize_filename(cohort_name));
        tokio::fs::create_dir_all(&cohort_dir)
            .await
            .with_context(|| format!("Failed to create {}", cohort_dir.display()))?;

        let target = cohort_dir.join(file_name_for(url));
        let partial = target.with_file_name(format!(
            "{}.part",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));

        if let Err(e) = self.stream_to(url, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &target).await?;
        info!("Downloaded: {}", target.display());
        Ok(target)
    }

    async fn stream_to(&self, url: &Url, path: &Path) -> Result<()> {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Unpack downloaded archives: zips next to themselves, gzip files into
    /// the shared uncompressed folder. Returns the files produced.
    pub async fn decompress_all(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        let mut produced = Vec::new();
        for file in files {
            match self.decompress(file).await {
                Ok(paths) => produced.extend(paths),
                Err(e) => error!("Error extracting {}: {:#}", file.display(), e),
            }
        }
        produced
    }

    async fn decompress(&self, file: &Path) -> Result<Vec<PathBuf>> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some(stem) = name.strip_suffix(".zip") {
            let target_dir = file.with_file_name(stem);
            let archive = file.to_path_buf();
            let extracted = {
                let target_dir = target_dir.clone();
                tokio::task::spawn_blocking(move || extract_zip(&archive, &target_dir)).await??
            };
            info!("Extracted: {} to {}", file.display(), target_dir.display());
            Ok(extracted)
        } else if let Some(stem) = name.strip_suffix(".gz") {
            let target = self.downloads_dir.join(UNCOMPRESSED_DIR).join(stem);
            let source = file.to_path_buf();
            {
                let target = target.clone();
                tokio::task::spawn_blocking(move || gunzip_file(&source, &target)).await??;
            }
            info!("Decompressed: {} to {}", file.display(), target.display());
            Ok(vec![target])
        } else {
            Ok(Vec::new())
        }
    }
}

/// Local file name for a download URL: the last path segment with encoded
/// slashes flattened, or a timestamped fallback
pub fn file_name_for(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
        .replace("%2F", "_")
        .replace("%2f", "_");

    if last.is_empty() {
        format!("download_{}.zip", chrono::Utc::now().timestamp())
    } else {
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, Bytes};
    use axum::{Router, routing::get};
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;
    use tempfile::TempDir;

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    /// Serve a couple of files on an ephemeral port and return its base URL
    async fn file_server() -> String {
        let app = Router::new()
            .route(
                "/files/BRCA_PANCAN.gz",
                get(|| async { gzip("sample\tS1\nCCL5\t1.0\n") }),
            )
            .route("/files/LUAD_PANCAN.gz", get(|| async { gzip("luad") }))
            .route(
                "/files/broken.gz",
                get(|| async {
                    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
                        Ok(Bytes::from_static(b"partial")),
                        Err(std::io::Error::other("connection dropped")),
                    ];
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/datapages/", addr)
    }

    fn cohort(name: &str, links: &[&str]) -> Cohort {
        Cohort {
            name: name.to_string(),
            download_links: links.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_file_name_for() {
        let url = Url::parse("https://host/download/TCGA.BRCA%2FHiSeqV2_PANCAN.gz").unwrap();
        assert_eq!(file_name_for(&url), "TCGA.BRCA_HiSeqV2_PANCAN.gz");

        let root = Url::parse("https://host/").unwrap();
        let fallback = file_name_for(&root);
        assert!(fallback.starts_with("download_") && fallback.ends_with(".zip"));
    }

    #[tokio::test]
    async fn test_download_and_decompress() {
        let base = file_server().await;
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(&base, dir.path()).unwrap();

        let cohorts = vec![cohort(
            "TCGA Breast Cancer (BRCA)",
            &["/files/BRCA_PANCAN.gz", "/files/missing.gz"],
        )];
        let files = downloader.download_cohort_files(&cohorts, None).await;

        let expected = dir
            .path()
            .join("TCGA_Breast_Cancer_(BRCA)")
            .join("BRCA_PANCAN.gz");
        assert_eq!(files, vec![expected.clone()]);
        assert!(!expected.with_file_name("BRCA_PANCAN.gz.part").exists());

        let produced = downloader.decompress_all(&files).await;
        let uncompressed = dir.path().join("uncompressed").join("BRCA_PANCAN");
        assert_eq!(produced, vec![uncompressed.clone()]);
        assert_eq!(
            std::fs::read_to_string(uncompressed).unwrap(),
            "sample\tS1\nCCL5\t1.0\n"
        );
    }

    #[tokio::test]
    async fn test_interrupted_download_leaves_no_part_file() {
        let base = file_server().await;
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(&base, dir.path()).unwrap();

        let url = Url::parse(&base).unwrap().join("/files/broken.gz").unwrap();
        assert!(downloader.download_file(&url, "BRCA").await.is_err());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("BRCA"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_max_downloads() {
        let base = file_server().await;
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(&base, dir.path()).unwrap();

        let cohorts = vec![
            cohort("BRCA", &["../files/BRCA_PANCAN.gz"]),
            cohort("LUAD", &["/files/LUAD_PANCAN.gz"]),
        ];
        let files = downloader.download_cohort_files(&cohorts, Some(1)).await;

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("BRCA/BRCA_PANCAN.gz"));
    }

    #[tokio::test]
    async fn test_zero_max_downloads_is_unlimited() {
        let base = file_server().await;
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(&base, dir.path()).unwrap();

        let cohorts = vec![
            cohort("BRCA", &["/files/BRCA_PANCAN.gz"]),
            cohort("LUAD", &["/files/LUAD_PANCAN.gz"]),
        ];
        let files = downloader.download_cohort_files(&cohorts, Some(0)).await;

        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_zip_extracts_next_to_archive() {
        use zip::write::SimpleFileOptions;

        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("BRCA").join("bundle.zip");
        std::fs::create_dir_all(archive.parent().unwrap()).unwrap();

        let mut writer = zip::ZipWriter::new(std::fs::File::create(&archive).unwrap());
        writer
            .start_file(
                "BRCA_PANCAN",
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored),
            )
            .unwrap();
        writer.write_all(b"matrix").unwrap();
        writer.finish().unwrap();

        let downloader = Downloader::new("http://localhost/", dir.path()).unwrap();
        let produced = downloader.decompress_all(&[archive]).await;

        let extracted = dir.path().join("BRCA").join("bundle").join("BRCA_PANCAN");
        assert_eq!(produced, vec![extracted.clone()]);
        assert_eq!(std::fs::read(extracted).unwrap(), b"matrix");
    }
}
