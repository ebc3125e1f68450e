use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use url::Url;

use super::object_store::ObjectStore;
use super::s3_store::S3ObjectStore;

/// Where a static input table (e.g. the survival TSV) lives
#[derive(Debug, Clone)]
pub enum SourceUri {
    Local(PathBuf),
    S3 { bucket: String, key: String },
}

impl SourceUri {
    /// Parse a URI string into a SourceUri
    pub fn parse(uri: &str) -> Result<Self> {
        // Try parsing as URL first
        if let Ok(url) = Url::parse(uri) {
            match url.scheme() {
                "s3" => {
                    let bucket = url
                        .host_str()
                        .filter(|host| !host.is_empty())
                        .ok_or_else(|| anyhow!("S3 URI missing bucket: {}", uri))?
                        .to_string();

                    // Remove leading '/' from path
                    let key = url.path().trim_start_matches('/').to_string();

                    if key.is_empty() {
                        return Err(anyhow!("S3 URI missing key: {}", uri));
                    }

                    Ok(SourceUri::S3 { bucket, key })
                }
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| anyhow!("Invalid file:// URI: {}", uri))?;
                    Ok(SourceUri::Local(path))
                }
                // Windows drive letters parse as a one-letter scheme
                scheme if scheme.len() == 1 => Ok(SourceUri::Local(PathBuf::from(uri))),
                scheme => Err(anyhow!("Unsupported URI scheme: {}", scheme)),
            }
        } else {
            // Treat as local file path
            Ok(SourceUri::Local(PathBuf::from(uri)))
        }
    }

    /// Read the whole source into memory. S3 sources reuse the client of
    /// `s3`, pointed at the URI's bucket.
    pub async fn read_all(&self, s3: Option<&S3ObjectStore>) -> Result<Vec<u8>> {
        match self {
            SourceUri::Local(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display())),
            SourceUri::S3 { bucket, key } => {
                let store = s3
                    .ok_or_else(|| anyhow!("S3 source requires object store settings"))?
                    .with_bucket(bucket.clone());
                store.get_object(key).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_uri() {
        let uri = SourceUri::parse("s3://my-bucket/resources/survival.tsv").unwrap();
        match uri {
            SourceUri::S3 { bucket, key } => {
                assert_eq!(bucket, "my-bucket");
                assert_eq!(key, "resources/survival.tsv");
            }
            _ => panic!("Expected S3 URI"),
        }
    }

    #[test]
    fn test_parse_s3_uri_simple() {
        let uri = SourceUri::parse("s3://bucket/survival.tsv").unwrap();
        match uri {
            SourceUri::S3 { bucket, key } => {
                assert_eq!(bucket, "bucket");
                assert_eq!(key, "survival.tsv");
            }
            _ => panic!("Expected S3 URI"),
        }
    }

    #[test]
    fn test_parse_local_path() {
        let uri = SourceUri::parse("/data/survival.tsv").unwrap();
        assert!(matches!(uri, SourceUri::Local(_)));
    }

    #[test]
    fn test_parse_relative_path() {
        let uri = SourceUri::parse("data/survival.tsv").unwrap();
        assert!(matches!(uri, SourceUri::Local(_)));
    }

    #[test]
    fn test_parse_file_uri() {
        let uri = SourceUri::parse("file:///data/survival.tsv").unwrap();
        assert!(matches!(uri, SourceUri::Local(_)));
    }

    #[test]
    fn test_parse_s3_missing_bucket() {
        let result = SourceUri::parse("s3:///survival.tsv");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_s3_missing_key() {
        let result = SourceUri::parse("s3://bucket/");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_unsupported_scheme() {
        assert!(SourceUri::parse("ftp://host/file.tsv").is_err());
    }

    #[tokio::test]
    async fn test_read_local_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"bcr_patient_barcode\tOS\n").unwrap();

        let uri = SourceUri::parse(file.path().to_str().unwrap()).unwrap();
        let data = uri.read_all(None).await.unwrap();
        assert_eq!(data, b"bcr_patient_barcode\tOS\n");
    }

    #[tokio::test]
    async fn test_read_s3_source_without_settings() {
        let uri = SourceUri::parse("s3://bucket/survival.tsv").unwrap();
        assert!(uri.read_all(None).await.is_err());
    }

    #[test]
    fn test_is_s3() {
        let s3_uri = SourceUri::parse("s3://bucket/key").unwrap();
        assert!(matches!(s3_uri, SourceUri::S3 { bucket: _, key: _ }));

        let local_uri = SourceUri::parse("/data/survival.tsv").unwrap();
        assert!(matches!(local_uri, SourceUri::Local(_)));
    }
}
