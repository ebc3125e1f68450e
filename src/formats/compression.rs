//! Gzip and zip handling for downloaded and uploaded files

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Decode an object payload to text, gunzipping first when it carries the
/// gzip magic number
pub fn decode_text(data: &[u8]) -> Result<String> {
    if is_gzip(data) {
        let mut text = String::new();
        MultiGzDecoder::new(data)
            .read_to_string(&mut text)
            .context("Failed to decompress gzip payload")?;
        Ok(text)
    } else {
        String::from_utf8(data.to_vec()).context("Payload is not valid UTF-8")
    }
}

/// Gunzip `source` into `target`, creating parent directories as needed
pub fn gunzip_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let input = File::open(source).with_context(|| format!("Failed to open {}", source.display()))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut output = BufWriter::new(
        File::create(target).with_context(|| format!("Failed to create {}", target.display()))?,
    );

    std::io::copy(&mut decoder, &mut output)
        .with_context(|| format!("Failed to decompress {}", source.display()))?;
    Ok(())
}

/// Extract a zip archive into `target_dir` and return the extracted file paths
pub fn extract_zip(archive_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).context("Invalid zip archive")?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_file()
            && let Some(name) = entry.enclosed_name()
        {
            extracted.push(target_dir.join(name));
        }
    }

    archive
        .extract(target_dir)
        .with_context(|| format!("Failed to extract {}", archive_path.display()))?;

    Ok(extracted)
}
