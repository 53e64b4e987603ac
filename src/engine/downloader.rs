//! Model downloader.
//!
//! Fetches the ONNX model on first run when it is not present locally.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Result, TranscribeError};

/// Downloads the model to `model_path` unless it already exists.
pub fn ensure_model(model_path: &Path, url: &str) -> Result<()> {
    if model_path.exists() {
        info!("Model present at {}", model_path.display());
        return Ok(());
    }

    if let Some(parent) = model_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                TranscribeError::model_download_failed(format!(
                    "Failed to create model directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    info!("Model not found, downloading (first run only)");
    let partial = partial_path(model_path);
    if let Err(e) = download_file_streaming(url, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    fs::rename(&partial, model_path).map_err(|e| {
        TranscribeError::model_download_failed(format!(
            "Failed to move {} into place: {}",
            partial.display(),
            e
        ))
    })?;

    match model_fingerprint(model_path) {
        Ok(digest) => info!("Model saved to {} (sha256 {})", model_path.display(), digest),
        Err(e) => warn!("Could not fingerprint model: {}", e),
    }
    Ok(())
}

/// Returns the hex SHA-256 digest of a file.
pub fn model_fingerprint(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| TranscribeError::io(format!("Failed to open {}", path.display()), e))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| TranscribeError::io(format!("Failed to read {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn partial_path(model_path: &Path) -> PathBuf {
    let mut name = model_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    model_path.with_file_name(name)
}

/// Downloads a file using streaming to handle large files.
fn download_file_streaming(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(600))
        .build()
        .map_err(|e| {
            TranscribeError::model_download_failed(format!("Failed to create HTTP client: {}", e))
        })?;

    let mut response = client.get(url).send().map_err(|e| {
        TranscribeError::model_download_failed(format!("Failed to download {}: {}", url, e))
    })?;

    if !response.status().is_success() {
        return Err(TranscribeError::model_download_failed(format!(
            "HTTP {} for {}",
            response.status(),
            url
        )));
    }

    let total_size = response.content_length().unwrap_or(0);

    let mut file = fs::File::create(dest).map_err(|e| {
        TranscribeError::model_download_failed(format!(
            "Failed to create file {}: {}",
            dest.display(),
            e
        ))
    })?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 65536];
    let mut last_progress = 0;

    loop {
        let bytes_read = response.read(&mut buffer).map_err(|e| {
            TranscribeError::model_download_failed(format!("Failed to read response: {}", e))
        })?;

        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read]).map_err(|e| {
            TranscribeError::model_download_failed(format!("Failed to write file: {}", e))
        })?;

        downloaded += bytes_read as u64;

        if total_size > 0 {
            let progress = (downloaded * 100 / total_size) as usize;
            if progress >= last_progress + 25 {
                info!("Downloading model... {}%", progress);
                last_progress = progress;
            }
        }
    }

    if downloaded == 0 {
        return Err(TranscribeError::model_download_failed(format!(
            "Empty response from {}",
            url
        )));
    }

    info!("Downloaded {:.1} MB", downloaded as f64 / (1024.0 * 1024.0));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::tempdir;

    #[test]
    fn existing_model_is_not_downloaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nmp.onnx");
        fs::write(&path, b"model").unwrap();

        // An unroutable URL proves no request is made.
        ensure_model(&path, "http://127.0.0.1:9/nmp.onnx").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"model");
    }

    #[test]
    fn failed_download_leaves_no_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models").join("nmp.onnx");

        let err = ensure_model(&path, "http://127.0.0.1:9/nmp.onnx").unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelDownloadFailed);
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            model_fingerprint(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/m/nmp.onnx")),
            PathBuf::from("/m/nmp.onnx.part")
        );
    }
}
