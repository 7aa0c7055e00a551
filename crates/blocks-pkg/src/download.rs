//! Package downloads and content checksums.

use crate::source::SourceError;
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Stream `url` into `out`.
///
/// `file://` URLs are copied from disk, which lets local package mirrors
/// stand in for the remote store.
pub(crate) async fn download_to(
    client: &reqwest::Client,
    url: &str,
    out: &mut tokio::fs::File,
) -> Result<(), SourceError> {
    let parsed = Url::parse(url).map_err(|e| SourceError::Network(format!("invalid URL '{url}': {e}")))?;

    if parsed.scheme() == "file" {
        let path = parsed
            .to_file_path()
            .map_err(|()| SourceError::Network(format!("invalid file URL '{url}'")))?;
        copy_local(&path, url, out).await?;
    } else {
        debug!(url, "downloading");
        let mut response = client
            .get(parsed)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound {
                name: url.to_string(),
                location: "the package store".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(SourceError::Network(format!(
                "download of {url} failed with status {}",
                response.status()
            )));
        }

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?
        {
            out.write_all(&chunk).await?;
        }
    }

    out.flush().await?;
    out.sync_all().await?;
    Ok(())
}

async fn copy_local(path: &Path, url: &str, out: &mut tokio::fs::File) -> Result<(), SourceError> {
    debug!(path = %path.display(), "copying local package");
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SourceError::NotFound {
                name: url.to_string(),
                location: "the package store".to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    tokio::io::copy(&mut file, out).await?;
    Ok(())
}

/// SHA-256 of `data`, lower-case hex.
#[must_use]
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 of a file's contents, lower-case hex.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn checksum_file(path: &Path) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok::<_, io::Error>(hex::encode(hasher.finalize()))
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn checksum_of_bytes() {
        assert_eq!(checksum(b"hello"), HELLO_SHA256);
    }

    #[tokio::test]
    async fn checksum_of_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hello.txt");
        std::fs::write(&path, "hello").unwrap();
        assert_eq!(checksum_file(&path).await.unwrap(), HELLO_SHA256);
    }

    #[tokio::test]
    async fn download_file_url() {
        let tmp = TempDir::new().unwrap();
        let remote = tmp.path().join("remote.block");
        std::fs::write(&remote, "package bytes").unwrap();
        let url = Url::from_file_path(&remote).unwrap();

        let target = tmp.path().join("downloaded");
        let mut out = tokio::fs::File::create(&target).await.unwrap();
        download_to(&reqwest::Client::new(), url.as_str(), &mut out)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "package bytes");
    }

    #[tokio::test]
    async fn download_missing_file_url_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let url = Url::from_file_path(tmp.path().join("missing.block")).unwrap();
        let mut out = tokio::fs::File::create(tmp.path().join("out")).await.unwrap();

        let err = download_to(&reqwest::Client::new(), url.as_str(), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }
}
