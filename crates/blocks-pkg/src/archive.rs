//! Package tarball extraction.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extract a package tarball (gzip-compressed or plain) into `dest`.
///
/// Files are unpacked into a temporary sibling of `dest` which is then
/// renamed into place, so `dest` either does not exist or holds the whole
/// package. If another extraction wins the rename, its result is kept.
///
/// # Errors
///
/// Returns an error if the tarball cannot be read or unpacked.
pub async fn extract(tarball: &Path, dest: &Path) -> io::Result<()> {
    let tarball = tarball.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&tarball, &dest)).await?
}

fn extract_blocking(tarball: &Path, dest: &Path) -> io::Result<()> {
    let (_staging, staging_path) = staging_dir(dest, ".extract-")?;
    unpack(tarball, &staging_path)?;

    match fs::rename(&staging_path, dest) {
        Ok(()) => {
            debug!(dest = %dest.display(), "extracted package");
            Ok(())
        }
        Err(_) if dest.is_dir() => {
            debug!(dest = %dest.display(), "package already extracted");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn unpack(tarball: &Path, dir: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(tarball)?);
    let compressed = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

    let reader: Box<dyn Read> = if compressed {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };
    tar::Archive::new(reader).unpack(dir)
}

/// Create a temporary directory next to `dest`, on the same filesystem, so
/// a finished tree can be renamed into place. The directory is removed when
/// the returned guard drops, unless it was renamed away.
pub(crate) fn staging_dir(dest: &Path, prefix: &str) -> io::Result<(tempfile::TempDir, PathBuf)> {
    let parent = dest.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", dest.display()),
        )
    })?;
    fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
    let path = staging.path().to_path_buf();
    Ok((staging, path))
}
