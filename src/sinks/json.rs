//! On-disk JSON archive of assembled digests.
//!
//! # Output Structure
//!
//! Files are organized by digest date:
//! ```text
//! archive_dir/
//! ├── 2025-05-06/
//! │   └── digest.json
//! └── 2025-05-07/
//!     └── digest.json
//! ```
//!
//! A second run on the same date overwrites that date's file.

use crate::error::SinkError;
use crate::models::Digest;
use crate::utils::ensure_writable_dir;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

#[derive(Debug, Clone)]
pub struct JsonArchiveSink {
    dir: PathBuf,
}

impl JsonArchiveSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        "json_archive"
    }

    /// Write a [`Digest`] to a JSON file under a per-day directory.
    ///
    /// Creates the day directory if needed and probes that it is writable
    /// before serializing the digest as pretty-printed JSON. A second run on
    /// the same day overwrites the earlier file.
    ///
    /// # Arguments
    ///
    /// * `digest` - The assembled digest to archive
    ///
    /// # Returns
    ///
    /// The path written, or a [`SinkError`] if serialization, directory
    /// creation or the file write fails.
    ///
    /// # Output Path
    ///
    /// `{dir}/{date}/digest.json`, where `date` is the digest's local date.
    #[instrument(level = "info", skip_all, fields(dir = %self.dir.display(), date = %digest.date))]
    pub async fn write_digest(&self, digest: &Digest) -> Result<PathBuf, SinkError> {
        let json = serde_json::to_string_pretty(digest)?;

        let date_dir = self.dir.join(&digest.date);
        if let Err(e) = ensure_writable_dir(&date_dir).await {
            error!(path = %date_dir.display(), error = %e, "Archive directory is not writable");
            return Err(e.into());
        }

        let path = date_dir.join("digest.json");
        fs::write(&path, json).await?;
        info!(path = %path.display(), "Wrote digest archive");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestAssembler;
    use crate::test_support::article;
    use chrono::{TimeZone, Utc};

    fn digest() -> Digest {
        DigestAssembler::default().assemble(
            Some("Big day".to_string()),
            None,
            None,
            vec![article("Lab ships a new model", "https://x.com/1", "S")],
            1,
            Utc.with_ymd_and_hms(2025, 5, 6, 9, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_writes_dated_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = JsonArchiveSink::new(tmp.path().join("archive"));

        let path = sink.write_digest(&digest()).await.unwrap();
        assert_eq!(path, tmp.path().join("archive/2025-05-06/digest.json"));

        let back: Digest =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, digest());
    }

    #[tokio::test]
    async fn test_same_date_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = JsonArchiveSink::new(tmp.path());
        sink.write_digest(&digest()).await.unwrap();

        let mut second = digest();
        second.summary = "Second run".to_string();
        let path = sink.write_digest(&second).await.unwrap();

        let back: Digest =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.summary, "Second run");
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let sink = JsonArchiveSink::new(&blocker);
        let err = sink.write_digest(&digest()).await.unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
