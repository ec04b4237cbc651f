//! Directory-level bookkeeping: listing, media moves, usage, removal.

use std::io::ErrorKind;
use std::path::PathBuf;

use super::{JobListing, JobStore, MediaDir, STATE_FILE};
use crate::types::JobId;
use crate::{Error, Result};

impl JobStore {
    /// Enumerate job directories
    ///
    /// A directory counts as a job when it is named like a job id and holds a
    /// state record. The record is not parsed here, so a corrupt job is still
    /// listed and surfaces as [`StoreError::Corrupt`](crate::error::StoreError::Corrupt)
    /// when loaded. Directories without a record are returned as orphaned and
    /// left alone; they may belong to a job that is still being created.
    pub async fn list_job_ids(&self) -> Result<JobListing> {
        let mut listing = JobListing::default();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(listing),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();

            let id = entry.file_name().to_str().and_then(|name| name.parse::<JobId>().ok());
            let has_record = tokio::fs::try_exists(path.join(STATE_FILE))
                .await
                .unwrap_or(false);

            match id {
                Some(id) if has_record => {
                    listing.ids.insert(id);
                }
                _ => {
                    tracing::warn!(dir = %path.display(), "Job directory without a state record");
                    listing.orphaned.push(path);
                }
            }
        }

        listing.orphaned.sort();
        Ok(listing)
    }

    /// Move a file from the job's `media/` directory into `dest`
    ///
    /// Returns the new path, or `None` if the file was not in `media/`.
    pub async fn move_media(
        &self,
        id: &JobId,
        filename: &str,
        dest: MediaDir,
    ) -> Result<Option<PathBuf>> {
        let from = self.media_path(id, MediaDir::Media).join(filename);
        let to_dir = self.media_path(id, dest);
        let to = to_dir.join(filename);

        if from == to {
            return Ok(Some(to));
        }

        tokio::fs::create_dir_all(&to_dir).await?;
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => Ok(Some(to)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes of every file under the jobs directory
    pub async fn storage_usage(&self) -> Result<u64> {
        let root = self.root.clone();

        tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| entry.metadata().ok())
                .map(|meta| meta.len())
                .sum()
        })
        .await
        .map_err(|e| Error::Other(format!("storage scan task panicked: {e}")))
    }

    /// Delete a job directory and forget its cached record
    pub async fn remove_job_dir(&self, id: &JobId) -> Result<()> {
        match tokio::fs::remove_dir_all(self.job_dir(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.evict(id).await;
        Ok(())
    }
}
