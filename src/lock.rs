//! Advisory file locks shared between affirmwall processes.
//!
//! A manual `generate` and the `run` daemon are separate processes working on the same
//! data directory. They coordinate through exclusive locks on sibling `.lock` files,
//! released when the [`FileLock`] is dropped.

use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::PipelineError;

/// An exclusive lock on a file, held until dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

async fn open_lock_file(path: &Path) -> Result<File, PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    Ok(file.into_std().await)
}

impl FileLock {
    /// Takes the lock if nobody holds it, `None` when another holder exists.
    pub async fn try_acquire(path: &Path) -> Result<Option<Self>, PipelineError> {
        let file = open_lock_file(path).await?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Locked {}", path.display());
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    _file: file,
                }))
            }
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Waits until the lock is free, then takes it.
    pub async fn acquire(path: &Path) -> Result<Self, PipelineError> {
        let file = open_lock_file(path).await?;
        let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|()| file))
            .await
            .map_err(|err| PipelineError::Store(format!("lock task failed: {err}")))??;
        debug!("Locked {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    /// The lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `<path>.lock`, next to the file it guards.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_os_string();
    lock.push(".lock");
    PathBuf::from(lock)
}
