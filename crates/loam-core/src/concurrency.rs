use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exclusive advisory lock on a store directory, held by one loam process
/// at a time and released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

fn open_lock_file(path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?)
}

impl StoreLock {
    /// Block until the lock at `path` is ours.
    pub fn acquire(path: &Path) -> Result<Self, CoreError> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        debug!("acquired store lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock if nobody holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(path)?;
        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Cancel `token` on the first Ctrl-C. A second Ctrl-C exits immediately.
pub fn install_signal_handler(token: CancellationToken) {
    let _ = ctrlc::set_handler(move || {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(1);
        }
        eprintln!("\ninterrupted, cancelling running reconciles (press Ctrl-C again to exit)");
        token.cancel();
    });
}
