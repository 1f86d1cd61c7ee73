use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exclusive advisory lock held around lock-file commits.
pub struct LockFileGuard {
    lock_file: File,
}

impl LockFileGuard {
    pub fn acquire(guard_path: &Path) -> Result<Self, CoreError> {
        let file = open_guard(guard_path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(guard_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_guard(guard_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

fn open_guard(guard_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = guard_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(guard_path)?)
}

impl Drop for LockFileGuard {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Cooperative cancellation flag, checked between pass stages and phases.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), CoreError> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Cancel `token` on Ctrl-C. A second Ctrl-C exits immediately.
pub fn install_signal_handler(token: CancelToken) {
    let _ = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(1);
        }
        token.cancel();
        eprintln!("\ncancellation requested, abandoning the current pass...");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pallet.lock.guard");
        {
            let _guard = LockFileGuard::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(LockFileGuard::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pallet.lock.guard");
        let _guard = LockFileGuard::acquire(&path).unwrap();
        assert!(LockFileGuard::try_acquire(&path).unwrap().is_none());
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(CoreError::Cancelled)));
    }
}
