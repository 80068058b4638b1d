//! The filesystem-operations collaborator (§6).
//!
//! The core does not prescribe the semantics of these calls, only which
//! locks `AdapterBridge` holds while invoking them. `LocalOps` is the one
//! concrete implementation this crate ships, a direct pass-through to a
//! real directory tree, purely so the binary in `main.rs` has something
//! to mount; it is explicitly out of scope per §1 ("the concrete
//! implementations of individual FUSE upcalls ... are external
//! collaborators").

use std::fs;
use std::path::{Path as StdPath, PathBuf};
use std::time::SystemTime;

use crate::error::OpsError;
use crate::path::CanonPath;

/// A directory entry as seen by `readdir`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Attributes as seen by `getattr`/`lookup`.
#[derive(Debug, Clone)]
pub struct Attr {
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
}

/// The external filesystem-operations object (§6).
pub trait FilesystemOps: Send + Sync {
    fn lookup(&self, path: &CanonPath) -> Result<Attr, OpsError>;
    fn getattr(&self, path: &CanonPath) -> Result<Attr, OpsError>;
    fn open(&self, path: &CanonPath) -> Result<(), OpsError>;
    fn release(&self, path: &CanonPath);
    fn read(&self, path: &CanonPath, offset: u64, size: u32) -> Result<Vec<u8>, OpsError>;
    fn write(&self, path: &CanonPath, offset: u64, data: &[u8]) -> Result<u32, OpsError>;
    fn truncate(&self, path: &CanonPath, size: u64) -> Result<(), OpsError>;
    fn readdir(&self, path: &CanonPath) -> Result<Vec<DirEntry>, OpsError>;
    fn create(&self, path: &CanonPath) -> Result<Attr, OpsError>;
    fn mkdir(&self, path: &CanonPath) -> Result<Attr, OpsError>;
    fn unlink(&self, path: &CanonPath) -> Result<(), OpsError>;
    fn rmdir(&self, path: &CanonPath) -> Result<(), OpsError>;
    fn rename(&self, src: &CanonPath, dst: &CanonPath) -> Result<(), OpsError>;
    fn fsync(&self, path: &CanonPath) -> Result<(), OpsError>;
    fn statfs(&self) -> Result<(u64, u64), OpsError>;

    /// §4.5: whether the backend considers itself in use (open handles,
    /// pending operations), consulted by graceful `unmount()`.
    fn is_in_use(&self) -> bool;

    /// §6: release any resources this collaborator owns. Called once,
    /// during final mount teardown.
    fn close(&self);
}

/// A pass-through `FilesystemOps` over a real directory on the host,
/// rooted at `root`. This is the "opaque root path provided by a host
/// program" the adapter exposes (§1): here, trivially, another real
/// directory, so the binary is runnable without a bespoke backing store.
pub struct LocalOps {
    root: PathBuf,
    open_count: std::sync::atomic::AtomicU64,
}

impl LocalOps {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), open_count: std::sync::atomic::AtomicU64::new(0) }
    }

    fn resolve(&self, path: &CanonPath) -> PathBuf {
        let mut full = self.root.clone();
        for component in path.components() {
            full.push(component);
        }
        full
    }

    fn attr_for(path: &StdPath) -> Result<Attr, OpsError> {
        let meta = fs::metadata(path)?;
        Ok(Attr {
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }
}

impl FilesystemOps for LocalOps {
    fn lookup(&self, path: &CanonPath) -> Result<Attr, OpsError> {
        self.getattr(path)
    }

    fn getattr(&self, path: &CanonPath) -> Result<Attr, OpsError> {
        let full = self.resolve(path);
        if !full.exists() {
            return Err(OpsError::NotFound(path.to_string()));
        }
        Self::attr_for(&full)
    }

    fn open(&self, path: &CanonPath) -> Result<(), OpsError> {
        let full = self.resolve(path);
        if !full.exists() {
            return Err(OpsError::NotFound(path.to_string()));
        }
        self.open_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, _path: &CanonPath) {
        self.open_count.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn read(&self, path: &CanonPath, offset: u64, size: u32) -> Result<Vec<u8>, OpsError> {
        use std::io::{Read, Seek, SeekFrom};
        let full = self.resolve(path);
        let mut file = fs::File::open(&full)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&self, path: &CanonPath, offset: u64, data: &[u8]) -> Result<u32, OpsError> {
        use std::io::{Seek, SeekFrom, Write};
        let full = self.resolve(path);
        let mut file = fs::OpenOptions::new().write(true).create(true).open(&full)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len() as u32)
    }

    fn truncate(&self, path: &CanonPath, size: u64) -> Result<(), OpsError> {
        let full = self.resolve(path);
        let file = fs::OpenOptions::new().write(true).open(&full)?;
        file.set_len(size)?;
        Ok(())
    }

    fn readdir(&self, path: &CanonPath) -> Result<Vec<DirEntry>, OpsError> {
        let full = self.resolve(path);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        Ok(entries)
    }

    fn create(&self, path: &CanonPath) -> Result<Attr, OpsError> {
        let full = self.resolve(path);
        fs::OpenOptions::new().write(true).create_new(true).open(&full)?;
        Self::attr_for(&full)
    }

    fn mkdir(&self, path: &CanonPath) -> Result<Attr, OpsError> {
        let full = self.resolve(path);
        fs::create_dir(&full)?;
        Self::attr_for(&full)
    }

    fn unlink(&self, path: &CanonPath) -> Result<(), OpsError> {
        let full = self.resolve(path);
        fs::remove_file(&full)?;
        Ok(())
    }

    fn rmdir(&self, path: &CanonPath) -> Result<(), OpsError> {
        let full = self.resolve(path);
        fs::remove_dir(&full)?;
        Ok(())
    }

    fn rename(&self, src: &CanonPath, dst: &CanonPath) -> Result<(), OpsError> {
        fs::rename(self.resolve(src), self.resolve(dst))?;
        Ok(())
    }

    fn fsync(&self, path: &CanonPath) -> Result<(), OpsError> {
        let full = self.resolve(path);
        fs::File::open(&full)?.sync_all()?;
        Ok(())
    }

    fn statfs(&self) -> Result<(u64, u64), OpsError> {
        // No portable stdlib statfs; report a generous fixed size rather
        // than fabricate platform-specific syscalls this crate's core
        // does not otherwise need.
        Ok((1 << 40, 1 << 39))
    }

    fn is_in_use(&self) -> bool {
        self.open_count.load(std::sync::atomic::Ordering::SeqCst) > 0
    }

    fn close(&self) {}
}
