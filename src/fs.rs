//! Filesystem access, indirected as a trait so tests can substitute an
//! in-memory implementation.

use std::path::Path;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    /// Last write time in seconds since the Unix epoch.
    Stamp(u64),
}

pub trait FileSystem {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>>;
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &str) -> std::io::Result<MTime>;
    fn is_directory(&self, path: &str) -> bool;
    /// Create a directory and any missing parents.
    fn mkdir(&self, path: &str) -> std::io::Result<()>;
    /// Remove a file; removing a missing file is not an error.
    fn remove(&self, path: &str) -> std::io::Result<()>;
    fn copy(&self, from: &str, to: &str) -> std::io::Result<()>;

    fn exists(&self, path: &str) -> bool {
        matches!(self.stat(path), Ok(MTime::Stamp(_)))
    }
}

#[derive(Default)]
pub struct RealFileSystem {}
impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

fn mtime_from_metadata(meta: &std::fs::Metadata) -> std::io::Result<u64> {
    let modified = meta.modified()?;
    Ok(match modified.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        // Pre-epoch timestamps collapse to the earliest representable time.
        Err(_) => 0,
    })
}

impl FileSystem for RealFileSystem {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        Ok(match std::fs::metadata(path) {
            Ok(meta) => MTime::Stamp(mtime_from_metadata(&meta)?),
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    MTime::Missing
                } else {
                    return Err(err);
                }
            }
        })
    }

    fn is_directory(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }

    fn mkdir(&self, path: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove(&self, path: &str) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            r => r,
        }
    }

    fn copy(&self, from: &str, to: &str) -> std::io::Result<()> {
        std::fs::copy(from, to).map(|_| ())
    }
}
