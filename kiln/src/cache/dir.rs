use crate::cache::{BlobCache, CacheError, EmptyKeyErr, IoErr};
use crate::driver::ProgramBinary;
use crate::program::CacheKey;
use snafu::{ResultExt, ensure};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

const BLOB_EXTENSION: &str = "bin";

/// Persistent cache storing one file per key inside a directory.
///
/// Files are written to a temporary name first and renamed into place, so a concurrent reader
/// never observes a half written blob.
#[derive(Debug)]
pub struct DirBlobCache {
    root: PathBuf,
    next_tmp: AtomicU64,
}

impl DirBlobCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context(IoErr { path: root.clone() })?;

        Ok(Self {
            root,
            next_tmp: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{BLOB_EXTENSION}", key.to_hex()))
    }

    fn tmp_path(&self, key: &CacheKey) -> PathBuf {
        let n = self.next_tmp.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!("{}.{}-{n}.tmp", key.to_hex(), std::process::id()))
    }
}

impl BlobCache for DirBlobCache {
    fn get(&self, key: &CacheKey) -> Option<ProgramBinary> {
        if key.is_empty() {
            return None;
        }

        let path = self.blob_path(key);
        match fs::read(&path) {
            Ok(bytes) => Some(ProgramBinary::new(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("[Blob Cache] Failed to read {}: {e}", path.display());
                None
            }
        }
    }

    fn put(&self, key: &CacheKey, binary: &ProgramBinary) -> Result<(), CacheError> {
        ensure!(!key.is_empty(), EmptyKeyErr);

        let tmp = self.tmp_path(key);
        let path = self.blob_path(key);

        fs::write(&tmp, binary.as_bytes()).context(IoErr { path: tmp.clone() })?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e).context(IoErr { path });
        }

        trace!("[Blob Cache] Wrote {} bytes to {}", binary.len(), path.display());

        Ok(())
    }
}
