use crate::cache::{BlobCache, CacheError, EmptyKeyErr};
use crate::driver::ProgramBinary;
use crate::program::CacheKey;
use dashmap::DashMap;
use snafu::ensure;
use tracing::trace;

/// Process-lifetime cache backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryBlobCache {
    data: DashMap<CacheKey, ProgramBinary>,
}

impl MemoryBlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.data.contains_key(key)
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl BlobCache for MemoryBlobCache {
    fn get(&self, key: &CacheKey) -> Option<ProgramBinary> {
        if key.is_empty() {
            return None;
        }
        self.data.get(key).map(|binary| binary.clone())
    }

    fn put(&self, key: &CacheKey, binary: &ProgramBinary) -> Result<(), CacheError> {
        ensure!(!key.is_empty(), EmptyKeyErr);

        trace!("[Blob Cache] Stored {} bytes for {key}", binary.len());
        self.data.insert(key.clone(), binary.clone());

        Ok(())
    }
}
