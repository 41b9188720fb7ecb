//! Content-addressed stores for linked program binaries.
//!
//! The compiler only ever calls [`BlobCache::get`] before scheduling a compile and
//! [`BlobCache::put`] after a program resolved. Both are best effort: a failing store never makes
//! a program unusable.

mod dir;
mod memory;

pub use self::dir::DirBlobCache;
pub use self::memory::MemoryBlobCache;

use crate::driver::ProgramBinary;
use crate::program::CacheKey;
use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)), visibility(pub(crate)))]
pub enum CacheError {
    #[snafu(display("Blob cache I/O failed for {}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("The empty cache key can't be stored"))]
    EmptyKey,
}

pub trait BlobCache: Send + Sync {
    /// Always misses for [`CacheKey::EMPTY`].
    fn get(&self, key: &CacheKey) -> Option<ProgramBinary>;
    fn put(&self, key: &CacheKey, binary: &ProgramBinary) -> Result<(), CacheError>;
}
