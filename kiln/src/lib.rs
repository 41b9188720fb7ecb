//! Asynchronous GPU program compilation and caching.
//!
//! A [`ProgramCompiler`] turns a [`ProgramDescription`] into a linked program handle. Work runs
//! either on a small pool of worker threads or, when no pool is configured, cooperatively on the
//! caller's thread through [`ProgramCompiler::tick`]. Linked programs are cached in a pluggable
//! [`BlobCache`](cache::BlobCache) keyed by [`CacheKey`], and compile or link failures are only
//! looked at once a caller actually consumes the result.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod cache;
pub mod compiler;
pub mod driver;
pub mod program;

pub use compiler::*;
pub use program::*;

pub use ::naga;
pub use ::tracing;
