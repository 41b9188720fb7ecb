mod description;
mod key;
mod specialization;

pub use self::description::*;
pub use self::key::CacheKey;
pub use self::specialization::specialize;
