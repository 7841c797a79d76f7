//! Collaborator contracts consumed by the gulping core: the remote data
//! source that serves windows of samples, and the cache that receives them.

pub mod cache;
pub mod data_source;

pub use cache::{Cache, CacheSummary, MemoryCache};
pub use data_source::{DataSource, SourceError};
