//! Ephemeral key/value caching with per-entry time-to-live.

mod entry;
mod stats;
mod store;

pub use entry::CacheEntry;
pub use stats::{CacheStats, StatsSnapshot};
pub use store::TtlCache;
