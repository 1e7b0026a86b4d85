pub mod downloader;
pub mod index;
pub mod key;
pub mod manager;

pub use downloader::{DownloadError, Downloader, FetchOutcome};
pub use index::{CacheEntry, CacheIndex};
pub use key::{Normalized, RewriteRules};
pub use manager::{CacheError, CacheManager, SyncReport};
