use crate::cache::CacheManager;
use crate::configs::Config;

/// Shared state behind every HTTP handler.
pub struct AppState {
    pub config: Config,
    pub cache: CacheManager,
}
