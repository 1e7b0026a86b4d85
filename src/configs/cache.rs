use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Directory holding the mirrored media files and the index file.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Per-download completion deadline in milliseconds.
    #[serde(default = "default_download_timeout_ms")]
    pub download_timeout_ms: u64,
    /// Maximum redirect hops a single download may follow.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Hosts whose streaming-manifest URLs can be rewritten to a
    /// progressive-download rendition.
    #[serde(default = "default_provider_hosts")]
    pub provider_hosts: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            download_timeout_ms: default_download_timeout_ms(),
            max_redirects: default_max_redirects(),
            provider_hosts: default_provider_hosts(),
        }
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("cache")
}

fn default_download_timeout_ms() -> u64 {
    30_000
}

fn default_max_redirects() -> usize {
    5
}

fn default_provider_hosts() -> Vec<String> {
    vec!["stream.worshipmedia.net".to_string()]
}
