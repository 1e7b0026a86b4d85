use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::downloader::{DownloadError, Downloader, FetchOutcome};
use crate::cache::index::{CacheEntry, CacheIndex};
use crate::cache::key::{Normalized, RewriteRules};
use crate::common::types::now_millis;
use crate::configs::CacheConfig;

/// Scheme of the virtual playback address handed to the player.
pub const MEDIA_SCHEME: &str = "stagecache";

const INDEX_FILE: &str = "index.json";
const DEFAULT_EXTENSION: &str = "mp4";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome of one `sync` pass over the current usage set.
#[derive(Debug, Default, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub downloaded: usize,
    pub evicted: usize,
}

/// Orchestrates URL normalization, downloads and the persisted index.
///
/// The index is behind a mutex because handlers run on a multi-threaded
/// runtime; two concurrent downloads for the same key are tolerated (the
/// second write overwrites with an equally valid entry), the mutex only
/// keeps the table and its file consistent.
pub struct CacheManager {
    cache_dir: PathBuf,
    rules: RewriteRules,
    downloader: Downloader,
    download_timeout: Duration,
    index: Mutex<CacheIndex>,
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&config.directory)?;

        let index = CacheIndex::load(config.directory.join(INDEX_FILE));
        info!(
            "Media cache at {} ({} entries)",
            config.directory.display(),
            index.len()
        );

        Ok(Self {
            cache_dir: config.directory.clone(),
            rules: RewriteRules::new(&config.provider_hosts),
            downloader: Downloader::new(config.max_redirects).map_err(DownloadError::Http)?,
            download_timeout: Duration::from_millis(config.download_timeout_ms),
            index: Mutex::new(index),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Derive the canonical cache key and fetch URL for a caller-supplied
    /// URL. `None` means the URL is simply not cacheable.
    pub fn normalize(&self, url: &str) -> Option<Normalized> {
        self.rules.normalize(url)
    }

    /// Make sure a URL is mirrored locally, downloading it if needed.
    ///
    /// `Ok(None)` covers the two expected non-outcomes: the URL is not
    /// cacheable, or upstream has no copy yet (404). Genuine failures are
    /// returned to the caller, which may retry or fall back to streaming
    /// the original URL.
    pub async fn ensure_cached(&self, url: &str) -> Result<Option<PathBuf>, CacheError> {
        let Some(norm) = self.rules.normalize(url) else {
            debug!("Not cacheable: {}", url);
            return Ok(None);
        };

        if let Some(path) = self.fresh_entry_path(&norm.cache_key) {
            return Ok(Some(path));
        }

        let dest = self.cache_dir.join(Self::file_name_for(&norm));
        match self
            .downloader
            .fetch(&norm.fetch_url, &dest, self.download_timeout)
            .await?
        {
            FetchOutcome::Missing => Ok(None),
            FetchOutcome::Complete => {
                self.index
                    .lock()
                    .put(CacheEntry::new(norm.cache_key, dest.clone()))?;
                Ok(Some(dest))
            }
        }
    }

    /// Index-only availability check; never triggers a download.
    pub fn lookup(&self, url: &str) -> Option<PathBuf> {
        let norm = self.rules.normalize(url)?;
        self.fresh_entry_path(&norm.cache_key)
    }

    /// Return the entry's path when it exists both in the index and on
    /// disk, touching `lastUsed`. A stale entry (file gone) is a miss.
    /// `lastUsed` is observability-only, so a failed persist of the touch
    /// is logged and the hit still counts.
    fn fresh_entry_path(&self, key: &str) -> Option<PathBuf> {
        let mut index = self.index.lock();

        let entry = index.get(key)?;

        if !entry.local_path.exists() {
            debug!("Stale index entry for {}, file is gone", key);
            return None;
        }

        let mut touched = entry.clone();
        touched.last_used = now_millis();
        let path = touched.local_path.clone();
        if let Err(e) = index.put(touched) {
            warn!("Failed to persist lastUsed for {}: {}", key, e);
        }

        Some(path)
    }

    /// Drop every entry whose key is not in `used_keys`, deleting the
    /// backing file best-effort. Returns the number of entries removed.
    pub fn evict_unused(&self, used_keys: &HashSet<String>) -> usize {
        let mut index = self.index.lock();

        let stale: Vec<String> = index
            .keys()
            .into_iter()
            .filter(|k| !used_keys.contains(k))
            .collect();

        let mut removed = 0;
        for key in stale {
            match index.delete(&key) {
                Ok(Some(entry)) => {
                    if let Err(e) = std::fs::remove_file(&entry.local_path) {
                        warn!(
                            "Failed to delete evicted file {}: {}",
                            entry.local_path.display(),
                            e
                        );
                    }
                    debug!("Evicted {}", key);
                    removed += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to drop index entry for {}: {}", key, e),
            }
        }

        removed
    }

    /// One pass over the full usage set: mirror every URL, then evict
    /// everything the set no longer references. Called on every outline
    /// change. Downloads run strictly sequentially; one bad asset never
    /// aborts the batch.
    pub async fn sync(&self, urls: &[String]) -> SyncReport {
        let mut report = SyncReport::default();

        for url in urls {
            match self.ensure_cached(url).await {
                Ok(Some(_)) => report.downloaded += 1,
                Ok(None) => {}
                Err(e) => warn!("Sync: failed to mirror {}: {}", url, e),
            }
        }

        let used_keys: HashSet<String> = urls
            .iter()
            .filter_map(|u| self.rules.normalize(u))
            .map(|n| n.cache_key)
            .collect();

        report.evicted = self.evict_unused(&used_keys);
        info!(
            "Sync complete: {} mirrored, {} evicted",
            report.downloaded, report.evicted
        );

        report
    }

    /// Resolve a bare cache filename to its on-disk path. Anything that
    /// could escape the cache directory resolves to nothing.
    pub fn resolve_media(&self, filename: &str) -> Option<PathBuf> {
        if filename.is_empty()
            || filename == "."
            || filename == ".."
            || filename.contains('/')
            || filename.contains('\\')
        {
            return None;
        }

        Some(self.cache_dir.join(filename))
    }

    /// The `stagecache://{filename}` playback address for a cached path.
    pub fn media_address(path: &Path) -> Option<String> {
        let filename = path.file_name()?.to_str()?;
        Some(format!("{}://{}", MEDIA_SCHEME, filename))
    }

    /// Extract the filename from a `stagecache://` address, accepting it
    /// in both host and path position.
    pub fn parse_media_address(address: &str) -> Option<String> {
        let rest = address.strip_prefix(&format!("{}://", MEDIA_SCHEME))?;
        let filename = rest.trim_start_matches('/');
        if filename.is_empty() || filename.contains('/') {
            return None;
        }
        Some(filename.to_string())
    }

    /// Deterministic destination filename: hash of the key plus the
    /// extension of the fetch URL (default mp4). Repeated attempts for one
    /// key overwrite the same path instead of leaking files.
    fn file_name_for(norm: &Normalized) -> String {
        let digest = Sha1::digest(norm.cache_key.as_bytes());
        format!("{}.{}", hex::encode(digest), Self::extension_of(&norm.fetch_url))
    }

    fn extension_of(url: &str) -> &str {
        let path = url
            .split_once(['?', '#'])
            .map(|(p, _)| p)
            .unwrap_or(url);

        match path.rsplit('/').next().and_then(|f| f.rsplit_once('.')) {
            Some((_, ext))
                if !ext.is_empty()
                    && ext.len() <= 4
                    && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                ext
            }
            _ => DEFAULT_EXTENSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        Router,
        http::StatusCode,
        response::{IntoResponse, Redirect},
        routing::get,
    };

    use super::*;

    const BODY: &[u8] = b"mirrored video payload";

    fn temp_config() -> CacheConfig {
        CacheConfig {
            directory: std::env::temp_dir().join(format!("stagecache-mgr-{}", uuid::Uuid::new_v4())),
            download_timeout_ms: 5_000,
            max_redirects: 5,
            provider_hosts: vec!["stream.worshipmedia.net".to_string()],
        }
    }

    async fn spawn_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let app = Router::new()
            .route(
                "/{name}",
                get(move |axum::extract::Path(name): axum::extract::Path<String>| {
                    let counter = counter.clone();
                    async move {
                        match name.as_str() {
                            "missing.mp4" => Err(StatusCode::NOT_FOUND),
                            "hop.mp4" => Ok(Redirect::temporary("/video.mp4").into_response()),
                            _ => {
                                counter.fetch_add(1, Ordering::SeqCst);
                                Ok(BODY.into_response())
                            }
                        }
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    #[tokio::test]
    async fn ensure_then_lookup_round_trips() {
        let (addr, _) = spawn_upstream().await;
        let manager = CacheManager::new(&temp_config()).unwrap();
        let url = format!("http://{addr}/video.mp4");

        let path = manager.ensure_cached(&url).await.unwrap().unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), BODY);

        assert_eq!(manager.lookup(&url), Some(path));
    }

    #[tokio::test]
    async fn second_ensure_hits_the_index_without_refetching() {
        let (addr, hits) = spawn_upstream().await;
        let manager = CacheManager::new(&temp_config()).unwrap();
        let url = format!("http://{addr}/video.mp4");

        let first = manager.ensure_cached(&url).await.unwrap().unwrap();
        let second = manager.ensure_cached(&url).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_entry_is_replaced_on_next_ensure() {
        let (addr, hits) = spawn_upstream().await;
        let manager = CacheManager::new(&temp_config()).unwrap();
        let url = format!("http://{addr}/video.mp4");

        let path = manager.ensure_cached(&url).await.unwrap().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(manager.lookup(&url), None);

        let replaced = manager.ensure_cached(&url).await.unwrap().unwrap();
        assert_eq!(replaced, path);
        assert!(replaced.exists());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lookup_still_hits_when_the_touch_cannot_persist() {
        let (addr, _) = spawn_upstream().await;
        let config = temp_config();
        let manager = CacheManager::new(&config).unwrap();
        let url = format!("http://{addr}/video.mp4");

        let path = manager.ensure_cached(&url).await.unwrap().unwrap();

        // Wedge the index file so the lastUsed rewrite fails; the cached
        // copy is still perfectly valid and must be reported.
        let index_path = config.directory.join("index.json");
        std::fs::remove_file(&index_path).unwrap();
        std::fs::create_dir(&index_path).unwrap();

        assert_eq!(manager.lookup(&url), Some(path.clone()));
        assert_eq!(manager.ensure_cached(&url).await.unwrap(), Some(path));
    }

    #[tokio::test]
    async fn upstream_404_yields_none_and_no_entry() {
        let (addr, _) = spawn_upstream().await;
        let manager = CacheManager::new(&temp_config()).unwrap();
        let url = format!("http://{addr}/missing.mp4");

        assert!(manager.ensure_cached(&url).await.unwrap().is_none());
        assert!(manager.lookup(&url).is_none());
    }

    #[tokio::test]
    async fn not_cacheable_url_yields_none() {
        let manager = CacheManager::new(&temp_config()).unwrap();

        let cached = manager
            .ensure_cached("https://cdn.example.com/live.m3u8")
            .await
            .unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn redirected_url_is_cached_under_the_original_key() {
        let (addr, _) = spawn_upstream().await;
        let manager = CacheManager::new(&temp_config()).unwrap();
        let url = format!("http://{addr}/hop.mp4");

        let path = manager.ensure_cached(&url).await.unwrap().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), BODY);

        // The original request's key resolves to the mirrored copy.
        assert_eq!(manager.lookup(&url), Some(path));
    }

    #[tokio::test]
    async fn evict_unused_keeps_exactly_the_used_set() {
        let (addr, _) = spawn_upstream().await;
        let manager = CacheManager::new(&temp_config()).unwrap();

        let urls: Vec<String> = ["a.mp4", "b.mp4", "c.mp4"]
            .iter()
            .map(|n| format!("http://{addr}/{n}"))
            .collect();

        let mut paths = Vec::new();
        for url in &urls {
            paths.push(manager.ensure_cached(url).await.unwrap().unwrap());
        }

        let used: HashSet<String> = [urls[1].clone()].into();
        let removed = manager.evict_unused(&used);

        assert_eq!(removed, 2);
        assert!(!paths[0].exists());
        assert!(paths[1].exists());
        assert!(!paths[2].exists());
        assert_eq!(manager.lookup(&urls[1]), Some(paths[1].clone()));
        assert!(manager.lookup(&urls[0]).is_none());
        assert!(manager.lookup(&urls[2]).is_none());
    }

    #[tokio::test]
    async fn sync_isolates_missing_assets_and_evicts_the_rest() {
        let (addr, _) = spawn_upstream().await;
        let manager = CacheManager::new(&temp_config()).unwrap();

        // Something cached earlier that the new usage set no longer references.
        let old_url = format!("http://{addr}/old.mp4");
        let old_path = manager.ensure_cached(&old_url).await.unwrap().unwrap();

        let urls = vec![
            format!("http://{addr}/a.mp4"),
            format!("http://{addr}/missing.mp4"),
            format!("http://{addr}/b.mp4"),
        ];

        let report = manager.sync(&urls).await;

        assert_eq!(report.downloaded, 2);
        assert_eq!(report.evicted, 1);
        assert!(!old_path.exists());
        assert!(manager.lookup(&urls[0]).is_some());
        assert!(manager.lookup(&urls[1]).is_none());
        assert!(manager.lookup(&urls[2]).is_some());
    }

    #[test]
    fn media_addresses_round_trip() {
        let path = PathBuf::from("/var/cache/stagecache/0123abcd.mp4");
        let address = CacheManager::media_address(&path).unwrap();

        assert_eq!(address, "stagecache://0123abcd.mp4");
        assert_eq!(
            CacheManager::parse_media_address(&address).as_deref(),
            Some("0123abcd.mp4")
        );
        // Filename in path position is accepted too.
        assert_eq!(
            CacheManager::parse_media_address("stagecache:///0123abcd.mp4").as_deref(),
            Some("0123abcd.mp4")
        );
        assert!(CacheManager::parse_media_address("stagecache://").is_none());
    }

    #[test]
    fn resolve_media_rejects_traversal() {
        let manager = CacheManager::new(&temp_config()).unwrap();

        assert!(manager.resolve_media("").is_none());
        assert!(manager.resolve_media("..").is_none());
        assert!(manager.resolve_media("../secret.mp4").is_none());
        assert!(manager.resolve_media("a/b.mp4").is_none());
        assert!(manager.resolve_media("clip.mp4").is_some());
    }

    #[test]
    fn extension_inference_falls_back_to_mp4() {
        assert_eq!(CacheManager::extension_of("https://x.test/v.webm"), "webm");
        assert_eq!(CacheManager::extension_of("https://x.test/v.mp4?sig=abc"), "mp4");
        assert_eq!(CacheManager::extension_of("https://x.test/video"), "mp4");
        assert_eq!(CacheManager::extension_of("https://x.test/v.veryverylong"), "mp4");
    }
}
