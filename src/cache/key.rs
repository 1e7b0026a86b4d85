use regex::Regex;

/// Result of normalizing a caller-supplied URL: the canonical identity the
/// index is keyed by, and the URL the bytes are actually fetched from.
/// For provider URLs both are the rewritten progressive-download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub cache_key: String,
    pub fetch_url: String,
}

/// Ordered provider URL-rewrite rules.
///
/// Streaming providers publish the same asset under several URL shapes: an
/// adaptive-streaming manifest (`{id}.m3u8`), a legacy single-file URL
/// (`{id}.mp4`) and the current single-file URL (`{id}/highest.mp4`). Only
/// the last one is mirrorable as a single download, so the first two are
/// rewritten to it. Manifests on hosts we have no rewrite for cannot be
/// mirrored at all.
pub struct RewriteRules {
    current: Regex,
    manifest: Regex,
    legacy: Regex,
    any_manifest: Regex,
}

impl RewriteRules {
    pub fn new(provider_hosts: &[String]) -> Self {
        let hosts = if provider_hosts.is_empty() {
            // An unmatchable alternation keeps the provider rules inert
            // when no hosts are configured.
            r"[^\s\S]".to_string()
        } else {
            provider_hosts
                .iter()
                .map(|h| regex::escape(h))
                .collect::<Vec<_>>()
                .join("|")
        };

        Self {
            current: Regex::new(&format!(r"^https://(?:{hosts})/[^?#]+/highest\.mp4$"))
                .expect("valid current-rendition pattern"),
            manifest: Regex::new(&format!(
                r"^https://({hosts})/([^/?#]+)\.m3u8(?:[?#].*)?$"
            ))
            .expect("valid manifest pattern"),
            legacy: Regex::new(&format!(r"^https://({hosts})/([^/?#]+)\.mp4$"))
                .expect("valid legacy pattern"),
            any_manifest: Regex::new(r"\.m3u8(?:[?#]|$)").expect("valid manifest suffix pattern"),
        }
    }

    /// Derive `(cache_key, fetch_url)` for a URL, or `None` when the URL
    /// cannot be mirrored as a single file. Pure function of its input.
    pub fn normalize(&self, url: &str) -> Option<Normalized> {
        if self.current.is_match(url) {
            return Some(Normalized {
                cache_key: url.to_string(),
                fetch_url: url.to_string(),
            });
        }

        for rule in [&self.manifest, &self.legacy] {
            if let Some(caps) = rule.captures(url) {
                let rewritten = format!("https://{}/{}/highest.mp4", &caps[1], &caps[2]);
                return Some(Normalized {
                    cache_key: rewritten.clone(),
                    fetch_url: rewritten,
                });
            }
        }

        // Adaptive manifests from anyone else enumerate renditions; there is
        // no single file to download.
        if self.any_manifest.is_match(url) {
            return None;
        }

        Some(Normalized {
            cache_key: url.to_string(),
            fetch_url: url.to_string(),
        })
    }
}
