//! Persistent cache for Gemini "thought signatures".
//!
//! Gemini 3's native API requires a function-call's thought signature to
//! be echoed back on the next turn that continues the same reasoning
//! chain. The cache is an in-memory [`DashMap`] for lookups, backed by an
//! append-only JSON-lines file so entries survive a process restart —
//! there's no embedded KV store in the dependency stack, so durability is
//! "replay the log on startup" rather than a real database.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A single signature-cache record, as stored in the log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureCacheEntry {
    pub key: String,
    pub signature: String,
    pub stored_at_epoch_secs: u64,
}

/// Sentinel signature value attached on a cache miss, matching Gemini's
/// documented escape hatch: it tells the model's thought-signature
/// validator to skip verification for this turn instead of rejecting the
/// request outright.
pub const SKIP_VALIDATOR_SENTINEL: &str = "skip_thought_signature_validator";

/// Default age-based eviction threshold: entries older than this are
/// dropped by [`SignatureCache::evict_expired`].
pub const DEFAULT_EVICTION_DAYS: u32 = 30;

struct CacheValue {
    signature: String,
    stored_at_epoch_secs: u64,
}

pub struct SignatureCache {
    map: DashMap<String, CacheValue>,
    log_path: PathBuf,
}

impl SignatureCache {
    /// Load the cache by replaying `<dir>/signatures.jsonl`. Missing or
    /// unreadable entries are skipped; a missing file starts empty.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let log_path = dir.join("signatures.jsonl");
        let map = DashMap::new();

        if let Ok(file) = std::fs::File::open(&log_path) {
            for line in BufReader::new(file).lines() {
                let Ok(line) = line else { continue };
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(entry) = serde_json::from_str::<SignatureCacheEntry>(&line) {
                    map.insert(
                        entry.key,
                        CacheValue {
                            signature: entry.signature,
                            stored_at_epoch_secs: entry.stored_at_epoch_secs,
                        },
                    );
                }
            }
        }

        let cache = Self { map, log_path };
        cache.evict_expired(DEFAULT_EVICTION_DAYS);
        Ok(cache)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.signature.clone())
    }

    /// Insert or replace `key`'s signature, appending to the durable log.
    /// Log write failures are logged, not propagated: losing durability
    /// for one entry shouldn't fail the response that produced it.
    pub fn put(&self, key: String, signature: String) {
        let stored_at_epoch_secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();

        self.map.insert(
            key.clone(),
            CacheValue {
                signature: signature.clone(),
                stored_at_epoch_secs,
            },
        );

        let entry = SignatureCacheEntry {
            key,
            signature,
            stored_at_epoch_secs,
        };

        let result = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path)?;
            writeln!(file, "{}", serde_json::to_string(&entry)?)
        })();

        if let Err(err) = result {
            log::warn!("failed to persist signature cache entry: {err}");
        }
    }

    /// Look up `key`, falling back to the skip-validator sentinel on a
    /// cache miss.
    pub fn get_or_sentinel(&self, key: &str) -> String {
        self.get(key).unwrap_or_else(|| SKIP_VALIDATOR_SENTINEL.to_string())
    }

    /// Drop every entry whose `stored_at_epoch_secs` is older than
    /// `days_old * 86400` seconds, from both the in-memory map and the
    /// durable log (rewritten with only the surviving entries).
    pub fn evict_expired(&self, days_old: u32) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        let max_age_secs = u64::from(days_old) * 86_400;

        self.map.retain(|_, v| now.saturating_sub(v.stored_at_epoch_secs) <= max_age_secs);

        let result = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.log_path)?;
            for entry in self.map.iter() {
                let record = SignatureCacheEntry {
                    key: entry.key().clone(),
                    signature: entry.value().signature.clone(),
                    stored_at_epoch_secs: entry.value().stored_at_epoch_secs,
                };
                writeln!(file, "{}", serde_json::to_string(&record)?)?;
            }
            Ok(())
        })();

        if let Err(err) = result {
            log::warn!("failed to rewrite signature cache log after eviction: {err}");
        }
    }
}

/// The process-wide signature cache, opened on first use against
/// [`config::cache_dir`]. A failure to open the durable log (e.g.
/// unwritable `CACHE_DIR`) falls back to an in-memory-only cache rather
/// than failing every Gemini request.
pub fn global() -> &'static SignatureCache {
    static CACHE: OnceLock<SignatureCache> = OnceLock::new();

    CACHE.get_or_init(|| {
        let dir = config::cache_dir();
        SignatureCache::open(&dir).unwrap_or_else(|err| {
            log::warn!("failed to open signature cache at {}: {err}; continuing in-memory-only", dir.display());
            SignatureCache {
                map: DashMap::new(),
                log_path: dir.join("signatures.jsonl"),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_sentinel_on_miss_and_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("sig-cache-test-{}", std::process::id()));
        let cache = SignatureCache::open(&dir).unwrap();

        assert_eq!(cache.get_or_sentinel("call_1"), SKIP_VALIDATOR_SENTINEL);

        cache.put("call_1".to_string(), "sig-abc".to_string());
        assert_eq!(cache.get("call_1").as_deref(), Some("sig-abc"));

        let reopened = SignatureCache::open(&dir).unwrap();
        assert_eq!(reopened.get("call_1").as_deref(), Some("sig-abc"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn evict_expired_drops_stale_entries_from_memory_and_log() {
        let dir = std::env::temp_dir().join(format!("sig-cache-evict-test-{}", std::process::id()));
        let cache = SignatureCache::open(&dir).unwrap();

        cache.put("fresh".to_string(), "sig-fresh".to_string());
        cache.map.insert(
            "stale".to_string(),
            CacheValue {
                signature: "sig-stale".to_string(),
                stored_at_epoch_secs: 0,
            },
        );

        cache.evict_expired(DEFAULT_EVICTION_DAYS);

        assert_eq!(cache.get("fresh").as_deref(), Some("sig-fresh"));
        assert_eq!(cache.get("stale"), None);

        let reopened = SignatureCache::open(&dir).unwrap();
        assert_eq!(reopened.get("fresh").as_deref(), Some("sig-fresh"));
        assert_eq!(reopened.get("stale"), None);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
