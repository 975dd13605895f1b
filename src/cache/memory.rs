//! In-process cache backend.
//!
//! Used when no Redis URL is configured. Mirrors the subset of Redis semantics the
//! cache layer relies on: TTL expiry, glob `SCAN` with a cursor, and `UNLINK`.
//! Scan cursors are insertion sequence numbers, so deleting keys during a scan
//! never shifts the remaining ones.

use crate::cache::CacheStore;
use crate::error::VidsyncError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Expired entries are swept every this many writes
const PURGE_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
    seq: u64,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
    // 0 is the "scan complete" cursor, so sequence numbers start at 1.
    next_seq: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed.
    /// `get` only evicts the key it reads, so keys never read again are freed here.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, VidsyncError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if value.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), VidsyncError> {
        let seq = self.next_seq();
        let entry = MemoryEntry {
            value,
            expires_at: Instant::now() + ttl,
            seq,
        };
        self.entries.insert(key.to_string(), entry);

        if seq % PURGE_EVERY == 0 {
            self.purge_expired();
        }
        Ok(())
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), VidsyncError> {
        let now = Instant::now();
        let count = count.max(1);

        let mut window: Vec<(u64, String, bool)> = self
            .entries
            .iter()
            .filter(|entry| entry.value().seq >= cursor)
            .map(|entry| {
                let live = !entry.value().is_expired(now);
                (entry.value().seq, entry.key().clone(), live)
            })
            .collect();
        window.sort_unstable_by_key(|(seq, _, _)| *seq);

        let next_cursor = window.get(count).map(|(seq, _, _)| *seq).unwrap_or(0);
        let keys = window
            .into_iter()
            .take(count)
            .filter(|(_, key, live)| *live && glob_match(pattern, key))
            .map(|(_, key, _)| key)
            .collect();

        Ok((next_cursor, keys))
    }

    async fn unlink(&self, keys: &[String]) -> Result<u64, VidsyncError> {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Redis-style glob matching supporting `*`, `?` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` in the pattern and the text index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
                continue;
            }
            Some(c) if *c != '\\' && *c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("videos:*", "videos:get_latest_videos:abc"));
        assert!(glob_match("videos:get_latest_videos:*", "videos:get_latest_videos:abc"));
        assert!(!glob_match("videos:get_latest_videos:*", "videos:count:abc"));
        assert!(!glob_match("videos:*", "clips:videos:1"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("a\\*", "a*"));
        assert!(!glob_match("a\\*", "ab"));
    }

    #[tokio::test]
    async fn test_get_set_and_expiry() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache
            .set("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        cache
            .set("short", b"v".to_vec(), Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unread_expired_entries_are_swept() {
        let cache = MemoryCache::new();
        for i in 0..1000 {
            cache
                .set(&format!("ns:op:{}", i), vec![0], Duration::from_millis(0))
                .await
                .unwrap();
        }
        cache
            .set("live", vec![1], Duration::from_secs(60))
            .await
            .unwrap();

        // Periodic sweeps keep the map bounded without any reads
        assert!(cache.entries.len() <= PURGE_EVERY as usize);

        cache.purge_expired();
        assert_eq!(cache.entries.len(), 1);
        assert_eq!(cache.get("live").await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn test_scan_visits_every_key_once() {
        let cache = MemoryCache::new();
        for i in 0..23 {
            cache
                .set(&format!("ns:op:{}", i), vec![], Duration::from_secs(60))
                .await
                .unwrap();
        }
        cache
            .set("other:op:1", vec![], Duration::from_secs(60))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut cursor = 0;
        let mut steps = 0;
        loop {
            let (next, keys) = cache.scan(cursor, "ns:*", 5).await.unwrap();
            seen.extend(keys);
            steps += 1;
            if next == 0 {
                break;
            }
            cursor = next;
        }

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 23);
        assert_eq!(steps, 5);
    }

    #[tokio::test]
    async fn test_unlink_counts_only_existing() {
        let cache = MemoryCache::new();
        cache
            .set("a", vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        let removed = cache
            .unlink(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(cache.is_empty());
    }
}
