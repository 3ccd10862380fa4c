use crate::clock::Clock;
use crate::store::{load_blob, save_blob, StateStore, CACHE_KEY};
use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Default freshness window for a verdict.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// One stored verdict, keyed by normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "url")]
    pub key: String,
    #[serde(rename = "time", with = "chrono::serde::ts_milliseconds")]
    pub observed_at: DateTime<Utc>,
    #[serde(rename = "safe")]
    pub verdict_safe: bool,
    pub threat: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "urlStatus")]
    pub url_status: Option<String>,
    pub submitted: bool,
}

impl CacheEntry {
    /// Verdict for a URL the service has no record of.
    pub fn safe(key: &str, observed_at: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            observed_at,
            verdict_safe: true,
            threat: None,
            tags: Vec::new(),
            url_status: None,
            submitted: false,
        }
    }

    /// Verdict for a URL the service already lists. It is on record there,
    /// so it counts as submitted.
    pub fn malicious(
        key: &str,
        observed_at: DateTime<Utc>,
        threat: Option<String>,
        tags: Vec<String>,
        url_status: Option<String>,
    ) -> Self {
        Self {
            key: key.to_string(),
            observed_at,
            verdict_safe: false,
            threat,
            tags,
            url_status,
            submitted: true,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Hours of freshness left, rounded up and never below 1.
pub fn remaining_hours(entry: &CacheEntry, now: DateTime<Utc>, ttl: TimeDelta) -> i64 {
    let remaining_ms = (ttl - (now - entry.observed_at)).num_milliseconds();
    let hour_ms = TimeDelta::hours(1).num_milliseconds();
    let hours = if remaining_ms > 0 {
        (remaining_ms + hour_ms - 1) / hour_ms
    } else {
        0
    };
    hours.max(1)
}

/// Time-expiring verdict store.
///
/// Expiry is lazy: every read drops stale entries and writes the pruned
/// collection back. All mutations are full read-modify-write cycles under
/// one lock, so a concurrent reader never sees a partial update.
pub struct VerdictCache {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    write_lock: Mutex<()>,
}

impl VerdictCache {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(store, clock, TimeDelta::hours(DEFAULT_TTL_HOURS))
    }

    pub fn with_ttl(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, ttl: TimeDelta) -> Self {
        Self {
            store,
            clock,
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.observed_at < self.ttl
    }

    pub fn remaining_hours(&self, entry: &CacheEntry) -> i64 {
        remaining_hours(entry, self.clock.now(), self.ttl)
    }

    /// All fresh entries, in insertion order.
    pub fn load(&self) -> Result<Vec<CacheEntry>> {
        let _guard = self.lock()?;
        self.load_unlocked()
    }

    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.load()?.into_iter().find(|entry| entry.key == key))
    }

    /// Insert or replace the entry for `entry.key`. Last write wins.
    pub fn put(&self, entry: CacheEntry) -> Result<()> {
        let _guard = self.lock()?;
        let mut entries = self.load_unlocked()?;
        entries.retain(|existing| existing.key != entry.key);
        log::debug!(
            "Caching verdict for {} (safe: {}, submitted: {})",
            entry.key,
            entry.verdict_safe,
            entry.submitted
        );
        entries.push(entry);
        save_blob(self.store.as_ref(), CACHE_KEY, &entries)
    }

    /// Flag the entry for `key` as submitted and restart its freshness
    /// window. Returns false when no fresh entry exists.
    pub fn mark_submitted(&self, key: &str) -> Result<bool> {
        let _guard = self.lock()?;
        let mut entries = self.load_unlocked()?;
        let now = self.clock.now();

        let Some(position) = entries.iter().position(|entry| entry.key == key) else {
            return Ok(false);
        };
        let mut entry = entries.remove(position);
        entry.submitted = true;
        entry.observed_at = now;
        entries.push(entry);

        save_blob(self.store.as_ref(), CACHE_KEY, &entries)?;
        Ok(true)
    }

    /// Returns whether an entry was removed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.lock()?;
        let mut entries = self.load_unlocked()?;
        let before = entries.len();
        entries.retain(|entry| entry.key != key);
        if entries.len() == before {
            return Ok(false);
        }
        save_blob(self.store.as_ref(), CACHE_KEY, &entries)?;
        log::info!("Removed cached verdict for {key}");
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock()?;
        save_blob(self.store.as_ref(), CACHE_KEY, &Vec::<CacheEntry>::new())?;
        log::info!("Verdict cache cleared");
        Ok(())
    }

    fn load_unlocked(&self) -> Result<Vec<CacheEntry>> {
        let stored: Vec<CacheEntry> =
            load_blob(self.store.as_ref(), CACHE_KEY)?.unwrap_or_default();
        let now = self.clock.now();
        let total = stored.len();

        let fresh: Vec<CacheEntry> = stored
            .into_iter()
            .filter(|entry| self.is_fresh(entry, now))
            .collect();

        if fresh.len() != total {
            log::debug!("Purging {} expired cache entries", total - fresh.len());
            save_blob(self.store.as_ref(), CACHE_KEY, &fresh)?;
        }

        Ok(fresh)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("verdict cache lock poisoned"))
    }
}
