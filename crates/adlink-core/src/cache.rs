//! Identifier → DN cache.
//!
//! Keys are [`ObjectIdentifier::cache_key`] strings. Entries never expire on
//! their own; they leave only through [`CacheManager::invalidate`],
//! [`CacheManager::invalidate_dn`] or [`CacheManager::clear`].

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::codec::{dn_key, encode_guid, encode_sid, normalize_dn_case};
use crate::error::DirectoryResult;
use crate::identifier::keys_for;
use crate::operation::{Entry, Filter, SearchRequest};
use crate::traits::Directory;

/// Attributes needed to index an object.
pub(crate) const KEY_ATTRIBUTES: [&str; 4] = [
    "objectGUID",
    "objectSid",
    "userPrincipalName",
    "sAMAccountName",
];

/// How an entry got into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    /// Bulk-loaded by [`CacheManager::warm`].
    Warmed,
    /// Filled in after a successful lookup or create.
    Resolved,
}

/// A cached mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Canonical (case-normalized) DN.
    pub dn: String,
    /// Origin of the mapping.
    pub origin: CacheOrigin,
    /// When the mapping was stored.
    pub inserted_at: DateTime<Utc>,
}

/// Outcome of a warm-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmStats {
    /// Objects read from the directory.
    pub objects: usize,
    /// Keys stored.
    pub keys: usize,
    /// Objects skipped because an identifier attribute did not decode.
    pub skipped: usize,
}

/// Snapshot of cache contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total keys.
    pub entries: usize,
    /// Keys loaded by warming.
    pub warmed: usize,
    /// Keys filled in by lookups.
    pub resolved: usize,
}

/// Process-scoped identifier cache shared by the normalizer and managers.
#[derive(Clone)]
pub struct CacheManager {
    entries: Cache<String, CacheEntry>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManager {
    /// Create an empty, unbounded cache.
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    /// Look up the DN stored under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.dn)
    }

    /// Look up the full entry stored under `key`.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key)
    }

    /// Store `key → dn`. The DN is case-normalized on the way in.
    pub fn put(&self, key: impl Into<String>, dn: &str, origin: CacheOrigin) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                dn: normalize_dn_case(dn),
                origin,
                inserted_at: Utc::now(),
            },
        );
    }

    /// Store every key under which `entry` is reachable.
    ///
    /// Returns the number of keys stored.
    pub fn put_entry(&self, entry: &Entry, origin: CacheOrigin) -> DirectoryResult<usize> {
        let guid = entry.first_bytes("objectGUID").map(encode_guid).transpose()?;
        let sid = entry.first_bytes("objectSid").map(encode_sid).transpose()?;
        let keys = keys_for(
            guid.as_deref(),
            sid.as_deref(),
            entry.first("userPrincipalName"),
            entry.first("sAMAccountName"),
        );
        let stored = keys.len();
        for key in keys {
            self.put(key, &entry.dn, origin);
        }
        Ok(stored)
    }

    /// Drop one key.
    pub fn invalidate(&self, key: &str) {
        self.entries.invalidate(key);
    }

    /// Drop every key that maps to `dn` (after a rename, move or delete).
    ///
    /// Returns the number of keys removed.
    pub fn invalidate_dn(&self, dn: &str) -> usize {
        let target = dn_key(dn);
        let stale: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| dn_key(&entry.dn) == target)
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.entries.invalidate(key.as_str());
        }
        if !stale.is_empty() {
            debug!(dn = %dn, keys = stale.len(), "Invalidated cache entries for DN");
        }
        stale.len()
    }

    /// Drop every key that maps to `dn` or to anything beneath it.
    ///
    /// Renaming or moving a container changes the DN of all its descendants.
    pub fn invalidate_subtree(&self, dn: &str) -> usize {
        let target = dn_key(dn);
        let suffix = format!(",{target}");
        let stale: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                let key = dn_key(&entry.dn);
                key == target || key.ends_with(&suffix)
            })
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.entries.invalidate(key.as_str());
        }
        if !stale.is_empty() {
            debug!(dn = %dn, keys = stale.len(), "Invalidated cache entries for subtree");
        }
        stale.len()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Count entries by origin.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for (_, entry) in self.entries.iter() {
            stats.entries += 1;
            match entry.origin {
                CacheOrigin::Warmed => stats.warmed += 1,
                CacheOrigin::Resolved => stats.resolved += 1,
            }
        }
        stats
    }

    /// Bulk-load every user and group under `base`.
    #[instrument(skip(self, directory))]
    pub async fn warm<D>(&self, directory: &D, base: &str, page_size: u32) -> DirectoryResult<WarmStats>
    where
        D: Directory + ?Sized,
    {
        let filter = Filter::or(vec![
            Filter::and(vec![
                Filter::eq("objectCategory", "person"),
                Filter::eq("objectClass", "user"),
            ]),
            Filter::eq("objectClass", "group"),
        ]);
        let request = SearchRequest::subtree(base, filter)
            .with_attributes(KEY_ATTRIBUTES)
            .paged(page_size);

        let entries = directory.search(request).await?;
        let mut stats = WarmStats::default();

        for entry in &entries {
            stats.objects += 1;
            match self.put_entry(entry, CacheOrigin::Warmed) {
                Ok(keys) => stats.keys += keys,
                Err(e) => {
                    warn!(dn = %entry.dn, error = %e, "Skipping object with undecodable identifier");
                    stats.skipped += 1;
                }
            }
        }

        info!(
            objects = stats.objects,
            keys = stats.keys,
            skipped = stats.skipped,
            "Identifier cache warmed"
        );
        Ok(stats)
    }
}
