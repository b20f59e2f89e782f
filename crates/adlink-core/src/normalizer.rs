//! Identity normalization.
//!
//! Turns any of the accepted identifier forms into the canonical
//! (case-normalized) DN of the object it names, consulting the shared
//! [`CacheManager`] before searching.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheManager, CacheOrigin, KEY_ATTRIBUTES};
use crate::codec::{encode_guid, encode_sid, normalize_dn_case};
use crate::error::{DirectoryError, DirectoryResult};
use crate::identifier::ObjectIdentifier;
use crate::operation::Entry;
use crate::traits::Directory;

const DEFAULT_CONCURRENCY: usize = 8;

/// Everything a lookup learned about an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedObject {
    /// Canonical DN.
    pub dn: String,
    /// objectGUID text, when readable.
    pub guid: Option<String>,
    /// objectSid text; absent for OUs and containers.
    pub sid: Option<String>,
    /// objectClass values.
    pub object_classes: Vec<String>,
}

impl ResolvedObject {
    fn from_entry(entry: &Entry) -> DirectoryResult<Self> {
        Ok(Self {
            dn: normalize_dn_case(&entry.dn),
            guid: entry.first_bytes("objectGUID").map(encode_guid).transpose()?,
            sid: entry.first_bytes("objectSid").map(encode_sid).transpose()?,
            object_classes: entry.values("objectClass").to_vec(),
        })
    }
}

/// Resolves identifiers to canonical DNs.
pub struct IdentityNormalizer<D: ?Sized> {
    directory: Arc<D>,
    cache: Arc<CacheManager>,
    concurrency: usize,
}

impl<D: ?Sized> Clone for IdentityNormalizer<D> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            cache: Arc::clone(&self.cache),
            concurrency: self.concurrency,
        }
    }
}

impl<D> IdentityNormalizer<D>
where
    D: Directory + ?Sized,
{
    /// Create a normalizer over `directory` sharing `cache`.
    pub fn new(directory: Arc<D>, cache: Arc<CacheManager>) -> Self {
        Self {
            directory,
            cache,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Bound the number of concurrent lookups in a batch.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Resolve free-form identifier text to a canonical DN.
    pub async fn normalize_to_dn(&self, input: &str) -> DirectoryResult<String> {
        let id = ObjectIdentifier::classify(input)?;
        self.normalize_identifier(&id).await
    }

    /// Resolve a classified identifier to a canonical DN.
    ///
    /// DNs are returned case-normalized without a search. Everything else is
    /// served from cache or looked up, requiring exactly one match.
    #[instrument(skip(self), fields(kind = id.kind()))]
    pub async fn normalize_identifier(&self, id: &ObjectIdentifier) -> DirectoryResult<String> {
        if let ObjectIdentifier::Dn { dn } = id {
            return Ok(dn.clone());
        }

        let key = id.cache_key();
        if let Some(dn) = self.cache.get(&key) {
            debug!(key = %key, "Identifier cache hit");
            return Ok(dn);
        }

        debug!(key = %key, "Identifier cache miss");
        let entry = self.lookup(id).await?;
        self.remember(&key, &entry);
        Ok(normalize_dn_case(&entry.dn))
    }

    /// Resolve many identifiers, searching at most once per distinct object key.
    ///
    /// The result maps each input (as given) to its DN. Any failure aborts
    /// the batch.
    pub async fn normalize_to_dn_batch<S>(
        &self,
        inputs: &[S],
    ) -> DirectoryResult<HashMap<String, String>>
    where
        S: AsRef<str>,
    {
        let mut by_key: HashMap<String, ObjectIdentifier> = HashMap::new();
        let mut input_keys = Vec::with_capacity(inputs.len());
        for input in inputs {
            let id = ObjectIdentifier::classify(input.as_ref())?;
            let key = id.cache_key();
            input_keys.push((input.as_ref().to_string(), key.clone()));
            by_key.entry(key).or_insert(id);
        }

        debug!(
            inputs = inputs.len(),
            distinct = by_key.len(),
            "Normalizing identifier batch"
        );

        let resolved: HashMap<String, String> = stream::iter(by_key)
            .map(|(key, id)| async move {
                let dn = self.normalize_identifier(&id).await?;
                Ok::<_, DirectoryError>((key, dn))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut out = HashMap::with_capacity(input_keys.len());
        for (input, key) in input_keys {
            if let Some(dn) = resolved.get(&key) {
                out.insert(input, dn.clone());
            }
        }
        Ok(out)
    }

    /// Look up an object and return its identity attributes.
    ///
    /// Always goes to the directory (DNs included) so the answer reflects the
    /// server; the cache is refreshed with what was found.
    #[instrument(skip(self))]
    pub async fn resolve(&self, input: &str) -> DirectoryResult<ResolvedObject> {
        let id = ObjectIdentifier::classify(input)?;
        let entry = self.lookup(&id).await?;
        if !id.is_dn() {
            self.remember(&id.cache_key(), &entry);
        }
        ResolvedObject::from_entry(&entry)
    }

    async fn lookup(&self, id: &ObjectIdentifier) -> DirectoryResult<Entry> {
        let mut attributes: Vec<&str> = KEY_ATTRIBUTES.to_vec();
        attributes.push("objectClass");

        match id.search_filter()? {
            Some(filter) => {
                self.directory
                    .search_unique(&id.to_string(), filter, &attributes)
                    .await
            }
            None => self
                .directory
                .read(&id.to_string(), &attributes)
                .await?
                .ok_or_else(|| DirectoryError::not_found(id.to_string())),
        }
    }

    fn remember(&self, key: &str, entry: &Entry) {
        self.cache.put(key, &entry.dn, CacheOrigin::Resolved);
        if let Err(e) = self.cache.put_entry(entry, CacheOrigin::Resolved) {
            warn!(dn = %entry.dn, error = %e, "Could not index all identifiers of object");
        }
    }
}
