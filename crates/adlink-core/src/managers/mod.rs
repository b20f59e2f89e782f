//! Group, user and OU management.
//!
//! Every manager addresses objects by objectGUID, the only identifier that
//! survives renames and moves. DNs are looked up (cache first) on each call.

pub mod groups;
pub mod membership;
pub mod ous;
pub mod users;

pub use groups::{Group, GroupCategory, GroupManager, GroupScope, GroupUpdate, NewGroup};
pub use membership::{compute_membership_diff, fetch_members, MembershipDiff};
pub use ous::{NewOrganizationalUnit, OrganizationalUnit, OuManager, OuUpdate};
pub use users::{encode_password, NewUser, User, UserManager, UserUpdate};

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheManager, CacheOrigin};
use crate::codec::{canonical_guid, decode_guid, dn_key, escape_dn_value, parent_dn, rdn_of};
use crate::error::{DirectoryError, DirectoryResult};
use crate::identifier::ObjectIdentifier;
use crate::operation::{Entry, Filter, ModOp, Modification};
use crate::traits::Directory;

/// Directory access shared by the managers.
pub(crate) struct ObjectStore<D: ?Sized> {
    directory: Arc<D>,
    cache: Arc<CacheManager>,
}

impl<D: ?Sized> Clone for ObjectStore<D> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<D> ObjectStore<D>
where
    D: Directory + ?Sized,
{
    pub(crate) fn new(directory: Arc<D>, cache: Arc<CacheManager>) -> Self {
        Self { directory, cache }
    }

    pub(crate) fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    pub(crate) fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Container used when the caller names none.
    pub(crate) fn container_or(&self, container: Option<&str>, default_rdn: Option<&str>) -> String {
        match (container, default_rdn) {
            (Some(container), _) => container.to_string(),
            (None, Some(rdn)) => format!("{rdn},{}", self.directory.base_dn()),
            (None, None) => self.directory.base_dn().to_string(),
        }
    }

    /// Fetch an object of `object_class` by objectGUID.
    ///
    /// A cached DN is used only if the entry there still carries the GUID;
    /// otherwise the stale key is dropped and the naming context is searched.
    pub(crate) async fn find_by_guid(
        &self,
        guid: &str,
        object_class: &str,
        attributes: &[&str],
    ) -> DirectoryResult<Entry> {
        let guid = canonical_guid(guid)?;
        let bytes = decode_guid(&guid)?;
        let key = ObjectIdentifier::Guid { guid: guid.clone() }.cache_key();

        if let Some(dn) = self.cache.get(&key) {
            match self.directory.read(&dn, attributes).await? {
                Some(entry)
                    if entry.first_bytes("objectGUID") == Some(&bytes[..])
                        && entry.has_object_class(object_class) =>
                {
                    return Ok(entry);
                }
                _ => {
                    debug!(guid = %guid, dn = %dn, "Cached DN no longer holds object");
                    self.cache.invalidate(&key);
                }
            }
        }

        let filter = Filter::and(vec![
            Filter::eq("objectClass", object_class),
            Filter::eq_bytes("objectGUID", bytes.to_vec()),
        ]);
        let entry = self.directory.search_unique(&guid, filter, attributes).await?;
        self.remember(&entry);
        Ok(entry)
    }

    /// Read back a freshly written object and index it.
    pub(crate) async fn reload(&self, dn: &str, attributes: &[&str]) -> DirectoryResult<Entry> {
        let entry = self
            .directory
            .read(dn, attributes)
            .await?
            .ok_or_else(|| DirectoryError::not_found(dn))?;
        self.remember(&entry);
        Ok(entry)
    }

    pub(crate) fn remember(&self, entry: &Entry) {
        if let Err(e) = self.cache.put_entry(entry, CacheOrigin::Resolved) {
            warn!(dn = %entry.dn, error = %e, "Could not index all identifiers of object");
        }
    }

    /// Apply `changes` in one modify, skipping the round trip when there are none.
    pub(crate) async fn modify(&self, dn: &str, changes: Vec<Modification>) -> DirectoryResult<bool> {
        if changes.is_empty() {
            return Ok(false);
        }
        self.directory.modify(dn, changes).await?;
        Ok(true)
    }

    /// Rename and/or move `dn`, returning the new DN.
    ///
    /// `naming_attribute` is the RDN type (`CN` or `OU`). The old DN's cache
    /// keys are dropped, descendants' too when `subtree` is set.
    pub(crate) async fn relocate(
        &self,
        dn: &str,
        naming_attribute: &str,
        new_name: Option<&str>,
        new_container: Option<&str>,
        subtree: bool,
    ) -> DirectoryResult<String> {
        // Naming the current container is not a move.
        let current_parent = parent_dn(dn).unwrap_or_default();
        let new_container = new_container.filter(|c| dn_key(c) != dn_key(current_parent));
        if new_name.is_none() && new_container.is_none() {
            return Ok(dn.to_string());
        }

        let new_rdn = match new_name {
            Some(name) => format!("{naming_attribute}={}", escape_dn_value(name)),
            None => rdn_of(dn).to_string(),
        };
        let parent = new_container.or_else(|| parent_dn(dn)).unwrap_or_default();
        let new_dn = if parent.is_empty() {
            new_rdn.clone()
        } else {
            format!("{new_rdn},{parent}")
        };

        self.directory
            .modify_dn(dn, &new_rdn, new_container)
            .await?;

        if subtree {
            self.cache.invalidate_subtree(dn);
        } else {
            self.cache.invalidate_dn(dn);
        }
        debug!(old_dn = %dn, new_dn = %new_dn, "Object relocated");
        Ok(new_dn)
    }

    /// Delete `dn` and forget its cache keys.
    pub(crate) async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        self.directory.delete(dn).await?;
        self.cache.invalidate_dn(dn);
        Ok(())
    }
}

/// Replacement for an optional single-valued attribute.
///
/// AD rejects empty values, so an empty string clears the attribute. A
/// replace without values succeeds whether or not the attribute is set.
pub(crate) fn set_or_clear(attribute: &str, value: &str) -> Modification {
    if value.is_empty() {
        Modification {
            op: ModOp::Replace,
            attribute: attribute.to_string(),
            values: Vec::new(),
        }
    } else {
        Modification::replace(attribute, value)
    }
}

/// Text value of a required attribute.
pub(crate) fn required(entry: &Entry, attribute: &str) -> DirectoryResult<String> {
    entry.first(attribute).map(str::to_string).ok_or_else(|| {
        DirectoryError::internal(format!("{}: attribute {attribute} missing", entry.dn))
    })
}

/// objectGUID text of an entry.
pub(crate) fn guid_of(entry: &Entry) -> DirectoryResult<String> {
    let bytes = entry
        .first_bytes("objectGUID")
        .ok_or_else(|| DirectoryError::internal(format!("{}: objectGUID missing", entry.dn)))?;
    crate::codec::encode_guid(bytes)
}
