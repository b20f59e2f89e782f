//! Organizational units.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use super::{guid_of, required, set_or_clear, ObjectStore};
use crate::cache::CacheManager;
use crate::codec::{escape_dn_value, normalize_dn_case};
use crate::error::DirectoryResult;
use crate::operation::{Entry, NewEntry};
use crate::traits::Directory;

const OU_CLASS: &str = "organizationalUnit";
const OU_ATTRIBUTES: &[&str] = &["objectClass", "objectGUID", "ou", "description"];

/// An OU as read from the directory. OUs have no SID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationalUnit {
    pub guid: String,
    pub dn: String,
    pub name: String,
    pub description: Option<String>,
}

impl OrganizationalUnit {
    fn from_entry(entry: &Entry) -> DirectoryResult<Self> {
        Ok(Self {
            guid: guid_of(entry)?,
            dn: normalize_dn_case(&entry.dn),
            name: required(entry, "ou")?,
            description: entry.first("description").map(str::to_string),
        })
    }
}

/// Parameters for a new OU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrganizationalUnit {
    pub name: String,
    /// Parent DN; defaults to the naming context.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewOrganizationalUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container: None,
            description: None,
        }
    }

    #[must_use]
    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Changes to an existing OU.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OuUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// OU CRUD.
pub struct OuManager<D: ?Sized> {
    store: ObjectStore<D>,
}

impl<D: ?Sized> Clone for OuManager<D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<D> OuManager<D>
where
    D: Directory + ?Sized,
{
    pub fn new(directory: Arc<D>, cache: Arc<CacheManager>) -> Self {
        Self {
            store: ObjectStore::new(directory, cache),
        }
    }

    #[instrument(skip(self, new_ou), fields(name = %new_ou.name))]
    pub async fn create(&self, new_ou: &NewOrganizationalUnit) -> DirectoryResult<OrganizationalUnit> {
        let container = self.store.container_or(new_ou.container.as_deref(), None);
        let dn = format!("OU={},{container}", escape_dn_value(&new_ou.name));
        let entry = NewEntry::new(dn.clone())
            .with_values("objectClass", ["top", OU_CLASS])
            .with("ou", new_ou.name.as_str())
            .with_opt(
                "description",
                new_ou.description.as_deref().filter(|d| !d.is_empty()),
            );
        self.store.directory().add(entry).await?;

        let ou = OrganizationalUnit::from_entry(&self.store.reload(&dn, OU_ATTRIBUTES).await?)?;
        info!(dn = %ou.dn, guid = %ou.guid, "Organizational unit created");
        Ok(ou)
    }

    pub async fn get(&self, guid: &str) -> DirectoryResult<OrganizationalUnit> {
        let entry = self.store.find_by_guid(guid, OU_CLASS, OU_ATTRIBUTES).await?;
        OrganizationalUnit::from_entry(&entry)
    }

    /// Update description, rename or move. Renames and moves take the whole
    /// subtree along, so every cached DN beneath the OU is dropped.
    #[instrument(skip(self, update))]
    pub async fn update(&self, guid: &str, update: &OuUpdate) -> DirectoryResult<OrganizationalUnit> {
        let entry = self.store.find_by_guid(guid, OU_CLASS, OU_ATTRIBUTES).await?;
        let current = OrganizationalUnit::from_entry(&entry)?;

        let mut changes = Vec::new();
        if let Some(description) = &update.description {
            if current.description.as_deref().unwrap_or_default() != description.as_str() {
                changes.push(set_or_clear("description", description));
            }
        }
        let mut written = self.store.modify(&entry.dn, changes).await?;

        let new_name = update.name.as_deref().filter(|n| *n != current.name);
        let dn = self
            .store
            .relocate(&entry.dn, "OU", new_name, update.container.as_deref(), true)
            .await?;
        written |= dn != entry.dn;

        if !written {
            return Ok(current);
        }
        let ou = OrganizationalUnit::from_entry(&self.store.reload(&dn, OU_ATTRIBUTES).await?)?;
        info!(dn = %ou.dn, "Organizational unit updated");
        Ok(ou)
    }

    /// Delete an empty OU.
    #[instrument(skip(self))]
    pub async fn delete(&self, guid: &str) -> DirectoryResult<()> {
        let entry = self.store.find_by_guid(guid, OU_CLASS, OU_ATTRIBUTES).await?;
        self.store.delete(&entry.dn).await?;
        info!(dn = %entry.dn, "Organizational unit deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOrigin;
    use crate::error::DirectoryError;
    use crate::testing::InMemoryDirectory;

    const BASE: &str = "DC=example,DC=com";

    fn manager() -> (Arc<InMemoryDirectory>, Arc<CacheManager>, OuManager<InMemoryDirectory>) {
        let dir = Arc::new(InMemoryDirectory::new(BASE));
        let cache = Arc::new(CacheManager::new());
        let ous = OuManager::new(dir.clone(), cache.clone());
        (dir, cache, ous)
    }

    #[tokio::test]
    async fn test_create_defaults_to_naming_context() {
        let (_, _, ous) = manager();
        let ou = ous
            .create(&NewOrganizationalUnit::new("Staff").with_description("People"))
            .await
            .unwrap();
        assert_eq!(ou.dn, "OU=Staff,DC=example,DC=com");
        assert_eq!(ou.description.as_deref(), Some("People"));
        assert_eq!(ous.get(&ou.guid).await.unwrap(), ou);
    }

    #[tokio::test]
    async fn test_move_invalidates_descendants() {
        let (dir, cache, ous) = manager();
        let staff = ous.create(&NewOrganizationalUnit::new("Staff")).await.unwrap();
        let archive = ous.create(&NewOrganizationalUnit::new("Archive")).await.unwrap();
        dir.insert(
            Entry::new("CN=Alice,OU=Staff,DC=example,DC=com")
                .with("objectClass", "user")
                .with("sAMAccountName", "alice"),
        );
        cache.put(
            "sam:alice",
            "CN=Alice,OU=Staff,DC=example,DC=com",
            CacheOrigin::Resolved,
        );

        let moved = ous
            .update(
                &staff.guid,
                &OuUpdate {
                    container: Some(archive.dn.clone()),
                    ..OuUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(moved.dn, "OU=Staff,OU=Archive,DC=example,DC=com");
        assert!(cache.get("sam:alice").is_none());
        assert!(dir.get("CN=Alice,OU=Staff,OU=Archive,DC=example,DC=com").is_some());
    }

    #[tokio::test]
    async fn test_rename_updates_name() {
        let (_, _, ous) = manager();
        let ou = ous.create(&NewOrganizationalUnit::new("Sales")).await.unwrap();
        let renamed = ous
            .update(
                &ou.guid,
                &OuUpdate {
                    name: Some("Sales+Marketing".to_string()),
                    ..OuUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.dn, r"OU=Sales\+Marketing,DC=example,DC=com");
    }

    #[tokio::test]
    async fn test_delete_non_empty_ou_fails() {
        let (dir, _, ous) = manager();
        let ou = ous.create(&NewOrganizationalUnit::new("Staff")).await.unwrap();
        dir.insert(Entry::new("CN=Bob,OU=Staff,DC=example,DC=com").with("objectClass", "user"));

        let err = ous.delete(&ou.guid).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Ldap { rc: 66, .. }));
        assert!(ous.get(&ou.guid).await.is_ok());
    }
}
