//! Security and distribution groups.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::membership::{compute_membership_diff, fetch_members, MembershipDiff};
use super::{guid_of, required, set_or_clear, ObjectStore};
use crate::cache::CacheManager;
use crate::codec::{encode_sid, escape_dn_value, normalize_dn_case};
use crate::error::{DirectoryError, DirectoryResult};
use crate::normalizer::IdentityNormalizer;
use crate::operation::{Entry, Modification, NewEntry};
use crate::traits::Directory;

const GROUP_CLASS: &str = "group";
const DEFAULT_CONTAINER: &str = "CN=Users";
const GROUP_ATTRIBUTES: &[&str] = &[
    "objectClass",
    "objectGUID",
    "objectSid",
    "cn",
    "sAMAccountName",
    "description",
    "groupType",
];

/// `groupType` bit flags.
pub mod group_type {
    /// Created by the system (builtin groups).
    pub const BUILTIN_LOCAL: u32 = 0x0000_0001;
    /// Global scope.
    pub const GLOBAL: u32 = 0x0000_0002;
    /// Domain-local scope.
    pub const DOMAIN_LOCAL: u32 = 0x0000_0004;
    /// Universal scope.
    pub const UNIVERSAL: u32 = 0x0000_0008;
    /// Security-enabled (otherwise distribution).
    pub const SECURITY: u32 = 0x8000_0000;
}

/// Group scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupScope {
    #[default]
    Global,
    DomainLocal,
    Universal,
}

impl GroupScope {
    fn flag(self) -> u32 {
        match self {
            Self::Global => group_type::GLOBAL,
            Self::DomainLocal => group_type::DOMAIN_LOCAL,
            Self::Universal => group_type::UNIVERSAL,
        }
    }

    /// AD refuses to convert directly between global and domain-local.
    fn needs_universal_step(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Global, Self::DomainLocal) | (Self::DomainLocal, Self::Global)
        )
    }
}

/// Group category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupCategory {
    #[default]
    Security,
    Distribution,
}

/// Encode scope and category as the signed `groupType` integer AD stores.
pub fn encode_group_type(scope: GroupScope, category: GroupCategory) -> i32 {
    let mut bits = scope.flag();
    if category == GroupCategory::Security {
        bits |= group_type::SECURITY;
    }
    i32::from_ne_bytes(bits.to_ne_bytes())
}

/// Decode a `groupType` value.
pub fn decode_group_type(value: i32) -> DirectoryResult<(GroupScope, GroupCategory)> {
    let bits = u32::from_ne_bytes(value.to_ne_bytes());
    let scope = if bits & group_type::GLOBAL != 0 {
        GroupScope::Global
    } else if bits & group_type::DOMAIN_LOCAL != 0 {
        GroupScope::DomainLocal
    } else if bits & group_type::UNIVERSAL != 0 {
        GroupScope::Universal
    } else {
        return Err(DirectoryError::codec(format!(
            "groupType {value} carries no scope"
        )));
    };
    let category = if bits & group_type::SECURITY != 0 {
        GroupCategory::Security
    } else {
        GroupCategory::Distribution
    };
    Ok((scope, category))
}

/// A group as read from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub guid: String,
    pub sid: String,
    pub dn: String,
    pub name: String,
    pub sam_account_name: String,
    pub description: Option<String>,
    pub scope: GroupScope,
    pub category: GroupCategory,
}

impl Group {
    fn from_entry(entry: &Entry) -> DirectoryResult<Self> {
        let sid = entry
            .first_bytes("objectSid")
            .map(encode_sid)
            .transpose()?
            .ok_or_else(|| DirectoryError::internal(format!("{}: objectSid missing", entry.dn)))?;
        let raw_type = required(entry, "groupType")?;
        let value = raw_type.parse::<i32>().map_err(|_| {
            DirectoryError::codec(format!("{}: groupType '{raw_type}' is not an integer", entry.dn))
        })?;
        let (scope, category) = decode_group_type(value)?;

        Ok(Self {
            guid: guid_of(entry)?,
            sid,
            dn: normalize_dn_case(&entry.dn),
            name: required(entry, "cn")?,
            sam_account_name: required(entry, "sAMAccountName")?,
            description: entry.first("description").map(str::to_string),
            scope,
            category,
        })
    }
}

/// Parameters for a new group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    /// Common name; becomes the RDN.
    pub name: String,
    /// Defaults to `name`.
    #[serde(default)]
    pub sam_account_name: Option<String>,
    /// Parent container DN; defaults to `CN=Users` under the naming context.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub scope: GroupScope,
    #[serde(default)]
    pub category: GroupCategory,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sam_account_name: None,
            container: None,
            scope: GroupScope::default(),
            category: GroupCategory::default(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_sam_account_name(mut self, sam: impl Into<String>) -> Self {
        self.sam_account_name = Some(sam.into());
        self
    }

    #[must_use]
    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: GroupScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: GroupCategory) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Changes to an existing group. `None` leaves a field alone; an empty
/// description clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sam_account_name: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scope: Option<GroupScope>,
    #[serde(default)]
    pub category: Option<GroupCategory>,
}

/// Group CRUD and membership reconciliation.
pub struct GroupManager<D: ?Sized> {
    store: ObjectStore<D>,
    normalizer: IdentityNormalizer<D>,
}

impl<D: ?Sized> Clone for GroupManager<D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            normalizer: self.normalizer.clone(),
        }
    }
}

impl<D> GroupManager<D>
where
    D: Directory + ?Sized,
{
    pub fn new(directory: Arc<D>, cache: Arc<CacheManager>) -> Self {
        let normalizer = IdentityNormalizer::new(Arc::clone(&directory), Arc::clone(&cache));
        Self {
            store: ObjectStore::new(directory, cache),
            normalizer,
        }
    }

    /// Bound concurrent member lookups in [`Self::set_members`].
    #[must_use]
    pub fn with_lookup_concurrency(mut self, concurrency: usize) -> Self {
        self.normalizer = self.normalizer.with_concurrency(concurrency);
        self
    }

    #[instrument(skip(self, new_group), fields(name = %new_group.name))]
    pub async fn create(&self, new_group: &NewGroup) -> DirectoryResult<Group> {
        let container = self
            .store
            .container_or(new_group.container.as_deref(), Some(DEFAULT_CONTAINER));
        let dn = format!("CN={},{container}", escape_dn_value(&new_group.name));
        let sam = new_group.sam_account_name.as_deref().unwrap_or(&new_group.name);
        let group_type = encode_group_type(new_group.scope, new_group.category);

        let entry = NewEntry::new(dn.clone())
            .with_values("objectClass", ["top", GROUP_CLASS])
            .with("cn", new_group.name.as_str())
            .with("sAMAccountName", sam)
            .with("groupType", group_type.to_string())
            .with_opt(
                "description",
                new_group.description.as_deref().filter(|d| !d.is_empty()),
            );
        self.store.directory().add(entry).await?;

        let group = Group::from_entry(&self.store.reload(&dn, GROUP_ATTRIBUTES).await?)?;
        info!(dn = %group.dn, guid = %group.guid, "Group created");
        Ok(group)
    }

    pub async fn get(&self, guid: &str) -> DirectoryResult<Group> {
        let entry = self
            .store
            .find_by_guid(guid, GROUP_CLASS, GROUP_ATTRIBUTES)
            .await?;
        Group::from_entry(&entry)
    }

    /// Apply `update`. Swapping Global and DomainLocal takes two writes; if
    /// the second fails the group is left Universal.
    #[instrument(skip(self, update))]
    pub async fn update(&self, guid: &str, update: &GroupUpdate) -> DirectoryResult<Group> {
        let entry = self
            .store
            .find_by_guid(guid, GROUP_CLASS, GROUP_ATTRIBUTES)
            .await?;
        let current = Group::from_entry(&entry)?;

        let mut changes = Vec::new();
        if let Some(description) = &update.description {
            if current.description.as_deref().unwrap_or_default() != description.as_str() {
                changes.push(set_or_clear("description", description));
            }
        }
        if let Some(sam) = &update.sam_account_name {
            if &current.sam_account_name != sam {
                changes.push(Modification::replace("sAMAccountName", sam.as_str()));
            }
        }

        let scope = update.scope.unwrap_or(current.scope);
        let category = update.category.unwrap_or(current.category);
        let mut stepped = false;
        if (scope, category) != (current.scope, current.category) {
            if current.scope.needs_universal_step(scope) {
                debug!(from = ?current.scope, to = ?scope, "Converting scope through universal");
                let step = encode_group_type(GroupScope::Universal, current.category);
                self.store
                    .modify(
                        &entry.dn,
                        vec![Modification::replace("groupType", step.to_string())],
                    )
                    .await?;
                stepped = true;
            }
            let value = encode_group_type(scope, category);
            changes.push(Modification::replace("groupType", value.to_string()));
        }

        let mut written = match self.store.modify(&entry.dn, changes).await {
            Ok(written) => written,
            Err(err) => {
                if stepped {
                    // Repeating the update finishes the conversion.
                    warn!(
                        dn = %entry.dn,
                        target = ?scope,
                        error = %err,
                        "Scope change failed; group left universal"
                    );
                }
                return Err(err);
            }
        };

        let new_name = update.name.as_deref().filter(|n| *n != current.name);
        let dn = self
            .store
            .relocate(
                &entry.dn,
                "CN",
                new_name,
                update.container.as_deref(),
                false,
            )
            .await?;
        written |= dn != entry.dn;

        if !written {
            return Ok(current);
        }
        if update.sam_account_name.is_some() {
            self.store.cache().invalidate_dn(&dn);
        }
        let group = Group::from_entry(&self.store.reload(&dn, GROUP_ATTRIBUTES).await?)?;
        info!(dn = %group.dn, "Group updated");
        Ok(group)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, guid: &str) -> DirectoryResult<()> {
        let entry = self
            .store
            .find_by_guid(guid, GROUP_CLASS, GROUP_ATTRIBUTES)
            .await?;
        self.store.delete(&entry.dn).await?;
        info!(dn = %entry.dn, "Group deleted");
        Ok(())
    }

    /// Current members as case-normalized DNs.
    pub async fn get_members(&self, guid: &str) -> DirectoryResult<Vec<String>> {
        let entry = self
            .store
            .find_by_guid(guid, GROUP_CLASS, GROUP_ATTRIBUTES)
            .await?;
        let members = fetch_members(self.store.directory().as_ref(), &entry.dn).await?;
        Ok(members.iter().map(|dn| normalize_dn_case(dn)).collect())
    }

    /// Make the group's members exactly `desired`.
    ///
    /// Each identifier may be a DN, GUID, SID, UPN or sAMAccountName. All of
    /// them are resolved before anything is written; the changes then go out
    /// in a single modify, or not at all when membership already matches.
    #[instrument(skip(self, desired), fields(desired = desired.len()))]
    pub async fn set_members<S>(&self, guid: &str, desired: &[S]) -> DirectoryResult<MembershipDiff>
    where
        S: AsRef<str> + Sync,
    {
        let entry = self
            .store
            .find_by_guid(guid, GROUP_CLASS, GROUP_ATTRIBUTES)
            .await?;

        let resolved = self.normalizer.normalize_to_dn_batch(desired).await?;
        let desired_dns: Vec<String> = desired
            .iter()
            .filter_map(|id| resolved.get(id.as_ref()).cloned())
            .collect();

        let current = fetch_members(self.store.directory().as_ref(), &entry.dn).await?;
        let diff = compute_membership_diff(&desired_dns, &current);
        if diff.is_empty() {
            debug!(dn = %entry.dn, members = current.len(), "Membership already up to date");
            return Ok(diff);
        }

        self.store
            .modify(&entry.dn, diff.to_modifications())
            .await?;
        info!(
            dn = %entry.dn,
            added = diff.to_add.len(),
            removed = diff.to_remove.len(),
            "Group membership reconciled"
        );
        Ok(diff)
    }
}
