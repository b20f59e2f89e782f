//! User accounts.
//!
//! Passwords are written through `unicodePwd`, which AD only accepts as the
//! quoted password encoded as UTF-16LE, and only over an encrypted
//! connection. The attribute is write-only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

use super::{guid_of, required, set_or_clear, ObjectStore};
use crate::cache::CacheManager;
use crate::codec::{encode_sid, escape_dn_value, normalize_dn_case};
use crate::error::{DirectoryError, DirectoryResult};
use crate::operation::{Entry, Modification, NewEntry};
use crate::traits::Directory;

const USER_CLASS: &str = "user";
const DEFAULT_CONTAINER: &str = "CN=Users";
const USER_ATTRIBUTES: &[&str] = &[
    "objectClass",
    "objectGUID",
    "objectSid",
    "cn",
    "sAMAccountName",
    "userPrincipalName",
    "givenName",
    "sn",
    "displayName",
    "description",
    "userAccountControl",
];

/// `userAccountControl` flags.
pub mod account_control {
    pub const ACCOUNTDISABLE: u32 = 0x0002;
    pub const NORMAL_ACCOUNT: u32 = 0x0200;
}

/// Encode a plaintext password for AD's `unicodePwd` attribute.
#[instrument(skip(password))]
pub fn encode_password(password: &str) -> DirectoryResult<Vec<u8>> {
    if password.is_empty() {
        return Err(DirectoryError::invalid_config("password cannot be empty"));
    }
    let quoted = format!("\"{password}\"");
    Ok(quoted.encode_utf16().flat_map(u16::to_le_bytes).collect())
}

fn toggle_disabled(current: u32, enabled: bool) -> u32 {
    if enabled {
        current & !account_control::ACCOUNTDISABLE
    } else {
        current | account_control::ACCOUNTDISABLE
    }
}

/// A user as read from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub guid: String,
    pub sid: String,
    pub dn: String,
    pub name: String,
    pub sam_account_name: String,
    pub user_principal_name: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub enabled: bool,
    /// Raw `userAccountControl`.
    pub account_control: u32,
}

impl User {
    fn from_entry(entry: &Entry) -> DirectoryResult<Self> {
        let sid = entry
            .first_bytes("objectSid")
            .map(encode_sid)
            .transpose()?
            .ok_or_else(|| DirectoryError::internal(format!("{}: objectSid missing", entry.dn)))?;
        let raw_uac = entry.first("userAccountControl").unwrap_or("0");
        let account_control = raw_uac.parse::<u32>().map_err(|_| {
            DirectoryError::codec(format!(
                "{}: userAccountControl '{raw_uac}' is not an integer",
                entry.dn
            ))
        })?;
        let text = |name: &str| entry.first(name).map(str::to_string);

        Ok(Self {
            guid: guid_of(entry)?,
            sid,
            dn: normalize_dn_case(&entry.dn),
            name: required(entry, "cn")?,
            sam_account_name: required(entry, "sAMAccountName")?,
            user_principal_name: text("userPrincipalName"),
            given_name: text("givenName"),
            surname: text("sn"),
            display_name: text("displayName"),
            description: text("description"),
            enabled: account_control & account_control::ACCOUNTDISABLE == 0,
            account_control,
        })
    }
}

/// Parameters for a new user.
#[derive(Clone, Deserialize)]
pub struct NewUser {
    /// Common name; becomes the RDN.
    pub name: String,
    pub sam_account_name: String,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    /// Parent container DN; defaults to `CN=Users` under the naming context.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Initial password.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("name", &self.name)
            .field("sam_account_name", &self.sam_account_name)
            .field("user_principal_name", &self.user_principal_name)
            .field("container", &self.container)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl NewUser {
    pub fn new(name: impl Into<String>, sam_account_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sam_account_name: sam_account_name.into(),
            user_principal_name: None,
            container: None,
            given_name: None,
            surname: None,
            display_name: None,
            description: None,
            password: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_upn(mut self, upn: impl Into<String>) -> Self {
        self.user_principal_name = Some(upn.into());
        self
    }

    #[must_use]
    pub fn in_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    #[must_use]
    pub fn with_names(mut self, given_name: impl Into<String>, surname: impl Into<String>) -> Self {
        self.given_name = Some(given_name.into());
        self.surname = Some(surname.into());
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Changes to an existing user. `None` leaves a field alone; an empty string
/// clears an optional attribute.
#[derive(Clone, Default, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub sam_account_name: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Administrative password reset.
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for UserUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserUpdate")
            .field("name", &self.name)
            .field("container", &self.container)
            .field("sam_account_name", &self.sam_account_name)
            .field("enabled", &self.enabled)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// User CRUD.
pub struct UserManager<D: ?Sized> {
    store: ObjectStore<D>,
}

impl<D: ?Sized> Clone for UserManager<D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<D> UserManager<D>
where
    D: Directory + ?Sized,
{
    pub fn new(directory: Arc<D>, cache: Arc<CacheManager>) -> Self {
        Self {
            store: ObjectStore::new(directory, cache),
        }
    }

    /// Create a user.
    ///
    /// The account is added disabled together with its password and enabled
    /// by a second modify, the order AD's password policy requires.
    #[instrument(skip(self, new_user), fields(sam = %new_user.sam_account_name))]
    pub async fn create(&self, new_user: &NewUser) -> DirectoryResult<User> {
        let container = self
            .store
            .container_or(new_user.container.as_deref(), Some(DEFAULT_CONTAINER));
        let dn = format!("CN={},{container}", escape_dn_value(&new_user.name));
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        let disabled = account_control::NORMAL_ACCOUNT | account_control::ACCOUNTDISABLE;

        let mut entry = NewEntry::new(dn.clone())
            .with_values(
                "objectClass",
                ["top", "person", "organizationalPerson", USER_CLASS],
            )
            .with("cn", new_user.name.as_str())
            .with("sAMAccountName", new_user.sam_account_name.as_str())
            .with_opt("userPrincipalName", non_empty(&new_user.user_principal_name))
            .with_opt("givenName", non_empty(&new_user.given_name))
            .with_opt("sn", non_empty(&new_user.surname))
            .with_opt("displayName", non_empty(&new_user.display_name))
            .with_opt("description", non_empty(&new_user.description))
            .with("userAccountControl", disabled.to_string());
        if let Some(password) = &new_user.password {
            entry = entry.with_bytes("unicodePwd", encode_password(password)?);
        }
        self.store.directory().add(entry).await?;

        if new_user.enabled {
            let enabled = toggle_disabled(disabled, true);
            self.store
                .modify(
                    &dn,
                    vec![Modification::replace("userAccountControl", enabled.to_string())],
                )
                .await?;
        }

        let user = User::from_entry(&self.store.reload(&dn, USER_ATTRIBUTES).await?)?;
        info!(dn = %user.dn, guid = %user.guid, enabled = user.enabled, "User created");
        Ok(user)
    }

    pub async fn get(&self, guid: &str) -> DirectoryResult<User> {
        let entry = self
            .store
            .find_by_guid(guid, USER_CLASS, USER_ATTRIBUTES)
            .await?;
        User::from_entry(&entry)
    }

    #[instrument(skip(self, update))]
    pub async fn update(&self, guid: &str, update: &UserUpdate) -> DirectoryResult<User> {
        let entry = self
            .store
            .find_by_guid(guid, USER_CLASS, USER_ATTRIBUTES)
            .await?;
        let current = User::from_entry(&entry)?;

        let mut changes = Vec::new();
        let optional = [
            ("userPrincipalName", &update.user_principal_name, &current.user_principal_name),
            ("givenName", &update.given_name, &current.given_name),
            ("sn", &update.surname, &current.surname),
            ("displayName", &update.display_name, &current.display_name),
            ("description", &update.description, &current.description),
        ];
        for (attribute, wanted, have) in optional {
            if let Some(wanted) = wanted {
                if have.as_deref().unwrap_or_default() != wanted.as_str() {
                    changes.push(set_or_clear(attribute, wanted));
                }
            }
        }
        if let Some(sam) = &update.sam_account_name {
            if &current.sam_account_name != sam {
                changes.push(Modification::replace("sAMAccountName", sam.as_str()));
            }
        }
        if let Some(enabled) = update.enabled {
            if enabled != current.enabled {
                let value = toggle_disabled(current.account_control, enabled);
                changes.push(Modification::replace("userAccountControl", value.to_string()));
            }
        }
        if let Some(password) = &update.password {
            changes.push(Modification::replace_bytes(
                "unicodePwd",
                encode_password(password)?,
            ));
        }

        let identity_changed = changes.iter().any(|c| {
            c.attribute.eq_ignore_ascii_case("sAMAccountName")
                || c.attribute.eq_ignore_ascii_case("userPrincipalName")
        });
        let mut written = self.store.modify(&entry.dn, changes).await?;

        let new_name = update.name.as_deref().filter(|n| *n != current.name);
        let dn = self
            .store
            .relocate(&entry.dn, "CN", new_name, update.container.as_deref(), false)
            .await?;
        written |= dn != entry.dn;

        if !written {
            return Ok(current);
        }
        if identity_changed {
            self.store.cache().invalidate_dn(&dn);
        }
        let user = User::from_entry(&self.store.reload(&dn, USER_ATTRIBUTES).await?)?;
        info!(dn = %user.dn, "User updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, guid: &str) -> DirectoryResult<()> {
        let entry = self
            .store
            .find_by_guid(guid, USER_CLASS, USER_ATTRIBUTES)
            .await?;
        self.store.delete(&entry.dn).await?;
        info!(dn = %entry.dn, "User deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryDirectory, RecordedWrite};

    const BASE: &str = "DC=example,DC=com";

    fn manager() -> (Arc<InMemoryDirectory>, UserManager<InMemoryDirectory>) {
        let dir = Arc::new(InMemoryDirectory::new(BASE));
        dir.insert(Entry::new(format!("CN=Users,{BASE}")).with("objectClass", "container"));
        let users = UserManager::new(dir.clone(), Arc::new(CacheManager::new()));
        (dir, users)
    }

    #[test]
    fn test_encode_password() {
        let encoded = encode_password("abc").unwrap();
        // "abc" with quotes, UTF-16LE
        assert_eq!(
            encoded,
            vec![0x22, 0x00, 0x61, 0x00, 0x62, 0x00, 0x63, 0x00, 0x22, 0x00]
        );
    }

    #[test]
    fn test_encode_password_non_ascii() {
        let encoded = encode_password("é").unwrap();
        assert_eq!(encoded, vec![0x22, 0x00, 0xe9, 0x00, 0x22, 0x00]);
    }

    #[test]
    fn test_encode_password_empty() {
        assert!(encode_password("").is_err());
    }

    #[test]
    fn test_account_control_toggles_only_disable_bit() {
        let dont_expire = 0x1_0000;
        assert_eq!(toggle_disabled(0x202 | dont_expire, true), 0x200 | dont_expire);
        assert_eq!(toggle_disabled(0x200, false), 0x202);
        assert_eq!(toggle_disabled(0x200, true), 0x200);
    }

    #[test]
    fn test_debug_redacts_password() {
        let new_user = NewUser::new("Alice", "alice").with_password("hunter2");
        assert!(!format!("{new_user:?}").contains("hunter2"));
        let update = UserUpdate {
            password: Some("hunter2".to_string()),
            ..UserUpdate::default()
        };
        assert!(!format!("{update:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_create_enabled_user() {
        let (dir, users) = manager();
        let user = users
            .create(
                &NewUser::new("Alice Smith", "alice")
                    .with_upn("alice@example.com")
                    .with_names("Alice", "Smith")
                    .with_password("S3cret!pass"),
            )
            .await
            .unwrap();

        assert_eq!(user.dn, "CN=Alice Smith,CN=Users,DC=example,DC=com");
        assert!(user.enabled);
        assert_eq!(user.account_control, 0x200);
        assert_eq!(user.surname.as_deref(), Some("Smith"));

        let writes = dir.writes();
        assert_eq!(writes.len(), 2);
        assert!(matches!(&writes[0], RecordedWrite::Add(_)));
    }

    #[tokio::test]
    async fn test_create_disabled_user_is_one_write() {
        let (dir, users) = manager();
        let user = users
            .create(&NewUser::new("Bob", "bob").disabled())
            .await
            .unwrap();
        assert!(!user.enabled);
        assert_eq!(dir.write_count(), 1);
    }

    #[tokio::test]
    async fn test_update_disable_and_move() {
        let (dir, users) = manager();
        dir.insert(Entry::new(format!("OU=Leavers,{BASE}")).with("objectClass", "organizationalUnit"));
        let user = users.create(&NewUser::new("Carol", "carol")).await.unwrap();

        let updated = users
            .update(
                &user.guid,
                &UserUpdate {
                    enabled: Some(false),
                    container: Some(format!("OU=Leavers,{BASE}")),
                    display_name: Some("Carol (left)".to_string()),
                    ..UserUpdate::default()
                },
            )
            .await
            .unwrap();

        assert!(!updated.enabled);
        assert_eq!(updated.dn, "CN=Carol,OU=Leavers,DC=example,DC=com");
        assert_eq!(updated.display_name.as_deref(), Some("Carol (left)"));
        assert_eq!(users.get(&user.guid).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_password_reset_is_written() {
        let (dir, users) = manager();
        let user = users.create(&NewUser::new("Dave", "dave")).await.unwrap();
        dir.reset_counters();

        users
            .update(
                &user.guid,
                &UserUpdate {
                    password: Some("N3w!pass".to_string()),
                    ..UserUpdate::default()
                },
            )
            .await
            .unwrap();

        match &dir.writes()[..] {
            [RecordedWrite::Modify(_, mods)] => {
                assert_eq!(mods[0].attribute, "unicodePwd");
                assert_eq!(mods[0].values[0], encode_password("N3w!pass").unwrap());
            }
            other => panic!("unexpected writes: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_group_guid_is_not_a_user() {
        let (dir, users) = manager();
        dir.insert(
            Entry::new(format!("CN=G,CN=Users,{BASE}"))
                .with("objectClass", "group")
                .with_bytes("objectGUID", vec![7; 16]),
        );
        let guid = crate::codec::encode_guid(&[7; 16]).unwrap();
        assert!(users.get(&guid).await.unwrap_err().is_not_found());
    }
}
