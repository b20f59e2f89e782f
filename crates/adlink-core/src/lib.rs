//! # Active Directory client core
//!
//! Protocol-independent building blocks for talking to an Active Directory
//! domain: identifier encoding, normalization and caching, the retry policy,
//! configuration, and the group/user/OU managers.
//!
//! ## Architecture
//!
//! Everything above the wire talks to the directory through one narrow trait:
//!
//! - [`Directory`](traits::Directory) - search/add/modify/modify_dn/delete/bind/who_am_i
//!
//! The pooled LDAP client in `adlink-ldap` implements it for production; the
//! [`InMemoryDirectory`](testing::InMemoryDirectory) fake implements it for
//! tests.
//!
//! ## Example
//!
//! ```ignore
//! use adlink_core::prelude::*;
//!
//! let cache = Arc::new(CacheManager::new());
//! let groups = GroupManager::new(directory.clone(), cache.clone());
//!
//! let group = groups.create(&NewGroup::new("Engineering")).await?;
//! groups
//!     .set_members(&group.guid, &["alice", "EXAMPLE\\bob", "carol@example.com"])
//!     .await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`codec`] - GUID, SID and DN encodings; filter escaping
//! - [`identifier`] - The five identifier forms and their classifier
//! - [`error`] - Error type with transient/permanent classification
//! - [`operation`] - Entries, filters, search requests and modifications
//! - [`traits`] - The [`Directory`](traits::Directory) capability trait
//! - [`config`] - Client configuration
//! - [`resilience`] - Retry with exponential backoff
//! - [`cache`] - Identifier → DN cache
//! - [`normalizer`] - Identifier → canonical DN resolution
//! - [`managers`] - Group, user and OU management, membership reconciliation
//! - [`testing`] - Deterministic in-memory directory

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod identifier;
pub mod managers;
pub mod normalizer;
pub mod operation;
pub mod resilience;
pub mod testing;
pub mod traits;

/// Prelude module for convenient imports.
///
/// ```
/// use adlink_core::prelude::*;
/// ```
pub mod prelude {
    // Error handling
    pub use crate::error::{DirectoryError, DirectoryResult};

    // Traits
    pub use crate::traits::Directory;

    // Identifiers and codecs
    pub use crate::codec::{decode_guid, decode_sid, encode_guid, encode_sid, normalize_dn_case};
    pub use crate::identifier::ObjectIdentifier;

    // Operations
    pub use crate::operation::{Entry, Filter, Modification, NewEntry, Scope, SearchRequest};

    // Configuration
    pub use crate::config::{
        AuthConfig, ClientConfig, PoolSettings, RetrySettings, TlsConfig, TlsMode,
    };

    // Resilience
    pub use crate::resilience::{RetryExecutor, RetryPolicy};

    // Cache and normalization
    pub use crate::cache::{CacheManager, CacheOrigin, CacheStats, WarmStats};
    pub use crate::normalizer::{IdentityNormalizer, ResolvedObject};

    // Managers
    pub use crate::managers::{
        Group, GroupCategory, GroupManager, GroupScope, GroupUpdate, MembershipDiff, NewGroup,
        NewOrganizationalUnit, NewUser, OrganizationalUnit, OuManager, OuUpdate, User,
        UserManager, UserUpdate,
    };

    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}

// Re-export async_trait for Directory implementors
pub use async_trait::async_trait;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _filter = Filter::eq("sAMAccountName", "alice");
        let _id = ObjectIdentifier::dn("cn=alice,dc=example,dc=com");
        let _cache = CacheManager::new();
        let _group = NewGroup::new("Engineering").with_scope(GroupScope::Universal);
        let _config = ClientConfig::new("example.com", AuthConfig::password("alice", "secret"));
    }
}
