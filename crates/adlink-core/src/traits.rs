//! Directory capability trait
//!
//! The narrow set of protocol operations the higher layers need. The pooled
//! LDAP client and the in-memory fake both implement it, so managers, the
//! normalizer and the cache never see a connection.

use async_trait::async_trait;

use crate::error::{DirectoryError, DirectoryResult};
use crate::operation::{Entry, Filter, Modification, NewEntry, SearchRequest};

/// Operations against one Active Directory naming context.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Default naming context (e.g. `DC=corp,DC=example,DC=com`).
    fn base_dn(&self) -> &str;

    /// Run a search and collect every entry (all pages when paging is requested).
    async fn search(&self, request: SearchRequest) -> DirectoryResult<Vec<Entry>>;

    /// Create an entry.
    async fn add(&self, entry: NewEntry) -> DirectoryResult<()>;

    /// Apply all modifications to `dn` in one request.
    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> DirectoryResult<()>;

    /// Rename and/or move an entry.
    ///
    /// `new_rdn` is the complete new RDN (`CN=New Name`); `new_superior`
    /// moves the entry under another container when set.
    async fn modify_dn(
        &self,
        dn: &str,
        new_rdn: &str,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()>;

    /// Delete a leaf entry.
    async fn delete(&self, dn: &str) -> DirectoryResult<()>;

    /// Establish an authenticated session, failing if the credentials are rejected.
    async fn bind(&self) -> DirectoryResult<()>;

    /// RFC 4532 "Who am I?"; returns the authorization identity.
    async fn who_am_i(&self) -> DirectoryResult<String>;

    /// Read a single entry by DN, `None` if it does not exist.
    async fn read(&self, dn: &str, attributes: &[&str]) -> DirectoryResult<Option<Entry>> {
        let request = SearchRequest::base_object(dn).with_attributes(attributes.iter().copied());
        match self.search(request).await {
            Ok(entries) => Ok(entries.into_iter().next()),
            Err(DirectoryError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Subtree search under the naming context requiring exactly one match.
    ///
    /// Zero matches is `NotFound`, more than one is `AmbiguousIdentifier`;
    /// `identifier` names the lookup in both errors.
    async fn search_unique(
        &self,
        identifier: &str,
        filter: Filter,
        attributes: &[&str],
    ) -> DirectoryResult<Entry> {
        let request = SearchRequest::subtree(self.base_dn(), filter)
            .with_attributes(attributes.iter().copied());
        let mut entries = self.search(request).await?;
        match entries.len() {
            0 => Err(DirectoryError::not_found(identifier)),
            1 => Ok(entries.remove(0)),
            n => Err(DirectoryError::AmbiguousIdentifier {
                identifier: identifier.to_string(),
                matches: n,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryDirectory;

    fn directory() -> InMemoryDirectory {
        let dir = InMemoryDirectory::new("DC=example,DC=com");
        dir.insert(
            Entry::new("CN=Alice,OU=Staff,DC=example,DC=com")
                .with("objectClass", "user")
                .with("sAMAccountName", "alice"),
        );
        dir.insert(
            Entry::new("CN=Alice2,OU=Staff,DC=example,DC=com")
                .with("objectClass", "user")
                .with("sAMAccountName", "alice")
                .with("description", "duplicate"),
        );
        dir
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = directory();
        assert!(dir
            .read("CN=Nobody,DC=example,DC=com", &[])
            .await
            .unwrap()
            .is_none());
        let found = dir
            .read("cn=alice,ou=staff,dc=example,dc=com", &["sAMAccountName"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.first("sAMAccountName"), Some("alice"));
    }

    #[tokio::test]
    async fn test_search_unique_reports_ambiguity_and_absence() {
        let dir = directory();
        let err = dir
            .search_unique("alice", Filter::eq("sAMAccountName", "alice"), &[])
            .await
            .unwrap_err();
        match err {
            DirectoryError::AmbiguousIdentifier { matches, .. } => assert_eq!(matches, 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }

        let err = dir
            .search_unique("bob", Filter::eq("sAMAccountName", "bob"), &[])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
