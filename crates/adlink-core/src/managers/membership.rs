//! Group membership arithmetic and ranged `member` retrieval.

use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::codec::dn_key;
use crate::error::DirectoryResult;
use crate::operation::{Entry, Modification};
use crate::traits::Directory;

const MEMBER: &str = "member";
const RANGE_PREFIX: &str = "member;range=";

/// Changes needed to turn the current member list into the desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipDiff {
    /// DNs to add, spelled as desired.
    pub to_add: Vec<String>,
    /// DNs to remove, spelled as the server returned them.
    pub to_remove: Vec<String>,
}

impl MembershipDiff {
    /// True when nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// The single modify request carrying both deltas.
    pub fn to_modifications(&self) -> Vec<Modification> {
        let mut changes = Vec::with_capacity(2);
        if !self.to_add.is_empty() {
            changes.push(Modification::add(MEMBER, self.to_add.iter()));
        }
        if !self.to_remove.is_empty() {
            changes.push(Modification::delete(MEMBER, self.to_remove.iter()));
        }
        changes
    }
}

/// Compare desired and current members by DN, ignoring case.
///
/// Duplicates on either side collapse to their first occurrence, and the
/// output keeps input order.
pub fn compute_membership_diff<A, B>(desired: &[A], current: &[B]) -> MembershipDiff
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    let current_keys: HashSet<String> = current.iter().map(|dn| dn_key(dn.as_ref())).collect();
    let desired_keys: HashSet<String> = desired.iter().map(|dn| dn_key(dn.as_ref())).collect();

    let mut seen = HashSet::new();
    let to_add = desired
        .iter()
        .map(AsRef::as_ref)
        .filter(|dn| {
            let key = dn_key(dn);
            !current_keys.contains(&key) && seen.insert(key)
        })
        .map(str::to_string)
        .collect();

    let mut seen = HashSet::new();
    let to_remove = current
        .iter()
        .map(AsRef::as_ref)
        .filter(|dn| {
            let key = dn_key(dn);
            !desired_keys.contains(&key) && seen.insert(key)
        })
        .map(str::to_string)
        .collect();

    MembershipDiff { to_add, to_remove }
}

/// Split a `member;range=L-H` attribute name into its bounds; `None` high means `*`.
fn parse_range(name: &str) -> Option<(usize, Option<usize>)> {
    let bounds = name.get(RANGE_PREFIX.len()..)?;
    let (low, high) = bounds.split_once('-')?;
    let low = low.parse().ok()?;
    let high = if high == "*" {
        None
    } else {
        Some(high.parse().ok()?)
    };
    Some((low, high))
}

/// Collect one response's member values; returns the next range start, if any.
fn take_members(entry: &Entry, members: &mut Vec<String>) -> Option<usize> {
    let ranged = entry.names_with_prefix(RANGE_PREFIX).next();
    let Some(name) = ranged else {
        members.extend(entry.values(MEMBER).iter().cloned());
        return None;
    };

    members.extend(entry.values(name).iter().cloned());
    match parse_range(name) {
        Some((_, Some(high))) => high.checked_add(1),
        _ => None,
    }
}

/// Read every `member` value of `dn`, following AD's ranged retrieval.
///
/// Large groups come back as `member;range=0-1499` with the plain `member`
/// attribute empty; the next slice is requested until the server answers
/// with a `-*` range.
pub async fn fetch_members<D>(directory: &D, dn: &str) -> DirectoryResult<Vec<String>>
where
    D: Directory + ?Sized,
{
    let mut members = Vec::new();
    let Some(entry) = directory.read(dn, &[MEMBER]).await? else {
        return Err(crate::error::DirectoryError::not_found(dn));
    };

    let mut next = take_members(&entry, &mut members);
    while let Some(low) = next {
        let attribute = format!("{RANGE_PREFIX}{low}-*");
        debug!(dn = %dn, range_start = low, "Fetching next member range");
        let Some(entry) = directory.read(dn, &[attribute.as_str()]).await? else {
            break;
        };
        let before = members.len();
        next = take_members(&entry, &mut members);
        if members.len() == before {
            break;
        }
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryDirectory;

    #[test]
    fn test_membership_diff_additions_only() {
        let diff = compute_membership_diff(&["CN=a,DC=x", "CN=b,DC=x"], &[] as &[&str]);
        assert_eq!(diff.to_add, vec!["CN=a,DC=x", "CN=b,DC=x"]);
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn test_membership_diff_mixed() {
        let diff = compute_membership_diff(
            &["CN=a,DC=x", "CN=new,DC=x"],
            &["cn=A,dc=x", "CN=old,DC=x"],
        );
        assert_eq!(diff.to_add, vec!["CN=new,DC=x"]);
        assert_eq!(diff.to_remove, vec!["CN=old,DC=x"]);
    }

    #[test]
    fn test_membership_diff_ignores_case_and_duplicates() {
        let diff = compute_membership_diff(
            &["CN=Alice,DC=x", "cn=alice,dc=x", "CN=Bob,DC=x"],
            &["CN=BOB,DC=X"],
        );
        assert_eq!(diff.to_add, vec!["CN=Alice,DC=x"]);
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn test_membership_diff_identical_is_empty() {
        let diff = compute_membership_diff(&["CN=a,DC=x"], &["CN=a, DC=x"]);
        assert!(diff.is_empty());
        assert!(diff.to_modifications().is_empty());
    }

    #[test]
    fn test_modifications_carry_both_deltas() {
        let diff = MembershipDiff {
            to_add: vec!["CN=a".to_string()],
            to_remove: vec!["CN=b".to_string()],
        };
        let mods = diff.to_modifications();
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0], Modification::add("member", ["CN=a"]));
        assert_eq!(mods[1], Modification::delete("member", ["CN=b"]));
    }

    #[test]
    fn test_range_at_usize_max_ends_retrieval() {
        let entry = Entry::new("CN=g")
            .with(format!("member;range=0-{}", usize::MAX), "CN=a,DC=x");
        let mut members = Vec::new();
        assert_eq!(take_members(&entry, &mut members), None);
        assert_eq!(members, vec!["CN=a,DC=x"]);

        let entry = Entry::new("CN=g").with("member;range=0-1499", "CN=a,DC=x");
        assert_eq!(take_members(&entry, &mut Vec::new()), Some(1500));
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("member;range=0-1499"), Some((0, Some(1499))));
        assert_eq!(parse_range("member;range=1500-*"), Some((1500, None)));
        assert_eq!(parse_range("member;range=x-1"), None);
    }

    #[tokio::test]
    async fn test_fetch_members_follows_ranges() {
        let dir = InMemoryDirectory::new("DC=example,DC=com").with_range_limit(3);
        let group = (0..8).fold(
            Entry::new("CN=Big,DC=example,DC=com").with("objectClass", "group"),
            |e, i| e.with("member", format!("CN=U{i},DC=example,DC=com")),
        );
        dir.insert(group);

        let members = fetch_members(&dir, "CN=Big,DC=example,DC=com").await.unwrap();
        assert_eq!(members.len(), 8);
        assert_eq!(members[0], "CN=U0,DC=example,DC=com");
        assert_eq!(members[7], "CN=U7,DC=example,DC=com");
        assert_eq!(dir.search_count(), 3);
    }

    #[tokio::test]
    async fn test_fetch_members_of_empty_group() {
        let dir = InMemoryDirectory::new("DC=example,DC=com");
        dir.insert(Entry::new("CN=Empty,DC=example,DC=com").with("objectClass", "group"));
        let members = fetch_members(&dir, "CN=Empty,DC=example,DC=com").await.unwrap();
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_members_of_missing_group() {
        let dir = InMemoryDirectory::new("DC=example,DC=com");
        let err = fetch_members(&dir, "CN=Nope,DC=example,DC=com").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
