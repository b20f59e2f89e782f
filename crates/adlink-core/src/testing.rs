//! Deterministic in-memory [`Directory`].
//!
//! Behaves like a single Active Directory domain controller closely enough
//! for the managers and the normalizer: server-assigned objectGUID/objectSid,
//! ranged `member` retrieval, referential integrity of `member` on rename and
//! delete, and AD's result codes for conflicting writes. Every call is
//! counted so tests can assert how many round trips an operation needed.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::codec::{decode_sid, dn_key, parent_dn, rdn_of};
use crate::error::{rc, DirectoryError, DirectoryResult};
use crate::operation::{Entry, Filter, ModOp, Modification, NewEntry, Scope, SearchRequest};
use crate::traits::Directory;

const BINARY_ATTRIBUTES: [&str; 3] = ["objectGUID", "objectSid", "unicodePwd"];
const DOMAIN_SID_PREFIX: &str = "S-1-5-21-1004336348-1177238915-682003330";
const FIRST_RID: u32 = 1100;

fn is_binary(name: &str) -> bool {
    BINARY_ATTRIBUTES.iter().any(|b| b.eq_ignore_ascii_case(name))
}

fn is_dn_valued(name: &str) -> bool {
    ["member", "memberOf", "manager", "distinguishedName"]
        .iter()
        .any(|a| a.eq_ignore_ascii_case(name))
}

fn values_match(attribute: &str, a: &str, b: &str) -> bool {
    if is_dn_valued(attribute) {
        dn_key(a) == dn_key(b)
    } else {
        a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
    }
}

fn rdn_depth(dn: &str) -> usize {
    let mut depth = 1;
    let mut rest = dn;
    while let Some(parent) = parent_dn(rest) {
        depth += 1;
        rest = parent;
    }
    depth
}

fn leading_rdns(dn: &str, count: usize) -> String {
    let mut parts = Vec::with_capacity(count);
    let mut rest = Some(dn);
    for _ in 0..count {
        let Some(current) = rest else { break };
        parts.push(rdn_of(current));
        rest = parent_dn(current);
    }
    parts.join(",")
}

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedWrite {
    /// An add of the given DN.
    Add(String),
    /// A modify of the given DN.
    Modify(String, Vec<Modification>),
    /// A rename/move from the first DN to the second.
    ModifyDn(String, String),
    /// A delete of the given DN.
    Delete(String),
}

/// In-memory directory for tests and examples.
pub struct InMemoryDirectory {
    base_dn: String,
    entries: Mutex<BTreeMap<String, Entry>>,
    writes: Mutex<Vec<RecordedWrite>>,
    searches: AtomicUsize,
    next_rid: AtomicU32,
    range_limit: AtomicUsize,
    failures: AtomicUsize,
    writes_before_failure: AtomicUsize,
}

impl std::fmt::Debug for InMemoryDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDirectory")
            .field("base_dn", &self.base_dn)
            .field("entries", &self.lock_entries().len())
            .finish()
    }
}

impl InMemoryDirectory {
    /// Create an empty directory rooted at `base_dn`.
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            entries: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            searches: AtomicUsize::new(0),
            next_rid: AtomicU32::new(FIRST_RID),
            range_limit: AtomicUsize::new(1500),
            failures: AtomicUsize::new(0),
            writes_before_failure: AtomicUsize::new(usize::MAX),
        }
    }

    /// Limit `member` values per response, as AD's MaxValRange does.
    pub fn with_range_limit(self, limit: usize) -> Self {
        self.range_limit.store(limit.max(1), Ordering::SeqCst);
        self
    }

    /// Fail the next `count` operations with a transient connection error.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Let `successes` more writes through, then fail the one after once.
    pub fn fail_write_after(&self, successes: usize) {
        self.writes_before_failure.store(successes, Ordering::SeqCst);
    }

    fn injected_failure(&self, write: bool) -> DirectoryResult<()> {
        let pending = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let write_due = || {
            self.writes_before_failure
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                    usize::MAX => None,
                    0 => Some(usize::MAX),
                    n => Some(n - 1),
                })
                == Ok(0)
        };
        if pending || (write && write_due()) {
            return Err(DirectoryError::connection_failed("connection reset by peer"));
        }
        Ok(())
    }

    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, write: RecordedWrite) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(write);
    }

    /// Insert or replace an entry directly, bypassing counters.
    pub fn insert(&self, entry: Entry) {
        self.lock_entries().insert(dn_key(&entry.dn), entry);
    }

    /// Current state of an entry.
    pub fn get(&self, dn: &str) -> Option<Entry> {
        self.lock_entries().get(&dn_key(dn)).cloned()
    }

    /// Number of entries stored.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the directory holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Searches served so far.
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Writes performed so far.
    pub fn write_count(&self) -> usize {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// All writes in order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget recorded writes and search counts.
    pub fn reset_counters(&self) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.searches.store(0, Ordering::SeqCst);
    }

    fn in_scope(dn: &str, base: &str, scope: Scope) -> bool {
        let dn = dn_key(dn);
        let base = dn_key(base);
        match scope {
            Scope::Base => dn == base,
            Scope::OneLevel => parent_dn(&dn).is_some_and(|p| p == base),
            Scope::Subtree => {
                base.is_empty() || dn == base || dn.ends_with(&format!(",{base}"))
            }
        }
    }

    fn matches(entry: &Entry, filter: &Filter) -> bool {
        match filter {
            Filter::And { filters } => filters.iter().all(|f| Self::matches(entry, f)),
            Filter::Or { filters } => filters.iter().any(|f| Self::matches(entry, f)),
            Filter::Present { attribute } => {
                // Every real entry has these.
                attribute.eq_ignore_ascii_case("distinguishedName")
                    || attribute.eq_ignore_ascii_case("objectClass")
                    || entry.has(attribute)
            }
            Filter::Equals { attribute, value } => {
                if attribute.eq_ignore_ascii_case("distinguishedName") {
                    return dn_key(&entry.dn) == dn_key(value);
                }
                entry
                    .values(attribute)
                    .iter()
                    .any(|v| values_match(attribute, v, value))
            }
            Filter::EqualsBytes { attribute, value } => {
                entry.first_bytes(attribute) == Some(value.as_slice())
            }
        }
    }

    /// Parse `member;range=L-H` / `member;range=L-*`.
    fn parse_range(requested: &str) -> Option<(String, usize)> {
        let (attr, range) = requested.split_once(';')?;
        let bounds = range
            .get(..6)
            .filter(|p| p.eq_ignore_ascii_case("range="))
            .map(|_| &range[6..])?;
        let (low, _) = bounds.split_once('-')?;
        Some((attr.to_string(), low.parse().ok()?))
    }

    /// Project an entry onto the requested attributes.
    fn project(&self, entry: &Entry, attributes: &[String]) -> Entry {
        let limit = self.range_limit.load(Ordering::SeqCst);
        let wants_all = attributes.is_empty() || attributes.iter().any(|a| a == "*");
        let mut out = Entry::new(entry.dn.clone());

        let mut requested: Vec<(String, usize, bool)> = Vec::new();
        if wants_all {
            for name in entry.attrs.keys() {
                requested.push((name.clone(), 0, false));
            }
            for name in entry.bin_attrs.keys() {
                requested.push((name.clone(), 0, false));
            }
        } else {
            for attr in attributes {
                match Self::parse_range(attr) {
                    Some((name, low)) => requested.push((name, low, true)),
                    None => requested.push((attr.clone(), 0, false)),
                }
            }
        }

        for (name, low, explicit_range) in requested {
            if let Some((key, values)) = entry
                .bin_attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&name))
            {
                out.bin_attrs.insert(key.clone(), values.clone());
                continue;
            }

            let Some((key, values)) = entry
                .attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&name))
            else {
                continue;
            };

            let ranged = key.eq_ignore_ascii_case("member")
                && (explicit_range || values.len() > limit);
            if !ranged {
                out.attrs.insert(key.clone(), values.clone());
                continue;
            }

            let low = low.min(values.len());
            let high = (low + limit).min(values.len());
            let label = if high == values.len() {
                format!("{key};range={low}-*")
            } else {
                format!("{key};range={low}-{}", high - 1)
            };
            out.attrs.insert(label, values[low..high].to_vec());
        }

        out
    }

    fn assign_identity(&self, entry: &mut Entry) {
        if !entry.has("objectGUID") {
            let guid = Uuid::new_v4().to_bytes_le().to_vec();
            entry.bin_attrs.insert("objectGUID".to_string(), vec![guid]);
        }
        let needs_sid = entry.has_object_class("user") || entry.has_object_class("group");
        if needs_sid && !entry.has("objectSid") {
            let rid = self.next_rid.fetch_add(1, Ordering::SeqCst);
            if let Ok(sid) = decode_sid(&format!("{DOMAIN_SID_PREFIX}-{rid}")) {
                entry.bin_attrs.insert("objectSid".to_string(), vec![sid]);
            }
        }
    }

    fn apply(entry: &mut Entry, change: &Modification) -> DirectoryResult<()> {
        if is_binary(&change.attribute) {
            if change.attribute.eq_ignore_ascii_case("unicodePwd") {
                // Write-only: accepted, never stored.
                return Ok(());
            }
            match change.op {
                ModOp::Replace | ModOp::Add => {
                    entry
                        .bin_attrs
                        .insert(change.attribute.clone(), change.values.clone());
                }
                ModOp::Delete => {
                    entry
                        .bin_attrs
                        .retain(|k, _| !k.eq_ignore_ascii_case(&change.attribute));
                }
            }
            return Ok(());
        }

        let key = entry
            .attrs
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&change.attribute))
            .cloned()
            .unwrap_or_else(|| change.attribute.clone());
        let incoming: Vec<String> = change.text_values().map(str::to_string).collect();

        match change.op {
            ModOp::Replace => {
                if incoming.is_empty() {
                    entry.attrs.remove(&key);
                } else {
                    entry.attrs.insert(key, incoming);
                }
            }
            ModOp::Add => {
                let current = entry.attrs.entry(key.clone()).or_default();
                for value in incoming {
                    if current.iter().any(|v| values_match(&key, v, &value)) {
                        return Err(DirectoryError::Ldap {
                            rc: 20,
                            message: format!("{}: attribute or value exists: {key}", entry.dn),
                        });
                    }
                    current.push(value);
                }
            }
            ModOp::Delete => {
                if incoming.is_empty() {
                    if entry.attrs.remove(&key).is_none() {
                        return Err(DirectoryError::Ldap {
                            rc: rc::NO_SUCH_ATTRIBUTE,
                            message: format!("{}: no such attribute: {key}", entry.dn),
                        });
                    }
                    return Ok(());
                }
                let current = entry.attrs.entry(key.clone()).or_default();
                for value in incoming {
                    let before = current.len();
                    current.retain(|v| !values_match(&key, v, &value));
                    if current.len() == before {
                        return Err(DirectoryError::Ldap {
                            rc: rc::NO_SUCH_ATTRIBUTE,
                            message: format!("{}: no such value in {key}", entry.dn),
                        });
                    }
                }
                if current.is_empty() {
                    entry.attrs.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rewrite_references(entries: &mut BTreeMap<String, Entry>, old: &str, new: Option<&str>) {
        let old_key = dn_key(old);
        for entry in entries.values_mut() {
            for (name, values) in entry.attrs.iter_mut() {
                if !is_dn_valued(name) {
                    continue;
                }
                match new {
                    Some(new) => {
                        for v in values.iter_mut() {
                            if dn_key(v) == old_key {
                                *v = new.to_string();
                            }
                        }
                    }
                    None => values.retain(|v| dn_key(v) != old_key),
                }
            }
            entry.attrs.retain(|_, v| !v.is_empty());
        }
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    fn base_dn(&self) -> &str {
        &self.base_dn
    }

    async fn search(&self, request: SearchRequest) -> DirectoryResult<Vec<Entry>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.injected_failure(false)?;
        let entries = self.lock_entries();

        if request.scope == Scope::Base && !entries.contains_key(&dn_key(&request.base)) {
            return Err(DirectoryError::from_result_code(
                rc::NO_SUCH_OBJECT,
                &request.base,
                "",
            ));
        }

        Ok(entries
            .values()
            .filter(|e| Self::in_scope(&e.dn, &request.base, request.scope))
            .filter(|e| Self::matches(e, &request.filter))
            .map(|e| self.project(e, &request.attributes))
            .collect())
    }

    async fn add(&self, new: NewEntry) -> DirectoryResult<()> {
        self.injected_failure(true)?;
        let key = dn_key(&new.dn);
        let mut entries = self.lock_entries();
        if entries.contains_key(&key) {
            return Err(DirectoryError::from_result_code(
                rc::ENTRY_ALREADY_EXISTS,
                &new.dn,
                "",
            ));
        }

        let mut entry = Entry::new(new.dn.clone());
        for (name, values) in new.attributes {
            if name.eq_ignore_ascii_case("unicodePwd") {
                continue;
            }
            if is_binary(&name) {
                entry.bin_attrs.entry(name).or_default().extend(values);
                continue;
            }
            let text = values
                .into_iter()
                .map(|v| {
                    String::from_utf8(v).map_err(|_| DirectoryError::Ldap {
                        rc: 21,
                        message: format!("{}: invalid attribute syntax: {name}", new.dn),
                    })
                })
                .collect::<DirectoryResult<Vec<_>>>()?;
            entry.attrs.entry(name).or_default().extend(text);
        }
        self.assign_identity(&mut entry);
        entries.insert(key, entry);
        drop(entries);

        self.record(RecordedWrite::Add(new.dn));
        Ok(())
    }

    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> DirectoryResult<()> {
        self.injected_failure(true)?;
        let key = dn_key(dn);
        let mut entries = self.lock_entries();
        let current = entries
            .get(&key)
            .ok_or_else(|| DirectoryError::from_result_code(rc::NO_SUCH_OBJECT, dn, ""))?;

        // All-or-nothing, like a single LDAP modify.
        let mut updated = current.clone();
        for change in &changes {
            Self::apply(&mut updated, change)?;
        }
        entries.insert(key, updated);
        drop(entries);

        self.record(RecordedWrite::Modify(dn.to_string(), changes));
        Ok(())
    }

    async fn modify_dn(
        &self,
        dn: &str,
        new_rdn: &str,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        self.injected_failure(true)?;
        let old_key = dn_key(dn);
        let mut entries = self.lock_entries();
        let mut entry = entries
            .remove(&old_key)
            .ok_or_else(|| DirectoryError::from_result_code(rc::NO_SUCH_OBJECT, dn, ""))?;

        let parent = new_superior
            .map(str::to_string)
            .or_else(|| parent_dn(dn).map(str::to_string));
        let new_dn = match parent {
            Some(parent) => format!("{new_rdn},{parent}"),
            None => new_rdn.to_string(),
        };
        let new_key = dn_key(&new_dn);
        if new_key != old_key && entries.contains_key(&new_key) {
            entries.insert(old_key, entry);
            return Err(DirectoryError::from_result_code(
                rc::ENTRY_ALREADY_EXISTS,
                &new_dn,
                "",
            ));
        }

        if let Some((naming_attr, value)) = rdn_of(&new_dn).split_once('=') {
            entry
                .attrs
                .retain(|k, _| !k.eq_ignore_ascii_case(naming_attr) && !k.eq_ignore_ascii_case("name"));
            entry
                .attrs
                .insert(naming_attr.to_ascii_lowercase(), vec![value.to_string()]);
            entry.attrs.insert("name".to_string(), vec![value.to_string()]);
        }

        // Children move with their parent.
        let child_suffix = format!(",{old_key}");
        let children: Vec<String> = entries
            .keys()
            .filter(|k| k.ends_with(&child_suffix))
            .cloned()
            .collect();
        let mut moved = Vec::with_capacity(children.len() + 1);
        for child_key in children {
            if let Some(mut child) = entries.remove(&child_key) {
                let depth = rdn_depth(&child.dn).saturating_sub(rdn_depth(dn));
                let old_child_dn = child.dn.clone();
                child.dn = format!("{},{new_dn}", leading_rdns(&child.dn, depth));
                moved.push((old_child_dn, child.dn.clone()));
                entries.insert(dn_key(&child.dn), child);
            }
        }

        entry.dn = new_dn.clone();
        entries.insert(new_key, entry);
        Self::rewrite_references(&mut entries, dn, Some(&new_dn));
        for (old, new) in &moved {
            Self::rewrite_references(&mut entries, old, Some(new));
        }
        drop(entries);

        self.record(RecordedWrite::ModifyDn(dn.to_string(), new_dn));
        Ok(())
    }

    async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        self.injected_failure(true)?;
        let key = dn_key(dn);
        let mut entries = self.lock_entries();
        if !entries.contains_key(&key) {
            return Err(DirectoryError::from_result_code(rc::NO_SUCH_OBJECT, dn, ""));
        }
        let child_suffix = format!(",{key}");
        if entries.keys().any(|k| k.ends_with(&child_suffix)) {
            return Err(DirectoryError::Ldap {
                rc: 66,
                message: format!("{dn}: not allowed on non-leaf"),
            });
        }
        entries.remove(&key);
        Self::rewrite_references(&mut entries, dn, None);
        drop(entries);

        self.record(RecordedWrite::Delete(dn.to_string()));
        Ok(())
    }

    async fn bind(&self) -> DirectoryResult<()> {
        Ok(())
    }

    async fn who_am_i(&self) -> DirectoryResult<String> {
        Ok("u:TEST\\in-memory".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_with_members(n: usize) -> Entry {
        (0..n).fold(
            Entry::new("CN=Big,DC=example,DC=com").with("objectClass", "group"),
            |e, i| e.with("member", format!("CN=U{i},DC=example,DC=com")),
        )
    }

    #[tokio::test]
    async fn test_add_assigns_guid_and_sid() {
        let dir = InMemoryDirectory::new("DC=example,DC=com");
        dir.add(
            NewEntry::new("CN=G,DC=example,DC=com")
                .with_values("objectClass", ["top", "group"])
                .with("cn", "G"),
        )
        .await
        .unwrap();

        let entry = dir.get("cn=g,dc=example,dc=com").unwrap();
        assert_eq!(entry.first_bytes("objectGUID").map(<[u8]>::len), Some(16));
        assert!(entry.first_bytes("objectSid").is_some());
        assert_eq!(dir.write_count(), 1);

        let err = dir
            .add(NewEntry::new("CN=G,DC=example,DC=com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_ranged_member_retrieval() {
        let dir = InMemoryDirectory::new("DC=example,DC=com").with_range_limit(2);
        dir.insert(group_with_members(5));

        let first = dir
            .search(SearchRequest::base_object("CN=Big,DC=example,DC=com").with_attributes(["member"]))
            .await
            .unwrap();
        assert_eq!(first[0].values("member;range=0-1").len(), 2);

        let last = dir
            .search(
                SearchRequest::base_object("CN=Big,DC=example,DC=com")
                    .with_attributes(["member;range=4-*"]),
            )
            .await
            .unwrap();
        assert_eq!(last[0].values("member;range=4-*"), ["CN=U4,DC=example,DC=com"]);
    }

    #[tokio::test]
    async fn test_modify_is_atomic() {
        let dir = InMemoryDirectory::new("DC=example,DC=com");
        dir.insert(group_with_members(1));

        let err = dir
            .modify(
                "CN=Big,DC=example,DC=com",
                vec![
                    Modification::add("member", ["CN=New,DC=example,DC=com"]),
                    Modification::delete("member", ["CN=Missing,DC=example,DC=com"]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Ldap { rc: 16, .. }));
        assert_eq!(dir.get("CN=Big,DC=example,DC=com").unwrap().values("member").len(), 1);
        assert_eq!(dir.write_count(), 0);
    }

    #[tokio::test]
    async fn test_rename_updates_member_references() {
        let dir = InMemoryDirectory::new("DC=example,DC=com");
        dir.insert(Entry::new("OU=Staff,DC=example,DC=com").with("objectClass", "organizationalUnit"));
        dir.insert(Entry::new("CN=U0,OU=Staff,DC=example,DC=com").with("cn", "U0"));
        dir.insert(
            Entry::new("CN=G,DC=example,DC=com")
                .with("member", "CN=U0,OU=Staff,DC=example,DC=com"),
        );

        dir.modify_dn("OU=Staff,DC=example,DC=com", "OU=People", None)
            .await
            .unwrap();

        assert!(dir.get("CN=U0,OU=People,DC=example,DC=com").is_some());
        assert_eq!(
            dir.get("CN=G,DC=example,DC=com").unwrap().values("member"),
            ["CN=U0,OU=People,DC=example,DC=com"]
        );
    }

    #[tokio::test]
    async fn test_delete_rejects_non_leaf_and_cleans_references() {
        let dir = InMemoryDirectory::new("DC=example,DC=com");
        dir.insert(Entry::new("OU=Staff,DC=example,DC=com"));
        dir.insert(Entry::new("CN=U0,OU=Staff,DC=example,DC=com"));
        dir.insert(Entry::new("CN=G,DC=example,DC=com").with("member", "CN=U0,OU=Staff,DC=example,DC=com"));

        assert!(dir.delete("OU=Staff,DC=example,DC=com").await.is_err());
        dir.delete("CN=U0,OU=Staff,DC=example,DC=com").await.unwrap();
        assert!(!dir.get("CN=G,DC=example,DC=com").unwrap().has("member"));
    }

    #[tokio::test]
    async fn test_injected_failures_are_retried() {
        use crate::resilience::{RetryExecutor, RetryPolicy};
        use std::time::Duration;
        use tokio_util::sync::CancellationToken;

        let dir = InMemoryDirectory::new("DC=example,DC=com");
        dir.insert(Entry::new("DC=example,DC=com"));
        let policy = |max_retries| RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: false,
        };
        let cancel = CancellationToken::new();
        let root = || dir.search(SearchRequest::base_object("DC=example,DC=com"));

        dir.fail_next(2);
        let found = RetryExecutor::new(policy(3))
            .execute(&cancel, root)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(dir.search_count(), 3);

        dir.fail_next(5);
        let err = RetryExecutor::new(policy(1))
            .execute(&cancel, root)
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::RetryExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_write_failure_after_successes() {
        let dir = InMemoryDirectory::new("DC=example,DC=com");
        dir.fail_write_after(1);

        dir.add(NewEntry::new("CN=A,DC=example,DC=com")).await.unwrap();
        let err = dir.add(NewEntry::new("CN=B,DC=example,DC=com")).await.unwrap_err();
        assert!(err.is_transient());
        dir.add(NewEntry::new("CN=B,DC=example,DC=com")).await.unwrap();
        assert_eq!(dir.write_count(), 2);
    }
}
