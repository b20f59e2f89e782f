//! Group membership reconciliation.
//!
//! These tests verify that `set_members`:
//! - accepts every identifier form and writes canonical DNs
//! - issues a single modify carrying both deltas
//! - performs no write at all once membership matches
//! - handles groups larger than one ranged-retrieval window

mod common;

use adlink_core::codec::dn_equal;
use adlink_core::prelude::*;
use adlink_core::testing::{InMemoryDirectory, RecordedWrite};
use common::*;

fn groups(dir: &Arc<InMemoryDirectory>) -> GroupManager<InMemoryDirectory> {
    GroupManager::new(dir.clone(), Arc::new(CacheManager::new()))
}

#[tokio::test]
async fn test_mixed_identifiers_reconcile_to_dns() {
    let dir = seeded_directory();
    let groups = groups(&dir);
    let group = groups.create(&NewGroup::new("Engineering")).await.unwrap();
    dir.reset_counters();

    let desired = vec![
        "alice".to_string(),
        user_guid_text(1),
        user_sid_text(2),
        "dave@corp.example.com".to_string(),
    ];
    let diff = groups.set_members(&group.guid, &desired).await.unwrap();
    assert_eq!(diff.to_add.len(), 4);
    assert!(diff.to_remove.is_empty());

    let mut members = groups.get_members(&group.guid).await.unwrap();
    members.sort();
    let mut expected: Vec<String> = ["Alice", "Bob", "Carol", "Dave"]
        .iter()
        .map(|cn| normalize_dn_case(&user_dn(cn)))
        .collect();
    expected.sort();
    assert_eq!(members, expected);
    assert_eq!(dir.write_count(), 1);
}

#[tokio::test]
async fn test_second_run_performs_zero_writes() {
    let dir = seeded_directory();
    let groups = groups(&dir);
    let group = groups.create(&NewGroup::new("Ops")).await.unwrap();

    let desired = ["alice", "bob"];
    groups.set_members(&group.guid, &desired).await.unwrap();
    dir.reset_counters();

    let diff = groups.set_members(&group.guid, &desired).await.unwrap();
    assert!(diff.is_empty());
    assert_eq!(dir.write_count(), 0);

    // Same set named differently is still a no-op.
    let renamed = [user_dn("Bob").to_uppercase(), user_guid_text(0)];
    let diff = groups.set_members(&group.guid, &renamed).await.unwrap();
    assert!(diff.is_empty());
    assert_eq!(dir.write_count(), 0);
}

#[tokio::test]
async fn test_duplicate_dn_yields_one_add() {
    let dir = seeded_directory();
    let groups = groups(&dir);
    let group = groups.create(&NewGroup::new("Dupes")).await.unwrap();
    dir.reset_counters();

    let alice = user_dn("Alice");
    let desired = [alice.clone(), alice.to_lowercase(), "alice".to_string()];
    let diff = groups.set_members(&group.guid, &desired).await.unwrap();

    assert_eq!(diff.to_add, vec![normalize_dn_case(&alice)]);
    match &dir.writes()[..] {
        [RecordedWrite::Modify(_, mods)] => {
            assert_eq!(mods.len(), 1);
            assert_eq!(mods[0].values.len(), 1);
        }
        other => panic!("unexpected writes: {other:?}"),
    }
}

#[tokio::test]
async fn test_add_and_remove_in_one_modify() {
    let dir = seeded_directory();
    let groups = groups(&dir);
    let group = groups.create(&NewGroup::new("Rotation")).await.unwrap();
    groups
        .set_members(&group.guid, &["alice", "bob"])
        .await
        .unwrap();
    dir.reset_counters();

    let diff = groups
        .set_members(&group.guid, &["bob", "carol"])
        .await
        .unwrap();

    assert_eq!(diff.to_add, vec![normalize_dn_case(&user_dn("Carol"))]);
    assert_eq!(diff.to_remove.len(), 1);
    assert!(dn_equal(&diff.to_remove[0], &user_dn("Alice")));
    assert_eq!(dir.write_count(), 1);
}

#[tokio::test]
async fn test_empty_desired_clears_group() {
    let dir = seeded_directory();
    let groups = groups(&dir);
    let group = groups.create(&NewGroup::new("Shrinking")).await.unwrap();
    groups
        .set_members(&group.guid, &["alice", "bob", "carol"])
        .await
        .unwrap();

    let none: [&str; 0] = [];
    let diff = groups.set_members(&group.guid, &none).await.unwrap();
    assert_eq!(diff.to_remove.len(), 3);
    assert!(groups.get_members(&group.guid).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unresolvable_member_aborts_without_writing() {
    let dir = seeded_directory();
    let groups = groups(&dir);
    let group = groups.create(&NewGroup::new("Strict")).await.unwrap();
    dir.reset_counters();

    let err = groups
        .set_members(&group.guid, &["alice", "mallory"])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(dir.write_count(), 0);
}

#[tokio::test]
async fn test_unknown_group_guid_is_not_found() {
    let dir = seeded_directory();
    let err = groups(&dir)
        .set_members(&user_guid_text(42), &["alice"])
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::NotFound { .. }));
}

#[tokio::test]
async fn test_large_group_uses_ranged_retrieval() {
    let dir = Arc::new(InMemoryDirectory::new(BASE_DN).with_range_limit(10));
    dir.insert(Entry::new(format!("CN=Users,{BASE_DN}")).with("objectClass", "container"));
    for i in 0..25u32 {
        dir.insert(create_test_user(&format!("user{i:02}"), i));
    }
    let groups = groups(&dir);
    let group = groups.create(&NewGroup::new("Everyone")).await.unwrap();

    let desired: Vec<String> = (0..25).map(|i| format!("user{i:02}")).collect();
    let diff = groups.set_members(&group.guid, &desired).await.unwrap();
    assert_eq!(diff.to_add.len(), 25);

    dir.reset_counters();
    let diff = groups.set_members(&group.guid, &desired).await.unwrap();
    assert!(diff.is_empty());
    assert_eq!(dir.write_count(), 0);
    assert_eq!(groups.get_members(&group.guid).await.unwrap().len(), 25);
}

#[tokio::test]
async fn test_renamed_member_is_not_re_added() {
    let dir = seeded_directory();
    let cache = Arc::new(CacheManager::new());
    let groups = GroupManager::new(dir.clone(), cache.clone());
    let users = UserManager::new(dir.clone(), cache);
    let group = groups.create(&NewGroup::new("Stable")).await.unwrap();

    groups
        .set_members(&group.guid, &[user_guid_text(0)])
        .await
        .unwrap();
    users
        .update(
            &user_guid_text(0),
            &UserUpdate {
                name: Some("Alice Renamed".to_string()),
                ..UserUpdate::default()
            },
        )
        .await
        .unwrap();
    dir.reset_counters();

    let diff = groups
        .set_members(&group.guid, &[user_guid_text(0)])
        .await
        .unwrap();
    assert!(diff.is_empty(), "{diff:?}");
    assert_eq!(dir.write_count(), 0);
}
