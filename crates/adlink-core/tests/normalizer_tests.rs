//! Identity normalization against the in-memory directory.
//!
//! Every identifier form that names an object must resolve to the same
//! canonical DN, and repeated lookups must be served from the cache.

mod common;

use adlink_core::prelude::*;
use common::*;

fn normalizer(
    dir: &Arc<adlink_core::testing::InMemoryDirectory>,
) -> IdentityNormalizer<adlink_core::testing::InMemoryDirectory> {
    IdentityNormalizer::new(dir.clone(), Arc::new(CacheManager::new()))
}

#[tokio::test]
async fn test_all_identifier_forms_converge() {
    let dir = seeded_directory();
    let normalizer = normalizer(&dir);
    let expected = normalize_dn_case(&user_dn("Alice"));

    let inputs = [
        user_dn("Alice").to_lowercase(),
        user_guid_text(0),
        user_guid_text(0).to_uppercase(),
        format!("{{{}}}", user_guid_text(0)),
        user_sid_text(0),
        "alice@corp.example.com".to_string(),
        "ALICE@CORP.EXAMPLE.COM".to_string(),
        "alice".to_string(),
        r"CORP\alice".to_string(),
    ];

    for input in &inputs {
        let dn = normalizer.normalize_to_dn(input).await.unwrap();
        assert!(
            dn.eq_ignore_ascii_case(&expected),
            "{input} normalized to {dn}"
        );
    }
}

#[tokio::test]
async fn test_dn_input_keeps_value_case() {
    let dir = seeded_directory();
    let dn = normalizer(&dir)
        .normalize_to_dn("cn=Alice,ou=Staff,dc=corp,dc=example,dc=com")
        .await
        .unwrap();
    assert_eq!(dn, "CN=Alice,OU=Staff,DC=corp,DC=example,DC=com");
}

#[tokio::test]
async fn test_unknown_guid_is_not_found() {
    let dir = seeded_directory();
    let err = normalizer(&dir)
        .normalize_to_dn(&user_guid_text(99))
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::NotFound { .. }));
}

#[tokio::test]
async fn test_unknown_sam_is_not_found() {
    let dir = seeded_directory();
    let err = normalizer(&dir).normalize_to_dn("mallory").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_duplicate_sam_is_ambiguous() {
    let dir = seeded_directory();
    dir.insert(
        Entry::new(format!("CN=Alice Two,CN=Users,{BASE_DN}"))
            .with("objectClass", "user")
            .with("sAMAccountName", "alice"),
    );

    let err = normalizer(&dir).normalize_to_dn("alice").await.unwrap_err();
    match err {
        DirectoryError::AmbiguousIdentifier { matches, .. } => assert_eq!(matches, 2),
        other => panic!("expected AmbiguousIdentifier, got {other:?}"),
    }
}

#[tokio::test]
async fn test_batch_searches_once_per_object_key() {
    let dir = seeded_directory();
    let normalizer = normalizer(&dir);

    let inputs = vec![
        "alice".to_string(),
        "Alice".to_string(),
        r"CORP\alice".to_string(),
        "bob".to_string(),
        user_sid_text(2),
        user_dn("Dave"),
    ];
    let out = normalizer.normalize_to_dn_batch(&inputs).await.unwrap();

    assert_eq!(out.len(), inputs.len());
    assert_eq!(out["Alice"], normalize_dn_case(&user_dn("Alice")));
    assert_eq!(out[&user_sid_text(2)], normalize_dn_case(&user_dn("Carol")));
    // alice (three spellings, one key), bob, carol; the DN needs no search.
    assert_eq!(dir.search_count(), 3);

    // A second pass is answered entirely from the cache.
    normalizer.normalize_to_dn_batch(&inputs).await.unwrap();
    assert_eq!(dir.search_count(), 3);
}

#[tokio::test]
async fn test_warmed_cache_avoids_searches() {
    let dir = seeded_directory();
    let cache = Arc::new(CacheManager::new());
    let stats = cache.warm(dir.as_ref(), BASE_DN, 500).await.unwrap();
    assert_eq!(stats.objects, 4);
    assert_eq!(stats.keys, 16);
    dir.reset_counters();

    let normalizer = IdentityNormalizer::new(dir.clone(), cache);
    for input in [user_guid_text(1), user_sid_text(1), "bob@corp.example.com".into(), "bob".into()] {
        assert_eq!(
            normalizer.normalize_to_dn(&input).await.unwrap(),
            normalize_dn_case(&user_dn("Bob"))
        );
    }
    assert_eq!(dir.search_count(), 0);
}

#[tokio::test]
async fn test_resolve_reports_identity() {
    let dir = seeded_directory();
    let resolved = normalizer(&dir).resolve("carol").await.unwrap();
    assert_eq!(resolved.guid.as_deref(), Some(user_guid_text(2).as_str()));
    assert_eq!(resolved.sid.as_deref(), Some(user_sid_text(2).as_str()));
    assert!(resolved.object_classes.iter().any(|c| c == "user"));
}
