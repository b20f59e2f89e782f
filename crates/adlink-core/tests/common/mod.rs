//! Common test utilities for adlink-core integration tests.

#![allow(dead_code)]

use adlink_core::codec::{decode_guid, decode_sid};
use adlink_core::operation::Entry;
use adlink_core::testing::InMemoryDirectory;
use std::sync::Arc;

pub const BASE_DN: &str = "DC=corp,DC=example,DC=com";

/// A directory with the default containers and a few people.
pub fn seeded_directory() -> Arc<InMemoryDirectory> {
    let dir = Arc::new(InMemoryDirectory::new(BASE_DN));
    dir.insert(Entry::new(format!("CN=Users,{BASE_DN}")).with("objectClass", "container"));
    dir.insert(Entry::new(format!("OU=Staff,{BASE_DN}")).with("objectClass", "organizationalUnit"));
    for (i, name) in ["alice", "bob", "carol", "dave"].iter().enumerate() {
        dir.insert(create_test_user(name, i as u32));
    }
    dir
}

/// Test data factory for a user with every identifier populated.
pub fn create_test_user(sam: &str, index: u32) -> Entry {
    let mut cn = sam.to_string();
    if let Some(first) = cn.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    Entry::new(format!("CN={cn},OU=Staff,{BASE_DN}"))
        .with("objectClass", "top")
        .with("objectClass", "user")
        .with("objectCategory", "person")
        .with("cn", cn.as_str())
        .with("sAMAccountName", sam)
        .with("userPrincipalName", format!("{sam}@corp.example.com"))
        .with_bytes("objectGUID", user_guid(index).to_vec())
        .with_bytes("objectSid", user_sid(index))
}

pub fn user_guid_text(index: u32) -> String {
    format!("6f1d2c3b-0000-4000-8000-{:012x}", index)
}

pub fn user_guid(index: u32) -> [u8; 16] {
    decode_guid(&user_guid_text(index)).unwrap()
}

pub fn user_sid_text(index: u32) -> String {
    format!("S-1-5-21-3623811015-3361044348-30300820-{}", 2000 + index)
}

pub fn user_sid(index: u32) -> Vec<u8> {
    decode_sid(&user_sid_text(index)).unwrap()
}

pub fn user_dn(cn: &str) -> String {
    format!("CN={cn},OU=Staff,{BASE_DN}")
}
