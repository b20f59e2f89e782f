//! Wire-format codecs for Active Directory identifiers.
//!
//! - [`guid`] - objectGUID bytes ⇄ canonical GUID text
//! - [`sid`] - objectSid bytes ⇄ `S-1-…` text
//! - [`dn`] - DN case canonicalization, comparison and escaping
//!
//! Everything here is pure; no function touches the network.

pub mod dn;
pub mod guid;
pub mod sid;

pub use dn::{
    dn_equal, dn_key, domain_to_base_dn, escape_dn_value, normalize_dn_case, parent_dn, rdn_of,
};
pub use guid::{canonical_guid, decode_guid, encode_guid, GUID_LEN};
pub use sid::{canonical_sid, decode_sid, encode_sid};

/// Escape special characters in LDAP filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\5c"),
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render raw bytes as an RFC 4515 `\xx` sequence for binary assertions
/// such as `(objectGUID=\00\84…)`.
pub fn escape_filter_bytes(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        // Writing to a String cannot fail.
        let _ = write!(out, "\\{b:02x}");
    }
    out
}
