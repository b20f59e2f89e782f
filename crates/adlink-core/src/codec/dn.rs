//! Distinguished name handling.
//!
//! Only the attribute-type tokens of a DN are rewritten here. Values are
//! copied byte-for-byte; escapes (`\,`, `\2C`), quoted values and
//! multi-valued RDNs (`+`) are recognized so that their delimiters are not
//! mistaken for RDN boundaries.

/// One `type=value` assertion and the delimiter that followed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ava<'a> {
    attr_type: &'a str,
    value: Option<&'a str>,
    separator: Option<u8>,
}

/// Split a DN into attribute-value assertions without unescaping anything.
///
/// Delimiters are ASCII, so scanning bytes never splits a UTF-8 sequence.
fn avas(dn: &str) -> Vec<Ava<'_>> {
    let bytes = dn.as_bytes();
    let len = bytes.len();
    let mut out = Vec::new();
    let mut i = 0;

    while i < len {
        let type_start = i;
        while i < len && !matches!(bytes[i], b'=' | b',' | b';' | b'+') {
            i += 1;
        }

        if i >= len || bytes[i] != b'=' {
            // Type without a value: malformed, keep it verbatim.
            out.push(Ava {
                attr_type: &dn[type_start..i],
                value: None,
                separator: bytes.get(i).copied(),
            });
            i += 1;
            continue;
        }

        let attr_type = &dn[type_start..i];
        i += 1;
        let value_start = i;
        let mut in_quotes = false;
        while i < len {
            match bytes[i] {
                b'\\' => {
                    i += 2;
                    continue;
                }
                b'"' => in_quotes = !in_quotes,
                b',' | b';' | b'+' if !in_quotes => break,
                _ => {}
            }
            i += 1;
        }
        let value_end = i.min(len);

        out.push(Ava {
            attr_type,
            value: Some(&dn[value_start..value_end]),
            separator: bytes.get(value_end).copied(),
        });
        i = value_end + 1;
    }

    out
}

/// Upper-case every attribute type, leaving values untouched.
///
/// `normalize_dn_case(normalize_dn_case(x)) == normalize_dn_case(x)` for all
/// inputs, and DNs differing only in attribute-type case normalize equal.
pub fn normalize_dn_case(dn: &str) -> String {
    let mut out = String::with_capacity(dn.len());
    for ava in avas(dn) {
        out.push_str(&ava.attr_type.to_ascii_uppercase());
        if let Some(value) = ava.value {
            out.push('=');
            out.push_str(value);
        }
        if let Some(sep) = ava.separator {
            out.push(char::from(sep));
        }
    }
    out
}

/// Comparison key for a DN.
///
/// Active Directory matches DN values case-insensitively and ignores the
/// whitespace around separators, so two DNs with the same key name the same
/// object.
pub fn dn_key(dn: &str) -> String {
    let mut out = String::with_capacity(dn.len());
    for ava in avas(dn) {
        out.push_str(&ava.attr_type.trim().to_ascii_uppercase());
        if let Some(value) = ava.value {
            out.push('=');
            out.push_str(&trim_value(value).to_lowercase());
        }
        match ava.separator {
            Some(b'+') => out.push('+'),
            Some(_) => out.push(','),
            None => {}
        }
    }
    out
}

/// Structural equality ignoring attribute-type case and value case.
pub fn dn_equal(a: &str, b: &str) -> bool {
    dn_key(a) == dn_key(b)
}

fn trim_value(value: &str) -> &str {
    let value = value.trim_start();
    let trimmed = value.trim_end();
    // Keep an escaped trailing space (`\ `) intact.
    if trimmed.len() < value.len() && trimmed.ends_with('\\') {
        &value[..trimmed.len() + 1]
    } else {
        trimmed
    }
}

/// Byte offset of the first RDN boundary (`,` or `;`) outside escapes and quotes.
fn first_rdn_boundary(dn: &str) -> Option<usize> {
    let mut offset = 0;
    for ava in avas(dn) {
        offset += ava.attr_type.len();
        if let Some(value) = ava.value {
            offset += 1 + value.len();
        }
        match ava.separator {
            Some(b',') | Some(b';') => return Some(offset),
            Some(_) => offset += 1,
            None => return None,
        }
    }
    None
}

/// First RDN of `dn` (e.g. `CN=Alice` for `CN=Alice,OU=Staff,DC=example,DC=com`).
pub fn rdn_of(dn: &str) -> &str {
    match first_rdn_boundary(dn) {
        Some(idx) => dn[..idx].trim(),
        None => dn.trim(),
    }
}

/// DN of the parent container, or `None` for a single-RDN DN.
pub fn parent_dn(dn: &str) -> Option<&str> {
    first_rdn_boundary(dn).map(|idx| dn[idx + 1..].trim_start())
}

/// Convert a DNS domain to its naming context (`example.com` → `DC=example,DC=com`).
pub fn domain_to_base_dn(domain: &str) -> String {
    domain
        .trim_end_matches('.')
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| format!("DC={part}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape special characters in DN attribute values per RFC 4514.
///
/// Characters that must be escaped:
/// - Leading or trailing SPACE (escaped as \20)
/// - Leading # (escaped as \23)
/// - Characters: , + " \ < > ; = (escaped with backslash prefix)
/// - NUL character (escaped as \00)
pub fn escape_dn_value(value: &str) -> String {
    let char_count = value.chars().count();
    let mut result = String::with_capacity(value.len() * 2);

    for (i, ch) in value.chars().enumerate() {
        let is_first = i == 0;
        let is_last = i + 1 == char_count;

        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            ' ' if is_first || is_last => result.push_str("\\20"),
            '#' if is_first => result.push_str("\\23"),
            _ => result.push(ch),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_uppercases_types_only() {
        assert_eq!(
            normalize_dn_case("cn=Alice Smith,ou=Staff,dc=example,dc=com"),
            "CN=Alice Smith,OU=Staff,DC=example,DC=com"
        );
    }

    #[test]
    fn test_normalize_equates_type_case() {
        assert_eq!(normalize_dn_case("cn=A,dc=B"), normalize_dn_case("CN=A,DC=B"));
        assert_eq!(normalize_dn_case("Cn=A,dC=B"), "CN=A,DC=B");
    }

    #[test]
    fn test_normalize_keeps_escaped_commas_in_values() {
        assert_eq!(
            normalize_dn_case(r"cn=Smith\, John,ou=Staff"),
            r"CN=Smith\, John,OU=Staff"
        );
        assert_eq!(
            normalize_dn_case(r"cn=a\2cou=b,dc=c"),
            r"CN=a\2cou=b,DC=c"
        );
    }

    #[test]
    fn test_normalize_handles_quotes_and_multivalued_rdns() {
        assert_eq!(
            normalize_dn_case(r#"cn="Doe, Jane"+uid=jd,dc=x"#),
            r#"CN="Doe, Jane"+UID=jd,DC=x"#
        );
    }

    #[test]
    fn test_normalize_preserves_value_bytes() {
        let dn = "cn=Zoë ünïcode,ou=Ärger,dc=example";
        assert_eq!(normalize_dn_case(dn), "CN=Zoë ünïcode,OU=Ärger,DC=example");
    }

    #[test]
    fn test_normalize_malformed_is_stable() {
        assert_eq!(normalize_dn_case("not a dn"), "NOT A DN");
        assert_eq!(normalize_dn_case(""), "");
        assert_eq!(normalize_dn_case("cn=a,"), "CN=a,");
    }

    #[test]
    fn test_dn_key_is_case_and_space_insensitive() {
        assert!(dn_equal(
            "CN=Alice,OU=Staff,DC=example,DC=com",
            "cn=alice, ou=staff, dc=EXAMPLE, dc=com"
        ));
        assert!(!dn_equal("CN=Alice,DC=example", "CN=Bob,DC=example"));
    }

    #[test]
    fn test_rdn_and_parent() {
        let dn = r"CN=Smith\, John,OU=Staff,DC=example,DC=com";
        assert_eq!(rdn_of(dn), r"CN=Smith\, John");
        assert_eq!(parent_dn(dn), Some("OU=Staff,DC=example,DC=com"));
        assert_eq!(parent_dn("DC=com"), None);
        assert_eq!(rdn_of("DC=com"), "DC=com");
    }

    #[test]
    fn test_domain_to_base_dn() {
        assert_eq!(domain_to_base_dn("corp.example.com"), "DC=corp,DC=example,DC=com");
        assert_eq!(domain_to_base_dn("example.com."), "DC=example,DC=com");
    }

    #[test]
    fn test_escape_dn_value() {
        assert_eq!(escape_dn_value("Smith, John"), r"Smith\, John");
        assert_eq!(escape_dn_value("#admin"), r"\23admin");
        assert_eq!(escape_dn_value(" padded "), r"\20padded\20");
        assert_eq!(escape_dn_value("a+b=c"), r"a\+b\=c");
        assert_eq!(escape_dn_value("café "), r"café\20");
        assert_eq!(escape_dn_value(""), "");
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(dn in r"[a-zA-Z=,+;\\ .#\x22é0-9]{0,40}") {
            let once = normalize_dn_case(&dn);
            prop_assert_eq!(normalize_dn_case(&once), once);
        }

        #[test]
        fn normalize_only_changes_case(dn in r"[a-zA-Z=,+\\ 0-9]{0,40}") {
            let normalized = normalize_dn_case(&dn);
            prop_assert_eq!(normalized.len(), dn.len());
            prop_assert!(normalized.eq_ignore_ascii_case(&dn));
        }
    }
}
