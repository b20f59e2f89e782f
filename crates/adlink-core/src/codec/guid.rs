//! objectGUID conversion.
//!
//! Active Directory stores GUIDs in the Microsoft mixed-endian layout: the
//! first three fields little-endian, the trailing two big-endian. `Uuid`'s
//! `_le` constructors implement exactly that swap.

use uuid::Uuid;

use crate::error::{DirectoryError, DirectoryResult};

/// Length of a binary objectGUID.
pub const GUID_LEN: usize = 16;

/// Render wire bytes as `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
pub fn encode_guid(bytes: &[u8]) -> DirectoryResult<String> {
    let raw: [u8; GUID_LEN] = bytes.try_into().map_err(|_| {
        DirectoryError::codec(format!(
            "objectGUID must be {GUID_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(Uuid::from_bytes_le(raw).hyphenated().to_string())
}

/// Parse the canonical text form back into wire bytes.
pub fn decode_guid(text: &str) -> DirectoryResult<[u8; GUID_LEN]> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);
    if inner.len() != 36 {
        return Err(DirectoryError::codec(format!(
            "GUID '{text}' is not in xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx form"
        )));
    }
    let uuid = Uuid::try_parse(inner)
        .map_err(|e| DirectoryError::codec(format!("GUID '{text}' is malformed: {e}")))?;
    Ok(uuid.to_bytes_le())
}

/// Lower-case canonical text of a GUID string, validating it on the way.
pub fn canonical_guid(text: &str) -> DirectoryResult<String> {
    let bytes = decode_guid(text)?;
    encode_guid(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // Wire bytes for 550e8400-e29b-41d4-a716-446655440000.
    const WIRE: [u8; 16] = [
        0x00, 0x84, 0x0e, 0x55, 0x9b, 0xe2, 0xd4, 0x41, 0xa7, 0x16, 0x44, 0x66, 0x55, 0x44, 0x00,
        0x00,
    ];

    #[test]
    fn test_encode_swaps_first_three_fields() {
        assert_eq!(
            encode_guid(&WIRE).unwrap(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_decode_restores_wire_order() {
        assert_eq!(
            decode_guid("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            WIRE
        );
    }

    #[test]
    fn test_decode_accepts_braces_and_upper_case() {
        assert_eq!(
            decode_guid("{550E8400-E29B-41D4-A716-446655440000}").unwrap(),
            WIRE
        );
    }

    #[test]
    fn test_encode_rejects_wrong_length() {
        assert!(matches!(
            encode_guid(&WIRE[..15]),
            Err(DirectoryError::Codec { .. })
        ));
        assert!(encode_guid(&[0u8; 17]).is_err());
    }

    #[test]
    fn test_decode_rejects_malformed_text() {
        assert!(decode_guid("550e8400e29b41d4a716446655440000").is_err());
        assert!(decode_guid("550e8400-e29b-41d4-a716-44665544000g").is_err());
        assert!(decode_guid("").is_err());
    }

    #[test]
    fn test_canonical_guid_lowercases() {
        assert_eq!(
            canonical_guid("550E8400-E29B-41D4-A716-446655440000").unwrap(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    proptest! {
        #[test]
        fn guid_round_trip(bytes in any::<[u8; 16]>()) {
            let text = encode_guid(&bytes).unwrap();
            prop_assert_eq!(decode_guid(&text).unwrap(), bytes);
        }
    }
}
