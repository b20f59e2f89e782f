//! objectSid conversion (MS-DTYP 2.4.2).
//!
//! Wire layout: revision (1 byte), sub-authority count (1 byte), identifier
//! authority (6 bytes, big-endian), then `count` little-endian u32
//! sub-authorities.

use crate::error::{DirectoryError, DirectoryResult};

const HEADER_LEN: usize = 8;
const MAX_SUB_AUTHORITIES: usize = 15;
const MAX_AUTHORITY: u64 = (1 << 48) - 1;

/// Render a binary SID as `S-{rev}-{authority}-{sub1}-...-{subN}`.
pub fn encode_sid(bytes: &[u8]) -> DirectoryResult<String> {
    if bytes.len() < HEADER_LEN {
        return Err(DirectoryError::codec(format!(
            "SID buffer truncated: {} bytes, header needs {HEADER_LEN}",
            bytes.len()
        )));
    }

    let revision = bytes[0];
    let count = usize::from(bytes[1]);
    if count > MAX_SUB_AUTHORITIES {
        return Err(DirectoryError::codec(format!(
            "SID declares {count} sub-authorities, maximum is {MAX_SUB_AUTHORITIES}"
        )));
    }

    let expected = HEADER_LEN + count * 4;
    if bytes.len() != expected {
        return Err(DirectoryError::codec(format!(
            "SID declares {count} sub-authorities ({expected} bytes) but buffer has {} bytes",
            bytes.len()
        )));
    }

    let authority = bytes[2..HEADER_LEN]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

    let mut text = if authority <= u64::from(u32::MAX) {
        format!("S-{revision}-{authority}")
    } else {
        format!("S-{revision}-0x{authority:012X}")
    };

    for chunk in bytes[HEADER_LEN..].chunks_exact(4) {
        let sub = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        text.push('-');
        text.push_str(&sub.to_string());
    }

    Ok(text)
}

/// Parse SID text back into its binary form.
pub fn decode_sid(text: &str) -> DirectoryResult<Vec<u8>> {
    let malformed = |why: &str| DirectoryError::codec(format!("SID '{text}' is malformed: {why}"));

    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("S-")
        .or_else(|| trimmed.strip_prefix("s-"))
        .ok_or_else(|| malformed("missing S- prefix"))?;

    let mut parts = body.split('-');

    let revision: u8 = parts
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| malformed("missing revision"))?
        .parse()
        .map_err(|_| malformed("revision is not a byte"))?;

    let authority_text = parts.next().ok_or_else(|| malformed("missing authority"))?;
    let authority = match authority_text
        .strip_prefix("0x")
        .or_else(|| authority_text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => authority_text.parse::<u64>(),
    }
    .map_err(|_| malformed("authority is not a number"))?;
    if authority > MAX_AUTHORITY {
        return Err(malformed("authority exceeds 48 bits"));
    }

    let subs = parts
        .map(|p| p.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| malformed("sub-authority is not a 32-bit number"))?;
    if subs.len() > MAX_SUB_AUTHORITIES {
        return Err(malformed("too many sub-authorities"));
    }

    let mut bytes = Vec::with_capacity(HEADER_LEN + subs.len() * 4);
    bytes.push(revision);
    // Bounded by MAX_SUB_AUTHORITIES above.
    bytes.push(subs.len() as u8);
    bytes.extend_from_slice(&authority.to_be_bytes()[2..]);
    for sub in subs {
        bytes.extend_from_slice(&sub.to_le_bytes());
    }

    Ok(bytes)
}

/// Canonical upper-case `S-` text of a SID string, validating it on the way.
pub fn canonical_sid(text: &str) -> DirectoryResult<String> {
    encode_sid(&decode_sid(text)?)
}
