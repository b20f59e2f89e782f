//! Object identifier classification.
//!
//! Callers name directory objects five different ways; [`ObjectIdentifier::classify`]
//! decides which one from the shape of the text alone. The order matters:
//! a GUID or SID would otherwise also look like a bare sAMAccountName.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::codec::{self, dn_key, normalize_dn_case};
use crate::error::{DirectoryError, DirectoryResult};
use crate::operation::Filter;

static GUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\{?[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\}?$",
    )
    .expect("GUID_PATTERN is a valid regex")
});

static SID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[sS]-\d+-(\d+|0[xX][0-9a-fA-F]+)(-\d+)*$").expect("SID_PATTERN is a valid regex")
});

static UPN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@=,\\]+@[^@=,\\]+$").expect("UPN_PATTERN is a valid regex")
});

static SAM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([^\\=,]+)\\)?([^\\=,@]+)$").expect("SAM_PATTERN is a valid regex")
});

/// The ways a caller can name an Active Directory object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectIdentifier {
    /// Distinguished name, already case-normalized.
    Dn { dn: String },
    /// objectGUID in canonical lower-case text.
    Guid { guid: String },
    /// objectSid in canonical `S-` text.
    Sid { sid: String },
    /// userPrincipalName (`user@realm`).
    Upn { upn: String },
    /// sAMAccountName, optionally qualified as `DOMAIN\name`.
    Sam {
        #[serde(skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
        name: String,
    },
}

impl ObjectIdentifier {
    /// Classify free-form identifier text.
    ///
    /// Order: GUID, SID, UPN, SAM, then DN. Text that matches the GUID or SID
    /// shape but fails to decode is a codec error rather than a fallthrough.
    pub fn classify(input: &str) -> DirectoryResult<Self> {
        let text = input.trim();
        if text.is_empty() {
            return Err(DirectoryError::codec("identifier is empty"));
        }

        if GUID_PATTERN.is_match(text) {
            return Ok(Self::Guid {
                guid: codec::canonical_guid(text)?,
            });
        }

        if SID_PATTERN.is_match(text) {
            return Ok(Self::Sid {
                sid: codec::canonical_sid(text)?,
            });
        }

        if UPN_PATTERN.is_match(text) {
            return Ok(Self::Upn {
                upn: text.to_string(),
            });
        }

        if let Some(caps) = SAM_PATTERN.captures(text) {
            return Ok(Self::Sam {
                domain: caps.get(1).map(|m| m.as_str().to_string()),
                name: caps[2].to_string(),
            });
        }

        if text.contains('=') {
            return Ok(Self::Dn {
                dn: normalize_dn_case(text),
            });
        }

        Err(DirectoryError::codec(format!(
            "'{input}' is not a DN, GUID, SID, UPN or sAMAccountName"
        )))
    }

    /// Build a DN identifier without classification.
    pub fn dn(dn: impl AsRef<str>) -> Self {
        Self::Dn {
            dn: normalize_dn_case(dn.as_ref()),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dn { .. } => "dn",
            Self::Guid { .. } => "guid",
            Self::Sid { .. } => "sid",
            Self::Upn { .. } => "upn",
            Self::Sam { .. } => "sam",
        }
    }

    /// Whether this identifier already is a DN (no lookup needed).
    pub fn is_dn(&self) -> bool {
        matches!(self, Self::Dn { .. })
    }

    /// Canonical cache key.
    ///
    /// Two spellings of the same identifier share a key. The NetBIOS domain of
    /// a qualified sAMAccountName is not part of the key because lookups are
    /// scoped to a single naming context.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Dn { dn } => format!("dn:{}", dn_key(dn)),
            Self::Guid { guid } => format!("guid:{guid}"),
            Self::Sid { sid } => format!("sid:{sid}"),
            Self::Upn { upn } => format!("upn:{}", upn.to_lowercase()),
            Self::Sam { name, .. } => format!("sam:{}", name.to_lowercase()),
        }
    }

    /// The search filter that finds this object, or `None` for a DN.
    pub fn search_filter(&self) -> DirectoryResult<Option<Filter>> {
        let filter = match self {
            Self::Dn { .. } => return Ok(None),
            Self::Guid { guid } => {
                Filter::eq_bytes("objectGUID", codec::decode_guid(guid)?.to_vec())
            }
            Self::Sid { sid } => Filter::eq_bytes("objectSid", codec::decode_sid(sid)?),
            Self::Upn { upn } => Filter::eq("userPrincipalName", upn.clone()),
            Self::Sam { name, .. } => Filter::eq("sAMAccountName", name.clone()),
        };
        Ok(Some(filter))
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dn { dn } => f.write_str(dn),
            Self::Guid { guid } => f.write_str(guid),
            Self::Sid { sid } => f.write_str(sid),
            Self::Upn { upn } => f.write_str(upn),
            Self::Sam {
                domain: Some(domain),
                name,
            } => write!(f, "{domain}\\{name}"),
            Self::Sam { domain: None, name } => f.write_str(name),
        }
    }
}

impl std::str::FromStr for ObjectIdentifier {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::classify(s)
    }
}

/// Cache keys under which a directory object is reachable.
///
/// Used by cache warming and after creates, where the object's attributes
/// are already at hand.
pub fn keys_for(
    guid: Option<&str>,
    sid: Option<&str>,
    upn: Option<&str>,
    sam: Option<&str>,
) -> Vec<String> {
    let mut keys = Vec::with_capacity(4);
    if let Some(guid) = guid {
        keys.push(
            ObjectIdentifier::Guid {
                guid: guid.to_string(),
            }
            .cache_key(),
        );
    }
    if let Some(sid) = sid {
        keys.push(ObjectIdentifier::Sid { sid: sid.to_string() }.cache_key());
    }
    if let Some(upn) = upn {
        keys.push(ObjectIdentifier::Upn { upn: upn.to_string() }.cache_key());
    }
    if let Some(sam) = sam {
        keys.push(
            ObjectIdentifier::Sam {
                domain: None,
                name: sam.to_string(),
            }
            .cache_key(),
        );
    }
    keys
}
