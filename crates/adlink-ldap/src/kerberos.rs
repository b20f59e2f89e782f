//! Kerberos credential acquisition.
//!
//! Tickets are obtained with the system `kinit` into a credential cache
//! private to the client, or taken from an existing cache. The GSSAPI bind
//! itself lives in [`crate::auth`].

use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use adlink_core::config::AuthConfig;
use adlink_core::error::{DirectoryError, DirectoryResult};

use crate::discovery::Endpoint;

/// Where tickets come from.
#[derive(Clone)]
pub enum CredentialSource {
    /// `kinit -k -t <keytab> <principal>`
    Keytab { principal: String, keytab: String },
    /// `kinit <principal>` with the password on stdin.
    Password { principal: String, password: String },
    /// A cache populated by someone else.
    Existing { location: String },
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Keytab { principal, keytab } => f
                .debug_struct("Keytab")
                .field("principal", principal)
                .field("keytab", keytab)
                .finish(),
            CredentialSource::Password { principal, .. } => f
                .debug_struct("Password")
                .field("principal", principal)
                .finish_non_exhaustive(),
            CredentialSource::Existing { location } => f
                .debug_struct("Existing")
                .field("location", location)
                .finish(),
        }
    }
}

impl CredentialSource {
    /// Credential source for a Kerberos auth config; `None` for simple bind.
    /// Bare principals are qualified with `realm`.
    pub fn from_auth(auth: &AuthConfig, realm: &str) -> Option<Self> {
        match auth {
            AuthConfig::Password { .. } => None,
            AuthConfig::KerberosKeytab {
                principal, keytab, ..
            } => Some(CredentialSource::Keytab {
                principal: qualify_principal(principal, realm),
                keytab: keytab.clone(),
            }),
            AuthConfig::KerberosPassword {
                principal,
                password,
                ..
            } => Some(CredentialSource::Password {
                principal: qualify_principal(principal, realm),
                password: password.clone(),
            }),
            AuthConfig::KerberosCCache { ccache_path, .. } => Some(CredentialSource::Existing {
                location: ccache_path.clone(),
            }),
        }
    }

    /// `kinit` arguments writing into `ccache`; empty for an existing cache.
    pub fn kinit_args(&self, ccache: &str) -> Vec<String> {
        match self {
            CredentialSource::Keytab { principal, keytab } => vec![
                "-k".to_string(),
                "-t".to_string(),
                keytab.clone(),
                "-c".to_string(),
                ccache.to_string(),
                principal.clone(),
            ],
            CredentialSource::Password { principal, .. } => {
                vec!["-c".to_string(), ccache.to_string(), principal.clone()]
            }
            CredentialSource::Existing { .. } => Vec::new(),
        }
    }
}

/// Append `@REALM` to a principal without one.
pub fn qualify_principal(principal: &str, realm: &str) -> String {
    if principal.contains('@') || realm.is_empty() {
        principal.to_string()
    } else {
        format!("{principal}@{realm}")
    }
}

/// Host part of the LDAP service principal for `endpoint`.
///
/// An override may be given as `ldap/host`, `ldap/host@REALM` or a bare host.
/// Without one the endpoint's host name is used; an IP literal cannot name a
/// service principal.
pub fn spn_host(spn_override: Option<&str>, endpoint: &Endpoint) -> DirectoryResult<String> {
    if let Some(spn) = spn_override.map(str::trim).filter(|s| !s.is_empty()) {
        let without_realm = spn.split('@').next().unwrap_or(spn);
        let host = match without_realm.split_once('/') {
            Some((service, host)) if service.eq_ignore_ascii_case("ldap") => host,
            Some(_) => {
                return Err(DirectoryError::authentication(format!(
                    "SPN override {spn} does not name the ldap service"
                )))
            }
            None => without_realm,
        };
        return Ok(host.to_string());
    }

    if endpoint.is_ip() {
        return Err(DirectoryError::authentication(format!(
            "cannot derive a Kerberos service principal for {}: connect by host name or set an SPN override",
            endpoint.host
        )));
    }
    Ok(endpoint.host.clone())
}

/// Run `kinit` for `source` into `ccache`.
pub async fn acquire(source: &CredentialSource, ccache: &str, timeout: Duration) -> DirectoryResult<()> {
    let args = source.kinit_args(ccache);
    if args.is_empty() {
        return Ok(());
    }

    let mut child = Command::new("kinit")
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DirectoryError::authentication_with_source("failed to run kinit", e))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| DirectoryError::authentication("kinit stdin unavailable"))?;
    if let CredentialSource::Password { password, .. } = source {
        stdin
            .write_all(format!("{password}\n").as_bytes())
            .await
            .map_err(|e| DirectoryError::authentication_with_source("failed to pass password to kinit", e))?;
    }
    drop(stdin);

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| DirectoryError::authentication("kinit timed out"))?
        .map_err(|e| DirectoryError::authentication_with_source("kinit failed", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DirectoryError::authentication(format!(
            "kinit exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// A credential cache owned by one client.
///
/// Caches created here are removed on drop; an existing cache supplied by
/// the caller is left alone.
#[derive(Debug)]
pub struct CredentialCache {
    source: CredentialSource,
    location: String,
    owned: bool,
    acquired: bool,
}

impl CredentialCache {
    pub fn new(source: CredentialSource) -> Self {
        match &source {
            CredentialSource::Existing { location } => Self {
                location: location.clone(),
                source,
                owned: false,
                acquired: true,
            },
            _ => {
                let path = std::env::temp_dir().join(format!(
                    "adlink_krb5cc_{}_{:016x}",
                    std::process::id(),
                    rand::random::<u64>()
                ));
                Self {
                    location: format!("FILE:{}", path.display()),
                    source,
                    owned: true,
                    acquired: false,
                }
            }
        }
    }

    /// Cache name suitable for `KRB5CCNAME`.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Obtain tickets unless a previous call already did.
    pub async fn ensure(&mut self, timeout: Duration) -> DirectoryResult<&str> {
        if !self.acquired {
            debug!(source = ?self.source, ccache = %self.location, "Acquiring Kerberos tickets");
            acquire(&self.source, &self.location, timeout).await?;
            self.acquired = true;
            info!(ccache = %self.location, "Kerberos tickets acquired");
        }
        Ok(&self.location)
    }

    /// Force re-acquisition on the next [`ensure`](Self::ensure), e.g. after
    /// a bind rejected an expired ticket.
    pub fn invalidate(&mut self) {
        if self.owned {
            self.acquired = false;
        }
    }
}

impl Drop for CredentialCache {
    fn drop(&mut self) {
        if !self.owned || !self.acquired {
            return;
        }
        if let Some(path) = self.location.strip_prefix("FILE:") {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path, error = %e, "Could not remove credential cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Transport;

    #[test]
    fn test_spn_host_from_endpoint() {
        let endpoint = Endpoint::new("dc1.corp.example.com", Transport::Ldap);
        assert_eq!(spn_host(None, &endpoint).unwrap(), "dc1.corp.example.com");
    }

    #[test]
    fn test_spn_host_override_forms() {
        let endpoint = Endpoint::new("10.0.0.5", Transport::Ldap);
        for spn in [
            "ldap/dc1.corp.example.com",
            "LDAP/dc1.corp.example.com@CORP.EXAMPLE.COM",
            "dc1.corp.example.com",
        ] {
            assert_eq!(spn_host(Some(spn), &endpoint).unwrap(), "dc1.corp.example.com", "{spn}");
        }
        assert!(spn_host(Some("HTTP/web.corp.example.com"), &endpoint).is_err());
    }

    #[test]
    fn test_ip_without_override_is_authentication_error() {
        let endpoint = Endpoint::new("10.0.0.5", Transport::Ldaps);
        let err = spn_host(None, &endpoint).unwrap_err();
        assert!(matches!(err, DirectoryError::Authentication { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_kinit_args() {
        let keytab = CredentialSource::from_auth(
            &AuthConfig::keytab("svc-adlink", "/etc/adlink.keytab"),
            "CORP.EXAMPLE.COM",
        )
        .unwrap();
        assert_eq!(
            keytab.kinit_args("FILE:/tmp/cc"),
            ["-k", "-t", "/etc/adlink.keytab", "-c", "FILE:/tmp/cc", "svc-adlink@CORP.EXAMPLE.COM"]
        );

        let password = CredentialSource::from_auth(
            &AuthConfig::kerberos_password("svc@OTHER.REALM", "pw"),
            "CORP.EXAMPLE.COM",
        )
        .unwrap();
        assert_eq!(password.kinit_args("FILE:/tmp/cc"), ["-c", "FILE:/tmp/cc", "svc@OTHER.REALM"]);
        assert!(!format!("{password:?}").contains("pw\""));

        let existing =
            CredentialSource::from_auth(&AuthConfig::ccache("FILE:/tmp/krb5cc_1000"), "X").unwrap();
        assert!(existing.kinit_args("ignored").is_empty());

        assert!(CredentialSource::from_auth(&AuthConfig::password("u", "p"), "X").is_none());
    }

    #[tokio::test]
    async fn test_existing_cache_needs_no_kinit() {
        let mut cache = CredentialCache::new(CredentialSource::Existing {
            location: "FILE:/tmp/krb5cc_1000".to_string(),
        });
        let location = cache.ensure(Duration::from_secs(1)).await.unwrap();
        assert_eq!(location, "FILE:/tmp/krb5cc_1000");
        cache.invalidate();
        assert!(cache.ensure(Duration::from_secs(1)).await.is_ok());
    }

    #[test]
    fn test_private_cache_location() {
        let cache = CredentialCache::new(CredentialSource::Keytab {
            principal: "svc@CORP".to_string(),
            keytab: "/k".to_string(),
        });
        assert!(cache.location().starts_with("FILE:"));
        assert!(cache.location().contains("adlink_krb5cc_"));
    }
}
