//! Binding sessions with the configured credentials.
//!
//! Authentication failures are never retried: repeated bad binds count
//! towards account lockout.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use adlink_core::config::AuthConfig;
use adlink_core::error::{rc, DirectoryError, DirectoryResult};

use crate::kerberos::{CredentialCache, CredentialSource};
use crate::session::LdapSession;

/// `KRB5CCNAME` is process state. Every GSSAPI bind in the process selects
/// its credential cache and binds while holding this lock, so clients with
/// different principals never see each other's cache.
static KRB5_ENV: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Run `bind` with `KRB5CCNAME` set to `location`.
#[cfg_attr(not(any(feature = "gssapi", test)), allow(dead_code))]
async fn with_credential_cache<T, Fut>(location: &str, bind: impl FnOnce() -> Fut) -> T
where
    Fut: Future<Output = T>,
{
    let _env = KRB5_ENV.lock().await;
    std::env::set_var("KRB5CCNAME", location);
    bind().await
}

/// Judge a bind result.
pub(crate) fn bind_outcome(code: u32, text: &str, identity: &str) -> DirectoryResult<()> {
    match code {
        rc::SUCCESS => Ok(()),
        rc::INVALID_CREDENTIALS => Err(DirectoryError::authentication(format!(
            "invalid credentials for {identity}: {text}"
        ))),
        code => Err(DirectoryError::authentication(format!(
            "bind as {identity} rejected with code {code}: {text}"
        ))),
    }
}

/// Binds sessions according to an [`AuthConfig`].
///
/// Credential acquisition is serialized per authenticator. The GSSAPI bind
/// itself is serialized across the whole process, since the credential
/// cache is selected through the shared `KRB5CCNAME` variable.
pub struct Authenticator {
    auth: AuthConfig,
    realm: Option<String>,
    #[cfg_attr(not(feature = "gssapi"), allow(dead_code))]
    credentials: Option<Mutex<CredentialCache>>,
    #[cfg_attr(not(feature = "gssapi"), allow(dead_code))]
    kinit_timeout: Duration,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("auth", &self.auth)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// `realm` is required for the Kerberos methods and ignored for simple bind.
    pub fn new(auth: AuthConfig, realm: Option<String>, kinit_timeout: Duration) -> Self {
        let credentials = CredentialSource::from_auth(&auth, realm.as_deref().unwrap_or_default())
            .map(|source| Mutex::new(CredentialCache::new(source)));
        Self {
            auth,
            realm,
            credentials,
            kinit_timeout,
        }
    }

    pub fn method(&self) -> &'static str {
        self.auth.method()
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// Authenticate `session`.
    #[instrument(skip(self, session), fields(method = self.auth.method(), endpoint = %session.endpoint()))]
    pub async fn bind(&self, session: &mut LdapSession) -> DirectoryResult<()> {
        match &self.auth {
            AuthConfig::Password { username, password } => {
                // An empty password is an unauthenticated bind, which AD accepts.
                if password.is_empty() {
                    return Err(DirectoryError::authentication(format!(
                        "empty password for {username}"
                    )));
                }
                let result = session.simple_bind(username, password).await?;
                bind_outcome(result.rc, &result.text, username)?;
                debug!(username = %username, "Simple bind succeeded");
                Ok(())
            }
            _ => self.kerberos_bind(session).await,
        }
    }

    #[cfg(feature = "gssapi")]
    async fn kerberos_bind(&self, session: &mut LdapSession) -> DirectoryResult<()> {
        let host = crate::kerberos::spn_host(self.auth.spn(), session.endpoint())?;
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| DirectoryError::internal("Kerberos method without credential source"))?;

        let mut cache = credentials.lock().await;
        let location = cache.ensure(self.kinit_timeout).await?.to_string();

        let spn_host = host.as_str();
        let outcome = with_credential_cache(&location, || async move {
            match session.sasl_gssapi_bind(spn_host).await {
                Ok(result) => bind_outcome(result.rc, &result.text, &format!("ldap/{spn_host}")),
                Err(e) => Err(DirectoryError::authentication_with_source(
                    format!("GSSAPI bind to ldap/{spn_host} failed"),
                    e,
                )),
            }
        })
        .await;
        if outcome.is_err() {
            // Tickets may have expired; fetch fresh ones next time.
            cache.invalidate();
        } else {
            debug!(spn = %format!("ldap/{host}"), "GSSAPI bind succeeded");
        }
        outcome
    }

    #[cfg(not(feature = "gssapi"))]
    async fn kerberos_bind(&self, session: &mut LdapSession) -> DirectoryResult<()> {
        crate::kerberos::spn_host(self.auth.spn(), session.endpoint())?;
        Err(DirectoryError::authentication(format!(
            "{} requires the `gssapi` feature",
            self.auth.method()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_outcome() {
        assert!(bind_outcome(0, "", "svc").is_ok());

        let err = bind_outcome(49, "80090308: LdapErr: DSID-0C090447, data 52e", "svc").unwrap_err();
        assert!(matches!(err, DirectoryError::Authentication { .. }));
        assert!(err.to_string().contains("invalid credentials"));
        assert!(!err.is_transient());

        let err = bind_outcome(53, "unwilling to perform", "svc").unwrap_err();
        assert!(matches!(err, DirectoryError::Authentication { .. }));
        assert!(err.to_string().contains("53"));
    }

    #[test]
    fn test_credential_source_only_for_kerberos() {
        let simple = Authenticator::new(
            AuthConfig::password("svc", "pw"),
            None,
            Duration::from_secs(5),
        );
        assert!(simple.credentials.is_none());
        assert_eq!(simple.method(), "password");

        let keytab = Authenticator::new(
            AuthConfig::keytab("svc", "/etc/svc.keytab"),
            Some("CORP.EXAMPLE.COM".to_string()),
            Duration::from_secs(5),
        );
        assert!(keytab.credentials.is_some());
        assert_eq!(keytab.realm(), Some("CORP.EXAMPLE.COM"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_binds_see_their_own_cache() {
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                tokio::spawn(async move {
                    let location = format!("FILE:/tmp/adlink_test_cc_{i}");
                    let seen = with_credential_cache(&location, || async {
                        tokio::task::yield_now().await;
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        std::env::var("KRB5CCNAME").unwrap()
                    })
                    .await;
                    (location, seen)
                })
            })
            .collect();

        for task in tasks {
            let (location, seen) = task.await.unwrap();
            assert_eq!(seen, location);
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let auth = Authenticator::new(
            AuthConfig::password("svc", "hunter2"),
            None,
            Duration::from_secs(5),
        );
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
