//! Client configuration types
//!
//! Everything the client needs is supplied once, up front, in a
//! [`ClientConfig`]. Secrets are redacted from `Debug` output.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::domain_to_base_dn;
use crate::error::{DirectoryError, DirectoryResult};

const REDACTED: &str = "***REDACTED***";

/// Top-level client configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// DNS domain of the directory (e.g. `corp.example.com`).
    pub domain: String,

    /// Explicit server URLs (`ldap://dc1:389`, `ldaps://dc2`). When set they
    /// take precedence over DNS discovery.
    #[serde(default)]
    pub urls: Vec<String>,

    /// Naming context; derived from `domain` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dn: Option<String>,

    /// Authentication method.
    pub auth: AuthConfig,

    /// Transport security.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Connection pool settings.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Pre-load the identifier cache when the client starts.
    #[serde(default)]
    pub warm_cache: bool,

    /// Page size for searches that may return many entries.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Concurrent lookups during batch normalization.
    #[serde(default = "default_lookup_concurrency")]
    pub lookup_concurrency: usize,
}

fn default_page_size() -> u32 {
    1000
}

fn default_lookup_concurrency() -> usize {
    8
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("domain", &self.domain)
            .field("urls", &self.urls)
            .field("base_dn", &self.base_dn)
            .field("auth", &self.auth)
            .field("tls", &self.tls)
            .field("pool", &self.pool)
            .field("retry", &self.retry)
            .field("warm_cache", &self.warm_cache)
            .field("page_size", &self.page_size)
            .field("lookup_concurrency", &self.lookup_concurrency)
            .finish()
    }
}

impl ClientConfig {
    /// Create a config for `domain` with the given authentication.
    pub fn new(domain: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            domain: domain.into(),
            urls: Vec::new(),
            base_dn: None,
            auth,
            tls: TlsConfig::default(),
            pool: PoolSettings::default(),
            retry: RetrySettings::default(),
            warm_cache: false,
            page_size: default_page_size(),
            lookup_concurrency: default_lookup_concurrency(),
        }
    }

    /// Add an explicit server URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    /// Set the naming context.
    pub fn with_base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    /// Set transport security.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set pool settings.
    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Warm the identifier cache on startup.
    #[must_use]
    pub fn with_cache_warming(mut self) -> Self {
        self.warm_cache = true;
        self
    }

    /// Naming context, configured or derived from the domain.
    pub fn effective_base_dn(&self) -> String {
        self.base_dn
            .clone()
            .unwrap_or_else(|| domain_to_base_dn(&self.domain))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.domain.trim().is_empty() && self.urls.is_empty() {
            return Err(DirectoryError::invalid_config(
                "either domain or at least one url is required",
            ));
        }

        if self.base_dn.is_none() && self.domain.trim().is_empty() {
            return Err(DirectoryError::invalid_config(
                "base_dn is required when domain is empty",
            ));
        }

        for url in &self.urls {
            let lower = url.to_ascii_lowercase();
            if !lower.starts_with("ldap://") && !lower.starts_with("ldaps://") {
                return Err(DirectoryError::invalid_config(format!(
                    "unsupported url scheme: {url}"
                )));
            }
        }

        if self.page_size == 0 {
            return Err(DirectoryError::invalid_config("page_size must be positive"));
        }

        if self.lookup_concurrency == 0 {
            return Err(DirectoryError::invalid_config(
                "lookup_concurrency must be positive",
            ));
        }

        self.auth.validate()?;
        self.tls.validate_security();
        self.pool.validate()?;
        self.retry.validate()?;

        Ok(())
    }
}

/// Authentication method configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// LDAP simple bind. `username` may be a DN, UPN or `DOMAIN\user`.
    Password { username: String, password: String },

    /// Kerberos with credentials from a keytab.
    KerberosKeytab {
        principal: String,
        keytab: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        realm: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spn: Option<String>,
    },

    /// Kerberos with an existing credential cache.
    #[serde(rename = "kerberos_ccache")]
    KerberosCCache {
        ccache_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        realm: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spn: Option<String>,
    },

    /// Kerberos with a password exchanged for a TGT at connect time.
    KerberosPassword {
        principal: String,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        realm: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spn: Option<String>,
    },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &REDACTED)
                .finish(),
            AuthConfig::KerberosKeytab {
                principal,
                keytab,
                realm,
                spn,
            } => f
                .debug_struct("KerberosKeytab")
                .field("principal", principal)
                .field("keytab", keytab)
                .field("realm", realm)
                .field("spn", spn)
                .finish(),
            AuthConfig::KerberosCCache {
                ccache_path,
                realm,
                spn,
            } => f
                .debug_struct("KerberosCCache")
                .field("ccache_path", ccache_path)
                .field("realm", realm)
                .field("spn", spn)
                .finish(),
            AuthConfig::KerberosPassword {
                principal,
                realm,
                spn,
                ..
            } => f
                .debug_struct("KerberosPassword")
                .field("principal", principal)
                .field("password", &REDACTED)
                .field("realm", realm)
                .field("spn", spn)
                .finish(),
        }
    }
}

impl AuthConfig {
    /// Create simple-bind authentication config.
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        AuthConfig::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Create keytab authentication config.
    pub fn keytab(principal: impl Into<String>, keytab: impl Into<String>) -> Self {
        AuthConfig::KerberosKeytab {
            principal: principal.into(),
            keytab: keytab.into(),
            realm: None,
            spn: None,
        }
    }

    /// Create credential-cache authentication config.
    pub fn ccache(ccache_path: impl Into<String>) -> Self {
        AuthConfig::KerberosCCache {
            ccache_path: ccache_path.into(),
            realm: None,
            spn: None,
        }
    }

    /// Create Kerberos password authentication config.
    pub fn kerberos_password(principal: impl Into<String>, password: impl Into<String>) -> Self {
        AuthConfig::KerberosPassword {
            principal: principal.into(),
            password: password.into(),
            realm: None,
            spn: None,
        }
    }

    /// Set the Kerberos realm. No effect on simple bind.
    pub fn with_realm(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            AuthConfig::Password { .. } => {}
            AuthConfig::KerberosKeytab { realm, .. }
            | AuthConfig::KerberosCCache { realm, .. }
            | AuthConfig::KerberosPassword { realm, .. } => *realm = Some(value.into()),
        }
        self
    }

    /// Set the service principal override. No effect on simple bind.
    pub fn with_spn(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            AuthConfig::Password { .. } => {}
            AuthConfig::KerberosKeytab { spn, .. }
            | AuthConfig::KerberosCCache { spn, .. }
            | AuthConfig::KerberosPassword { spn, .. } => *spn = Some(value.into()),
        }
        self
    }

    /// Whether this is one of the Kerberos methods.
    pub fn is_kerberos(&self) -> bool {
        !matches!(self, AuthConfig::Password { .. })
    }

    /// Configured realm, if any.
    pub fn realm(&self) -> Option<&str> {
        match self {
            AuthConfig::Password { .. } => None,
            AuthConfig::KerberosKeytab { realm, .. }
            | AuthConfig::KerberosCCache { realm, .. }
            | AuthConfig::KerberosPassword { realm, .. } => realm.as_deref(),
        }
    }

    /// Configured SPN override, if any.
    pub fn spn(&self) -> Option<&str> {
        match self {
            AuthConfig::Password { .. } => None,
            AuthConfig::KerberosKeytab { spn, .. }
            | AuthConfig::KerberosCCache { spn, .. }
            | AuthConfig::KerberosPassword { spn, .. } => spn.as_deref(),
        }
    }

    /// Short name for logs.
    pub fn method(&self) -> &'static str {
        match self {
            AuthConfig::Password { .. } => "password",
            AuthConfig::KerberosKeytab { .. } => "kerberos_keytab",
            AuthConfig::KerberosCCache { .. } => "kerberos_ccache",
            AuthConfig::KerberosPassword { .. } => "kerberos_password",
        }
    }

    /// Validate the authentication settings.
    pub fn validate(&self) -> DirectoryResult<()> {
        match self {
            AuthConfig::Password { username, .. } if username.trim().is_empty() => Err(
                DirectoryError::invalid_config("password auth requires a username"),
            ),
            AuthConfig::KerberosKeytab {
                principal, keytab, ..
            } if principal.trim().is_empty() || keytab.trim().is_empty() => Err(
                DirectoryError::invalid_config("keytab auth requires principal and keytab"),
            ),
            AuthConfig::KerberosCCache { ccache_path, .. } if ccache_path.trim().is_empty() => {
                Err(DirectoryError::invalid_config(
                    "ccache auth requires ccache_path",
                ))
            }
            AuthConfig::KerberosPassword {
                principal,
                password,
                ..
            } if principal.trim().is_empty() || password.is_empty() => Err(
                DirectoryError::invalid_config("kerberos password auth requires principal and password"),
            ),
            _ => Ok(()),
        }
    }
}

/// Transport security mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plain LDAP.
    None,
    /// Plain LDAP upgraded with StartTLS.
    #[default]
    StartTls,
    /// LDAP over TLS (port 636).
    Ldaps,
}

/// SSL/TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Transport security mode.
    #[serde(default)]
    pub mode: TlsMode,

    /// Whether to verify the server certificate.
    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    /// Path to a PEM CA certificate to trust in addition to the system store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            mode: TlsMode::default(),
            verify_certificate: true,
            ca_cert_path: None,
        }
    }
}

impl TlsConfig {
    /// Plain LDAP, no transport security.
    pub fn plain() -> Self {
        Self {
            mode: TlsMode::None,
            ..Default::default()
        }
    }

    /// LDAP over TLS.
    pub fn ldaps() -> Self {
        Self {
            mode: TlsMode::Ldaps,
            ..Default::default()
        }
    }

    /// Set the CA certificate path.
    pub fn with_ca_cert(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Disable certificate verification (development only).
    #[must_use]
    pub fn without_verification(mut self) -> Self {
        self.verify_certificate = false;
        self
    }

    /// Log a warning when certificate verification is disabled.
    pub fn validate_security(&self) {
        if self.mode != TlsMode::None && !self.verify_certificate {
            tracing::warn!(
                target: "security",
                "TLS certificate verification is DISABLED; the connection is open to \
                 man-in-the-middle attacks"
            );
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Upper bound on live connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle connections older than this are closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Idle connections older than this are pinged before reuse.
    #[serde(default = "default_health_check_after_secs")]
    pub health_check_after_secs: u64,

    /// How long a checkout waits for a free slot.
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,

    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Per-operation timeout.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// How long a failed endpoint is skipped.
    #[serde(default = "default_endpoint_penalty_secs")]
    pub endpoint_penalty_secs: u64,
}

fn default_max_connections() -> usize {
    5
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_health_check_after_secs() -> u64 {
    30
}

fn default_checkout_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_operation_timeout_secs() -> u64 {
    60
}

fn default_endpoint_penalty_secs() -> u64 {
    30
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            health_check_after_secs: default_health_check_after_secs(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            endpoint_penalty_secs: default_endpoint_penalty_secs(),
        }
    }
}

impl PoolSettings {
    /// Create new pool settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    /// Set the idle age after which a connection is pinged.
    pub fn with_health_check_after(mut self, secs: u64) -> Self {
        self.health_check_after_secs = secs;
        self
    }

    /// Set the checkout timeout.
    pub fn with_checkout_timeout_ms(mut self, ms: u64) -> Self {
        self.checkout_timeout_ms = ms;
        self
    }

    /// Idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Health-check threshold as Duration.
    pub fn health_check_after(&self) -> Duration {
        Duration::from_secs(self.health_check_after_secs)
    }

    /// Checkout timeout as Duration.
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout_ms)
    }

    /// Connect timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Operation timeout as Duration.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Endpoint penalty window as Duration.
    pub fn endpoint_penalty(&self) -> Duration {
        Duration::from_secs(self.endpoint_penalty_secs)
    }

    /// Validate the pool settings.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.max_connections == 0 {
            return Err(DirectoryError::invalid_config(
                "pool.max_connections must be positive",
            ));
        }
        if self.checkout_timeout_ms == 0 {
            return Err(DirectoryError::invalid_config(
                "pool.checkout_timeout_ms must be positive",
            ));
        }
        Ok(())
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Add up to 25% random jitter to each delay.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: true,
        }
    }
}

impl RetrySettings {
    /// Validate the retry settings.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(DirectoryError::invalid_config(
                "retry.max_backoff_ms must not be below initial_backoff_ms",
            ));
        }
        Ok(())
    }
}
