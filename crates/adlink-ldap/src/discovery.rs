//! Domain controller discovery.
//!
//! Endpoints come from explicit `ldap://` / `ldaps://` URLs in the client
//! configuration, from `_ldap._tcp.<domain>` SRV records, or both. Explicit
//! URLs rank first; when any are configured a failed SRV lookup only costs a
//! warning.

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

use adlink_core::config::{ClientConfig, TlsMode};
use adlink_core::error::{DirectoryError, DirectoryResult};

/// Default port for plain LDAP and StartTLS.
pub const LDAP_PORT: u16 = 389;

/// Default port for LDAP over TLS.
pub const LDAPS_PORT: u16 = 636;

/// Wire transport of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// `ldap://`, optionally upgraded with StartTLS.
    Ldap,
    /// `ldaps://`
    Ldaps,
}

impl Transport {
    fn scheme(self) -> &'static str {
        match self {
            Transport::Ldap => "ldap",
            Transport::Ldaps => "ldaps",
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Transport::Ldap => LDAP_PORT,
            Transport::Ldaps => LDAPS_PORT,
        }
    }
}

/// A directory server address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Host name or IP address, without brackets.
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    /// SRV priority; zero for explicit URLs.
    pub priority: u16,
    /// SRV weight; zero for explicit URLs.
    pub weight: u16,
}

impl Endpoint {
    /// Create an endpoint on the transport's default port.
    pub fn new(host: impl Into<String>, transport: Transport) -> Self {
        Self {
            host: host.into(),
            port: transport.default_port(),
            transport,
            priority: 0,
            weight: 0,
        }
    }

    /// Parse `ldap://host[:port]` or `ldaps://host[:port]`.
    pub fn parse_url(url: &str) -> DirectoryResult<Self> {
        let invalid = |why: &str| DirectoryError::invalid_config(format!("{url}: {why}"));

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let transport = if scheme.eq_ignore_ascii_case("ldap") {
            Transport::Ldap
        } else if scheme.eq_ignore_ascii_case("ldaps") {
            Transport::Ldaps
        } else {
            return Err(invalid("unsupported scheme"));
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':').ok_or_else(|| invalid("invalid port"))?)),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => {
                    return Err(invalid("IPv6 literal must be bracketed"))
                }
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None => transport.default_port(),
        };

        Ok(Self {
            host: host.to_string(),
            port,
            transport,
            priority: 0,
            weight: 0,
        })
    }

    /// URL accepted by the LDAP library.
    pub fn url(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", self.transport.scheme(), self.host, self.port)
        } else {
            format!("{}://{}:{}", self.transport.scheme(), self.host, self.port)
        }
    }

    /// Whether the host is an IP literal rather than a name.
    pub fn is_ip(&self) -> bool {
        self.host.parse::<IpAddr>().is_ok()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// One SRV answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

/// Source of SRV records.
#[async_trait]
pub trait SrvResolver: Send + Sync {
    /// Look up `name`; an empty answer is `Ok(vec![])`.
    async fn lookup_srv(&self, name: &str) -> DirectoryResult<Vec<SrvRecord>>;
}

/// SRV lookups through the system resolver configuration.
pub struct DnsSrvResolver {
    resolver: TokioAsyncResolver,
}

impl DnsSrvResolver {
    /// Build a resolver from `/etc/resolv.conf` (or the platform equivalent).
    pub fn from_system_conf() -> DirectoryResult<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
            DirectoryError::discovery_with_source("", "failed to load resolver configuration", e)
        })?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl SrvResolver for DnsSrvResolver {
    async fn lookup_srv(&self, name: &str) -> DirectoryResult<Vec<SrvRecord>> {
        match self.resolver.srv_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|srv| SrvRecord {
                    target: srv.target().to_utf8(),
                    port: srv.port(),
                    priority: srv.priority(),
                    weight: srv.weight(),
                })
                .collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(DirectoryError::discovery_with_source(
                name,
                "SRV lookup failed",
                e,
            )),
        }
    }
}

/// Order SRV records per RFC 2782: ascending priority, then weighted random
/// selection inside each priority class.
pub fn order_srv_records<R>(mut records: Vec<SrvRecord>, rng: &mut R) -> Vec<SrvRecord>
where
    R: Rng + ?Sized,
{
    records.sort_by_key(|r| r.priority);
    let mut ordered = Vec::with_capacity(records.len());

    let mut remaining = records.into_iter().peekable();
    while let Some(first) = remaining.next() {
        let priority = first.priority;
        let mut class = vec![first];
        while let Some(next) = remaining.next_if(|r| r.priority == priority) {
            class.push(next);
        }
        // Zero-weight records go first so they keep a small chance of selection.
        class.sort_by_key(|r| r.weight != 0);

        while !class.is_empty() {
            let total: u32 = class.iter().map(|r| u32::from(r.weight)).sum();
            let pick = rng.gen_range(0..=total);
            let mut running = 0u32;
            let index = class
                .iter()
                .position(|r| {
                    running += u32::from(r.weight);
                    running >= pick
                })
                .unwrap_or(0);
            ordered.push(class.remove(index));
        }
    }
    ordered
}

/// Whether a Kerberos configuration file is available to the GSSAPI library.
pub fn krb5_config_present() -> bool {
    match std::env::var_os("KRB5_CONFIG") {
        Some(path) if !path.is_empty() => true,
        _ => Path::new("/etc/krb5.conf").exists(),
    }
}

/// Resolves domains to endpoints and Kerberos realms.
#[derive(Clone)]
pub struct Discovery {
    resolver: Arc<dyn SrvResolver>,
}

impl Discovery {
    pub fn new(resolver: Arc<dyn SrvResolver>) -> Self {
        Self { resolver }
    }

    /// Discovery through the system DNS configuration.
    pub fn system() -> DirectoryResult<Self> {
        Ok(Self::new(Arc::new(DnsSrvResolver::from_system_conf()?)))
    }

    /// Domain controllers advertised for `domain`, best first.
    ///
    /// Targets are reported without the trailing root dot and each host
    /// appears once. With [`TlsMode::Ldaps`] every endpoint uses port 636.
    #[instrument(skip(self))]
    pub async fn resolve_domain(&self, domain: &str, mode: TlsMode) -> DirectoryResult<Vec<Endpoint>> {
        let name = format!("_ldap._tcp.{}", domain.trim_end_matches('.'));
        let records = self.resolver.lookup_srv(&name).await?;
        if records.is_empty() {
            return Err(DirectoryError::discovery(domain, format!("no SRV records for {name}")));
        }

        let ordered = order_srv_records(records, &mut rand::thread_rng());
        let mut seen = HashSet::new();
        let endpoints: Vec<Endpoint> = ordered
            .into_iter()
            .filter_map(|record| {
                let host = record.target.trim_end_matches('.').to_string();
                if host.is_empty() || !seen.insert(host.to_ascii_lowercase()) {
                    return None;
                }
                let (transport, port) = match mode {
                    TlsMode::Ldaps => (Transport::Ldaps, LDAPS_PORT),
                    TlsMode::None | TlsMode::StartTls => (Transport::Ldap, record.port),
                };
                Some(Endpoint {
                    host,
                    port,
                    transport,
                    priority: record.priority,
                    weight: record.weight,
                })
            })
            .collect();

        debug!(count = endpoints.len(), "Discovered domain controllers");
        Ok(endpoints)
    }

    /// Kerberos realm advertised for `domain`.
    ///
    /// AD publishes `_kerberos._tcp.<domain>` on every DC; when present the
    /// realm is the upper-cased domain.
    pub async fn resolve_kerberos_realm(&self, domain: &str) -> DirectoryResult<String> {
        let domain = domain.trim_end_matches('.');
        let name = format!("_kerberos._tcp.{domain}");
        let records = self.resolver.lookup_srv(&name).await?;
        if records.is_empty() {
            return Err(DirectoryError::discovery(domain, format!("no SRV records for {name}")));
        }
        Ok(domain.to_ascii_uppercase())
    }

    /// Ranked endpoints for a client: explicit URLs first, then discovered
    /// controllers not already listed.
    #[instrument(skip(self, config), fields(domain = %config.domain))]
    pub async fn endpoints(&self, config: &ClientConfig) -> DirectoryResult<Vec<Endpoint>> {
        let mut endpoints = config
            .urls
            .iter()
            .map(|url| Endpoint::parse_url(url))
            .collect::<DirectoryResult<Vec<_>>>()?;

        if !config.domain.trim().is_empty() {
            match self.resolve_domain(&config.domain, config.tls.mode).await {
                Ok(discovered) => {
                    for endpoint in discovered {
                        let duplicate = endpoints.iter().any(|e| {
                            e.host.eq_ignore_ascii_case(&endpoint.host) && e.port == endpoint.port
                        });
                        if !duplicate {
                            endpoints.push(endpoint);
                        }
                    }
                }
                Err(e) if !endpoints.is_empty() => {
                    warn!(error = %e, "Discovery failed; using configured URLs only");
                }
                Err(e) => return Err(e),
            }
        }

        if endpoints.is_empty() {
            return Err(DirectoryError::discovery(
                config.domain.as_str(),
                "no endpoints configured or discovered",
            ));
        }
        info!(
            count = endpoints.len(),
            first = %endpoints[0],
            "Directory endpoints resolved"
        );
        Ok(endpoints)
    }

    /// Realm used for Kerberos binds: configured, else discovered (only
    /// without a local Kerberos configuration), else the upper-cased domain.
    pub async fn kerberos_realm(&self, configured: Option<&str>, domain: &str) -> String {
        self.realm_with(configured, domain, krb5_config_present()).await
    }

    async fn realm_with(&self, configured: Option<&str>, domain: &str, config_present: bool) -> String {
        if let Some(realm) = configured.filter(|r| !r.trim().is_empty()) {
            return realm.to_string();
        }
        if !config_present {
            match self.resolve_kerberos_realm(domain).await {
                Ok(realm) => return realm,
                Err(e) => debug!(error = %e, "Realm discovery failed"),
            }
        }
        domain.trim_end_matches('.').to_ascii_uppercase()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use adlink_core::config::{AuthConfig, TlsConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Resolver answering from a fixed table.
    #[derive(Default)]
    pub(crate) struct StaticResolver {
        answers: HashMap<String, Vec<SrvRecord>>,
        failing: bool,
        pub(crate) queries: Mutex<Vec<String>>,
    }

    impl StaticResolver {
        pub(crate) fn with(mut self, name: &str, records: Vec<SrvRecord>) -> Self {
            self.answers.insert(name.to_string(), records);
            self
        }

        pub(crate) fn failing() -> Self {
            Self {
                failing: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl SrvResolver for StaticResolver {
        async fn lookup_srv(&self, name: &str) -> DirectoryResult<Vec<SrvRecord>> {
            self.queries.lock().unwrap().push(name.to_string());
            if self.failing {
                return Err(DirectoryError::discovery(name, "SERVFAIL"));
            }
            Ok(self.answers.get(name).cloned().unwrap_or_default())
        }
    }

    pub(crate) fn srv(target: &str, priority: u16, weight: u16) -> SrvRecord {
        SrvRecord {
            target: target.to_string(),
            port: 389,
            priority,
            weight,
        }
    }

    fn discovery(resolver: StaticResolver) -> Discovery {
        Discovery::new(Arc::new(resolver))
    }

    #[test]
    fn test_parse_url() {
        let e = Endpoint::parse_url("ldap://dc1.corp.example.com").unwrap();
        assert_eq!((e.host.as_str(), e.port, e.transport), ("dc1.corp.example.com", 389, Transport::Ldap));

        let e = Endpoint::parse_url("LDAPS://dc2:3269/").unwrap();
        assert_eq!((e.host.as_str(), e.port, e.transport), ("dc2", 3269, Transport::Ldaps));

        let e = Endpoint::parse_url("ldaps://[fd00::10]").unwrap();
        assert_eq!(e.host, "fd00::10");
        assert_eq!(e.port, 636);
        assert_eq!(e.url(), "ldaps://[fd00::10]:636");
        assert!(e.is_ip());

        assert!(Endpoint::parse_url("http://dc1").is_err());
        assert!(Endpoint::parse_url("ldap://dc1:notaport").is_err());
        assert!(Endpoint::parse_url("ldap://").is_err());
    }

    #[test]
    fn test_ipv6_literal_needs_brackets() {
        let err = Endpoint::parse_url("ldap://fd00::10").unwrap_err();
        assert!(err.to_string().contains("bracketed"), "{err}");
        assert!(Endpoint::parse_url("ldap://fd00::10:389").is_err());
        assert!(Endpoint::parse_url("ldap://[fd00::10]389").is_err());

        let e = Endpoint::parse_url("ldap://[fd00::10]:3268").unwrap();
        assert_eq!((e.host.as_str(), e.port), ("fd00::10", 3268));
        assert_eq!(Endpoint::parse_url(&e.url()).unwrap(), e);
    }

    #[test]
    fn test_priority_classes_are_ordered() {
        let records = vec![srv("c", 20, 0), srv("a", 0, 100), srv("b", 10, 5)];
        let mut rng = StdRng::seed_from_u64(7);
        let ordered = order_srv_records(records, &mut rng);
        let targets: Vec<_> = ordered.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, ["a", "b", "c"]);
    }

    #[test]
    fn test_weight_biases_selection() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut heavy_first = 0;
        for _ in 0..1000 {
            let ordered = order_srv_records(vec![srv("light", 0, 10), srv("heavy", 0, 90)], &mut rng);
            assert_eq!(ordered.len(), 2);
            if ordered[0].target == "heavy" {
                heavy_first += 1;
            }
        }
        assert!(heavy_first > 750, "heavy chosen first {heavy_first} times");
        assert!(heavy_first < 1000);
    }

    #[tokio::test]
    async fn test_resolve_domain_strips_dots_and_dedupes() {
        let resolver = StaticResolver::default().with(
            "_ldap._tcp.corp.example.com",
            vec![
                srv("dc1.corp.example.com.", 0, 100),
                srv("DC1.corp.example.com.", 0, 100),
                srv("dc2.corp.example.com.", 10, 100),
            ],
        );
        let endpoints = discovery(resolver)
            .resolve_domain("corp.example.com", TlsMode::StartTls)
            .await
            .unwrap();
        let hosts: Vec<_> = endpoints.iter().map(|e| e.host.as_str()).collect();
        assert_eq!(hosts.len(), 2);
        assert!(hosts[0].eq_ignore_ascii_case("dc1.corp.example.com"));
        assert_eq!(hosts[1], "dc2.corp.example.com");
        assert!(endpoints.iter().all(|e| e.transport == Transport::Ldap && e.port == 389));
    }

    #[tokio::test]
    async fn test_ldaps_mode_uses_636() {
        let resolver = StaticResolver::default()
            .with("_ldap._tcp.corp.example.com", vec![srv("dc1.corp.example.com.", 0, 0)]);
        let endpoints = discovery(resolver)
            .resolve_domain("corp.example.com", TlsMode::Ldaps)
            .await
            .unwrap();
        assert_eq!(endpoints[0].port, 636);
        assert_eq!(endpoints[0].url(), "ldaps://dc1.corp.example.com:636");
    }

    #[tokio::test]
    async fn test_no_records_is_discovery_error() {
        let err = discovery(StaticResolver::default())
            .resolve_domain("corp.example.com", TlsMode::None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "DISCOVERY_FAILED");
    }

    #[tokio::test]
    async fn test_explicit_urls_rank_first_and_survive_failed_discovery() {
        let config = ClientConfig::new("corp.example.com", AuthConfig::password("svc", "pw"))
            .with_url("ldap://10.0.0.5");
        let endpoints = discovery(StaticResolver::failing())
            .endpoints(&config)
            .await
            .unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].host, "10.0.0.5");

        let resolver = StaticResolver::default().with(
            "_ldap._tcp.corp.example.com",
            vec![srv("dc1.corp.example.com.", 0, 0), srv("10.0.0.5.", 0, 0)],
        );
        let endpoints = discovery(resolver).endpoints(&config).await.unwrap();
        let hosts: Vec<_> = endpoints.iter().map(|e| e.host.as_str()).collect();
        assert_eq!(hosts, ["10.0.0.5", "dc1.corp.example.com"]);
    }

    #[tokio::test]
    async fn test_discovery_failure_without_urls_is_fatal() {
        let config = ClientConfig::new("corp.example.com", AuthConfig::password("svc", "pw"))
            .with_tls(TlsConfig::plain());
        let err = discovery(StaticResolver::failing())
            .endpoints(&config)
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Discovery { .. }));
    }

    #[tokio::test]
    async fn test_realm_resolution_order() {
        let resolver = StaticResolver::default()
            .with("_kerberos._tcp.corp.example.com", vec![srv("dc1.corp.example.com.", 0, 0)]);
        let discovery = discovery(resolver);

        assert_eq!(
            discovery.realm_with(Some("EXAMPLE.LOCAL"), "corp.example.com", false).await,
            "EXAMPLE.LOCAL"
        );
        assert_eq!(
            discovery.realm_with(None, "corp.example.com", false).await,
            "CORP.EXAMPLE.COM"
        );
        assert_eq!(
            discovery.realm_with(None, "other.example.com", false).await,
            "OTHER.EXAMPLE.COM"
        );
    }

    #[tokio::test]
    async fn test_realm_discovery_skipped_with_local_config() {
        let resolver = Arc::new(StaticResolver::default());
        let discovery = Discovery::new(resolver.clone());
        let realm = discovery.realm_with(None, "corp.example.com", true).await;
        assert_eq!(realm, "CORP.EXAMPLE.COM");
        assert!(resolver.queries.lock().unwrap().is_empty());
    }
}
