//! One authenticated LDAP connection.
//!
//! [`LdapSession`] wraps an `ldap3` handle and speaks in `adlink-core`
//! types. [`SessionFactory`] opens and binds sessions for the pool.

use async_trait::async_trait;
use ldap3::adapters::PagedResults;
use ldap3::exop::{WhoAmI, WhoAmIResp};
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, ResultEntry, SearchEntry,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use adlink_core::config::{PoolSettings, TlsConfig, TlsMode};
use adlink_core::error::{rc, DirectoryError, DirectoryResult};
use adlink_core::operation::{Entry, ModOp, Modification, NewEntry, Scope, SearchRequest};

use crate::auth::Authenticator;
use crate::discovery::{Endpoint, Transport};
use crate::pool::{ConnectionFactory, PooledConnection};

/// Transport security, resolved once per client.
#[derive(Clone)]
pub struct TlsSettings {
    mode: TlsMode,
    verify: bool,
    connector: Option<native_tls::TlsConnector>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("mode", &self.mode)
            .field("verify", &self.verify)
            .field("custom_ca", &self.connector.is_some())
            .finish()
    }
}

impl TlsSettings {
    /// Load the configured CA certificate, if any.
    pub fn from_config(config: &TlsConfig) -> DirectoryResult<Self> {
        let connector = match &config.ca_cert_path {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    DirectoryError::invalid_config(format!("cannot read CA certificate {path}: {e}"))
                })?;
                let certificate = native_tls::Certificate::from_pem(&pem).map_err(|e| {
                    DirectoryError::invalid_config(format!("invalid CA certificate {path}: {e}"))
                })?;
                let connector = native_tls::TlsConnector::builder()
                    .add_root_certificate(certificate)
                    .danger_accept_invalid_certs(!config.verify_certificate)
                    .build()
                    .map_err(|e| {
                        DirectoryError::internal_with_source("failed to build TLS connector", e)
                    })?;
                Some(connector)
            }
            None => None,
        };

        Ok(Self {
            mode: config.mode,
            verify: config.verify_certificate,
            connector,
        })
    }

    fn conn_settings(&self, endpoint: &Endpoint, connect_timeout: Duration) -> LdapConnSettings {
        let starttls = self.mode == TlsMode::StartTls && endpoint.transport == Transport::Ldap;
        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(connect_timeout)
            .set_starttls(starttls)
            .set_no_tls_verify(!self.verify);
        if let Some(connector) = &self.connector {
            settings = settings.set_connector(connector.clone());
        }
        settings
    }
}

fn ldap_scope(scope: Scope) -> ldap3::Scope {
    match scope {
        Scope::Base => ldap3::Scope::Base,
        Scope::OneLevel => ldap3::Scope::OneLevel,
        Scope::Subtree => ldap3::Scope::Subtree,
    }
}

fn ldap_mod(change: &Modification) -> Mod<Vec<u8>> {
    let attribute = change.attribute.clone().into_bytes();
    let values: HashSet<Vec<u8>> = change.values.iter().cloned().collect();
    match change.op {
        ModOp::Add => Mod::Add(attribute, values),
        ModOp::Delete => Mod::Delete(attribute, values),
        ModOp::Replace => Mod::Replace(attribute, values),
    }
}

fn to_entry(raw: ResultEntry) -> Entry {
    let entry = SearchEntry::construct(raw);
    Entry {
        dn: entry.dn,
        attrs: entry.attrs,
        bin_attrs: entry.bin_attrs,
    }
}

/// Map a non-success result code for an operation on `target`.
fn check(result: LdapResult, target: &str) -> DirectoryResult<()> {
    if result.rc == rc::SUCCESS {
        Ok(())
    } else {
        Err(DirectoryError::from_result_code(result.rc, target, &result.text))
    }
}

/// A bound connection to one endpoint.
pub struct LdapSession {
    ldap: Ldap,
    endpoint: Endpoint,
    timeout: Duration,
}

impl std::fmt::Debug for LdapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapSession")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl LdapSession {
    /// Open an unauthenticated connection. The connection driver runs on
    /// its own task until the session is unbound or dropped.
    pub async fn open(
        endpoint: &Endpoint,
        tls: &TlsSettings,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> DirectoryResult<Self> {
        let url = endpoint.url();
        debug!(url = %url, "Connecting to directory server");

        let (conn, ldap) =
            LdapConnAsync::with_settings(tls.conn_settings(endpoint, connect_timeout), &url)
                .await
                .map_err(|e| {
                    DirectoryError::connection_failed_with_source(
                        format!("failed to connect to {url}"),
                        e,
                    )
                })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(Self {
            ldap,
            endpoint: endpoint.clone(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn fail(&self, error: LdapError, target: &str) -> DirectoryError {
        match error {
            LdapError::LdapResult { result } => {
                DirectoryError::from_result_code(result.rc, target, &result.text)
            }
            LdapError::Timeout { .. } => DirectoryError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            },
            LdapError::FilterParsing => DirectoryError::InvalidFilter {
                message: format!("filter for {target} could not be encoded"),
            },
            e @ (LdapError::Io { .. }
            | LdapError::OpSend { .. }
            | LdapError::ResultRecv { .. }
            | LdapError::EndOfStream
            | LdapError::NativeTLS { .. }) => DirectoryError::connection_failed_with_source(
                format!("connection to {} lost", self.endpoint),
                e,
            ),
            e => DirectoryError::internal_with_source(format!("request for {target} failed"), e),
        }
    }

    /// LDAP simple bind. Transport failures are errors; the bind result is
    /// returned for the caller to judge.
    pub(crate) async fn simple_bind(&mut self, name: &str, password: &str) -> DirectoryResult<LdapResult> {
        let timeout = self.timeout;
        self.ldap
            .with_timeout(timeout)
            .simple_bind(name, password)
            .await
            .map_err(|e| self.fail(e, name))
    }

    /// SASL GSSAPI bind against `ldap/<host>`.
    #[cfg(feature = "gssapi")]
    pub(crate) async fn sasl_gssapi_bind(&mut self, host: &str) -> DirectoryResult<LdapResult> {
        let timeout = self.timeout;
        self.ldap
            .with_timeout(timeout)
            .sasl_gssapi_bind(host)
            .await
            .map_err(|e| self.fail(e, host))
    }

    /// Run a search, following the paged-results control when requested.
    /// Continuation references are dropped.
    #[instrument(skip(self, request), fields(base = %request.base, filter = %request.filter))]
    pub async fn search(&mut self, request: &SearchRequest) -> DirectoryResult<Vec<Entry>> {
        let filter = request.filter.to_ldap_string();
        let scope = ldap_scope(request.scope);
        let attributes = request.attributes.clone();
        let timeout = self.timeout;

        let (raw, result) = match request.page_size {
            Some(page_size) => {
                let adapter: PagedResults<String, Vec<String>> =
                    PagedResults::new(i32::try_from(page_size).unwrap_or(i32::MAX));
                let mut stream = self
                    .ldap
                    .with_timeout(timeout)
                    .streaming_search_with(adapter, &request.base, scope, &filter, attributes)
                    .await
                    .map_err(|e| self.fail(e, &request.base))?;

                let mut raw = Vec::new();
                loop {
                    match stream.next().await {
                        Ok(Some(entry)) => raw.push(entry),
                        Ok(None) => break,
                        Err(e) => return Err(self.fail(e, &request.base)),
                    }
                }
                let result = stream.finish().await;
                (raw, result)
            }
            None => {
                let ldap3::SearchResult(raw, result) = self
                    .ldap
                    .with_timeout(timeout)
                    .search(&request.base, scope, &filter, attributes)
                    .await
                    .map_err(|e| self.fail(e, &request.base))?;
                (raw, result)
            }
        };
        check(result, &request.base)?;

        let entries: Vec<Entry> = raw
            .into_iter()
            .filter(|e| !e.is_ref() && !e.is_intermediate())
            .map(to_entry)
            .collect();
        debug!(count = entries.len(), "Search completed");
        Ok(entries)
    }

    #[instrument(skip(self, entry), fields(dn = %entry.dn, attributes = ?entry.attribute_names()))]
    pub async fn add(&mut self, entry: &NewEntry) -> DirectoryResult<()> {
        let attributes: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = entry
            .attributes
            .iter()
            .map(|(name, values)| (name.clone().into_bytes(), values.iter().cloned().collect()))
            .collect();
        let timeout = self.timeout;
        let result = self
            .ldap
            .with_timeout(timeout)
            .add(&entry.dn, attributes)
            .await
            .map_err(|e| self.fail(e, &entry.dn))?;
        check(result, &entry.dn)?;
        info!(dn = %entry.dn, "Directory entry created");
        Ok(())
    }

    #[instrument(skip(self, changes), fields(changes = changes.len()))]
    pub async fn modify(&mut self, dn: &str, changes: &[Modification]) -> DirectoryResult<()> {
        let mods: Vec<Mod<Vec<u8>>> = changes.iter().map(ldap_mod).collect();
        let timeout = self.timeout;
        let result = self
            .ldap
            .with_timeout(timeout)
            .modify(dn, mods)
            .await
            .map_err(|e| self.fail(e, dn))?;
        check(result, dn)?;
        info!(dn = %dn, "Directory entry updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        let timeout = self.timeout;
        let result = self
            .ldap
            .with_timeout(timeout)
            .modifydn(dn, new_rdn, true, new_superior)
            .await
            .map_err(|e| self.fail(e, dn))?;
        check(result, dn)?;
        info!(dn = %dn, new_rdn = %new_rdn, "Directory entry renamed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        let timeout = self.timeout;
        let result = self
            .ldap
            .with_timeout(timeout)
            .delete(dn)
            .await
            .map_err(|e| self.fail(e, dn))?;
        check(result, dn)?;
        info!(dn = %dn, "Directory entry deleted");
        Ok(())
    }

    /// RFC 4532 "Who am I?".
    pub async fn who_am_i(&mut self) -> DirectoryResult<String> {
        let timeout = self.timeout;
        let (exop, _result) = self
            .ldap
            .with_timeout(timeout)
            .extended(WhoAmI)
            .await
            .and_then(|r| r.success())
            .map_err(|e| self.fail(e, "whoami"))?;
        let response: WhoAmIResp = exop.parse();
        Ok(response.authzid)
    }
}

#[async_trait]
impl PooledConnection for LdapSession {
    async fn ping(&mut self) -> DirectoryResult<()> {
        self.who_am_i().await.map(|_| ())
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!(endpoint = %self.endpoint, error = %e, "Unbind failed");
        }
    }
}

/// Opens and authenticates sessions for the pool.
pub struct SessionFactory {
    tls: TlsSettings,
    connect_timeout: Duration,
    timeout: Duration,
    authenticator: Arc<Authenticator>,
}

impl SessionFactory {
    pub fn new(tls: TlsSettings, pool: &PoolSettings, authenticator: Arc<Authenticator>) -> Self {
        Self {
            tls,
            connect_timeout: pool.connect_timeout(),
            timeout: pool.operation_timeout(),
            authenticator,
        }
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }
}

#[async_trait]
impl ConnectionFactory for SessionFactory {
    type Connection = LdapSession;

    async fn connect(&self, endpoint: &Endpoint) -> DirectoryResult<LdapSession> {
        let mut session =
            LdapSession::open(endpoint, &self.tls, self.connect_timeout, self.timeout).await?;
        if let Err(e) = self.authenticator.bind(&mut session).await {
            session.close().await;
            return Err(e);
        }
        info!(endpoint = %endpoint, method = self.authenticator.method(), "LDAP connection established");
        Ok(session)
    }
}
