//! The pooled Active Directory client.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use adlink_core::cache::{CacheManager, WarmStats};
use adlink_core::config::ClientConfig;
use adlink_core::error::DirectoryResult;
use adlink_core::managers::{GroupManager, OuManager, UserManager};
use adlink_core::normalizer::IdentityNormalizer;
use adlink_core::operation::{Entry, Modification, NewEntry, SearchRequest};
use adlink_core::resilience::{RetryExecutor, RetryPolicy};
use adlink_core::traits::Directory;

use crate::auth::Authenticator;
use crate::discovery::{Discovery, Endpoint};
use crate::pool::{ConnectionPool, PoolStats};
use crate::session::{LdapSession, SessionFactory, TlsSettings};

struct ClientInner {
    domain: String,
    base_dn: String,
    pool: ConnectionPool<SessionFactory>,
    retry: RetryExecutor,
    cache: Arc<CacheManager>,
    page_size: u32,
    lookup_concurrency: usize,
}

/// Active Directory client.
///
/// Owns a connection pool, a retry executor and the identifier cache.
/// Cloning is cheap and shares all three; [`scoped`](Self::scoped) clones
/// bind a different cancellation token.
#[derive(Clone)]
pub struct AdClient {
    inner: Arc<ClientInner>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for AdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdClient")
            .field("domain", &self.inner.domain)
            .field("base_dn", &self.inner.base_dn)
            .field("pool", &self.inner.pool.stats())
            .field("cache", &self.inner.cache)
            .finish()
    }
}

impl AdClient {
    /// Connect using the system DNS configuration for discovery.
    pub async fn connect(config: ClientConfig) -> DirectoryResult<Self> {
        Self::connect_with(config, Discovery::system()?).await
    }

    /// Connect with an explicit discovery backend.
    ///
    /// Validates the configuration, resolves endpoints, and performs one
    /// authenticated round trip so bad credentials surface here. The cache is
    /// warmed afterwards when configured; a failed warm-up is logged only.
    #[instrument(skip(config, discovery), fields(domain = %config.domain, method = config.auth.method()))]
    pub async fn connect_with(config: ClientConfig, discovery: Discovery) -> DirectoryResult<Self> {
        config.validate()?;

        let endpoints = discovery.endpoints(&config).await?;
        let realm = if config.auth.is_kerberos() {
            Some(
                discovery
                    .kerberos_realm(config.auth.realm(), &config.domain)
                    .await,
            )
        } else {
            None
        };

        let client = Self::assemble(&config, endpoints, realm)?;
        client.bind().await?;

        if config.warm_cache {
            if let Err(e) = client.warm_cache().await {
                warn!(error = %e, "Cache warm-up failed; identifiers will be resolved on demand");
            }
        }

        info!(
            base_dn = %client.inner.base_dn,
            endpoints = client.inner.pool.endpoints().len(),
            "Active Directory client ready"
        );
        Ok(client)
    }

    fn assemble(
        config: &ClientConfig,
        endpoints: Vec<Endpoint>,
        realm: Option<String>,
    ) -> DirectoryResult<Self> {
        let authenticator = Arc::new(Authenticator::new(
            config.auth.clone(),
            realm,
            config.pool.connect_timeout(),
        ));
        let factory = SessionFactory::new(
            TlsSettings::from_config(&config.tls)?,
            &config.pool,
            authenticator,
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                domain: config.domain.clone(),
                base_dn: config.effective_base_dn(),
                pool: ConnectionPool::new(factory, endpoints, config.pool.clone()),
                retry: RetryExecutor::new(RetryPolicy::from(&config.retry)),
                cache: Arc::new(CacheManager::new()),
                page_size: config.page_size,
                lookup_concurrency: config.lookup_concurrency,
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// A handle whose operations abort when `cancel` fires.
    #[must_use]
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.inner.cache
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Identifier normalizer over this client.
    pub fn normalizer(&self) -> IdentityNormalizer<AdClient> {
        IdentityNormalizer::new(Arc::new(self.clone()), Arc::clone(&self.inner.cache))
            .with_concurrency(self.inner.lookup_concurrency)
    }

    pub fn groups(&self) -> GroupManager<AdClient> {
        GroupManager::new(Arc::new(self.clone()), Arc::clone(&self.inner.cache))
            .with_lookup_concurrency(self.inner.lookup_concurrency)
    }

    pub fn users(&self) -> UserManager<AdClient> {
        UserManager::new(Arc::new(self.clone()), Arc::clone(&self.inner.cache))
    }

    pub fn ous(&self) -> OuManager<AdClient> {
        OuManager::new(Arc::new(self.clone()), Arc::clone(&self.inner.cache))
    }

    /// Bulk-load user and group identifiers into the cache.
    pub async fn warm_cache(&self) -> DirectoryResult<WarmStats> {
        self.inner
            .cache
            .warm(self, &self.inner.base_dn, self.inner.page_size)
            .await
    }

    /// Close the pool. Later operations fail with `PoolExhausted`.
    pub async fn close(&self) {
        self.inner.pool.close().await;
    }

    /// Run `operation` on a pooled session under the retry policy.
    ///
    /// Connections that failed at the transport level, or were abandoned by
    /// cancellation mid-request, are destroyed instead of returned.
    async fn execute<T, F>(&self, name: &'static str, operation: F) -> DirectoryResult<T>
    where
        T: Send,
        F: for<'s> Fn(&'s mut LdapSession) -> BoxFuture<'s, DirectoryResult<T>> + Send + Sync,
    {
        let inner = &*self.inner;
        let cancel = &self.cancel;
        let operation = &operation;

        inner
            .retry
            .execute(cancel, move || inner.pool.run(name, cancel, operation))
            .await
    }
}

#[async_trait]
impl Directory for AdClient {
    fn base_dn(&self) -> &str {
        &self.inner.base_dn
    }

    async fn search(&self, request: SearchRequest) -> DirectoryResult<Vec<Entry>> {
        self.execute("search", move |session| {
            let request = request.clone();
            Box::pin(async move { session.search(&request).await })
        })
        .await
    }

    async fn add(&self, entry: NewEntry) -> DirectoryResult<()> {
        self.execute("add", move |session| {
            let entry = entry.clone();
            Box::pin(async move { session.add(&entry).await })
        })
        .await
    }

    async fn modify(&self, dn: &str, changes: Vec<Modification>) -> DirectoryResult<()> {
        let dn = dn.to_string();
        self.execute("modify", move |session| {
            let dn = dn.clone();
            let changes = changes.clone();
            Box::pin(async move { session.modify(&dn, &changes).await })
        })
        .await
    }

    async fn modify_dn(
        &self,
        dn: &str,
        new_rdn: &str,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        let dn = dn.to_string();
        let new_rdn = new_rdn.to_string();
        let new_superior = new_superior.map(str::to_string);
        self.execute("modify_dn", move |session| {
            let (dn, new_rdn, new_superior) = (dn.clone(), new_rdn.clone(), new_superior.clone());
            Box::pin(async move {
                session
                    .modify_dn(&dn, &new_rdn, new_superior.as_deref())
                    .await
            })
        })
        .await
    }

    async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        let dn = dn.to_string();
        self.execute("delete", move |session| {
            let dn = dn.clone();
            Box::pin(async move { session.delete(&dn).await })
        })
        .await
    }

    /// Re-authenticate a pooled session with the configured credentials.
    async fn bind(&self) -> DirectoryResult<()> {
        let authenticator = Arc::clone(self.inner.pool.factory().authenticator());
        self.execute("bind", move |session| {
            let authenticator = Arc::clone(&authenticator);
            Box::pin(async move { authenticator.bind(session).await })
        })
        .await
    }

    async fn who_am_i(&self) -> DirectoryResult<String> {
        self.execute("who_am_i", |session| Box::pin(session.who_am_i()))
            .await
    }
}
