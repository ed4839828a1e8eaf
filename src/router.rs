//! Per-tenant connection routing.
//!
//! Tenant pools are expensive, so the router builds each one lazily on
//! first access and caches it for the life of the process. Aggregate open
//! connections scale with the number of distinct tenants touched; bound the
//! per-tenant pool size accordingly and watch [`ConnectionRouter::pool_count`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::error::TenantError;
use crate::tenant::Tenant;

/// Builds, hands out, and disposes tenant-scoped pools.
///
/// Implement this with your database client; [`PgPoolProvider`] is the
/// deadpool-backed implementation.
#[async_trait]
pub trait PoolProvider: Send + Sync {
    /// The pool type, cached per tenant.
    type Pool: Send + Sync + 'static;
    /// The session type handed to callers.
    type Session: Send;

    /// Build a pool whose connections are scoped to `schema_name`.
    async fn create_pool(&self, schema_name: &str) -> Result<Self::Pool, TenantError>;

    /// Check a session out of a pool with a bounded wait.
    async fn acquire(&self, pool: &Self::Pool) -> Result<Self::Session, TenantError>;

    /// Release the pool and its connections.
    async fn dispose(&self, pool: &Self::Pool);
}

/// Routes each tenant to its own cached connection pool.
pub struct ConnectionRouter<P: PoolProvider> {
    provider: P,
    catalog: Arc<dyn CatalogStore>,
    pools: RwLock<HashMap<Uuid, Arc<P::Pool>>>,
    // Per-tenant creation locks; the outer map lock is only held for the
    // entry clone, never across an await.
    init_locks: parking_lot::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<P: PoolProvider> ConnectionRouter<P> {
    /// Create a router over a provider and the shared catalog.
    pub fn new(provider: P, catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            provider,
            catalog,
            pools: RwLock::new(HashMap::new()),
            init_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Access the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Acquire a session bound to the tenant's schema.
    ///
    /// The first access for a tenant performs one catalog lookup and one
    /// pool construction, no matter how many callers race on it; later
    /// accesses re-check the tenant's status so suspension takes effect on
    /// the next call, not on pool expiry.
    pub async fn get_session(&self, tenant_id: Uuid) -> Result<P::Session, TenantError> {
        if let Some(pool) = self.cached(tenant_id).await {
            let tenant = self.lookup(tenant_id).await?;
            tenant.ensure_routable()?;
            return self.provider.acquire(&pool).await;
        }

        let lock = self.init_lock(tenant_id);
        let _guard = lock.lock().await;
        // A racing caller may have built the pool while we waited.
        if let Some(pool) = self.cached(tenant_id).await {
            return self.provider.acquire(&pool).await;
        }

        let tenant = self.lookup(tenant_id).await?;
        tenant.ensure_routable()?;
        debug!(tenant = %tenant_id, schema = %tenant.schema_name, "building tenant pool");
        let pool = Arc::new(self.provider.create_pool(&tenant.schema_name).await?);
        self.pools.write().await.insert(tenant_id, Arc::clone(&pool));
        info!(tenant = %tenant_id, schema = %tenant.schema_name, "tenant pool cached");

        self.provider.acquire(&pool).await
    }

    /// Dispose the tenant's cached pool, if any. Called on tenant deletion.
    pub async fn evict(&self, tenant_id: Uuid) {
        let removed = self.pools.write().await.remove(&tenant_id);
        if let Some(pool) = removed {
            self.provider.dispose(&pool).await;
            info!(tenant = %tenant_id, "evicted tenant pool");
        }
        self.init_locks.lock().remove(&tenant_id);
    }

    /// Number of pools currently cached.
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Tenants with a cached pool.
    pub async fn cached_tenants(&self) -> Vec<Uuid> {
        self.pools.read().await.keys().copied().collect()
    }

    async fn cached(&self, tenant_id: Uuid) -> Option<Arc<P::Pool>> {
        self.pools.read().await.get(&tenant_id).cloned()
    }

    fn init_lock(&self, tenant_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.init_locks.lock();
        Arc::clone(locks.entry(tenant_id).or_default())
    }

    async fn lookup(&self, tenant_id: Uuid) -> Result<Tenant, TenantError> {
        self.catalog
            .get_by_id(tenant_id)
            .await?
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()))
    }
}

/// Sizing applied to every tenant pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum connections per tenant pool.
    pub max_size: usize,
    /// Bounded wait for a checkout before failing with
    /// [`TenantError::PoolExhausted`].
    pub wait_timeout: Duration,
    /// Timeout for opening a new connection.
    pub create_timeout: Duration,
    /// Timeout for recycling a returned connection.
    pub recycle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 4,
            wait_timeout: Duration::from_secs(5),
            create_timeout: Duration::from_secs(30),
            recycle_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolSettings {
    /// Set the per-tenant pool size.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the bounded checkout wait.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

/// A pooled, schema-scoped PostgreSQL session.
///
/// The connection returns to its pool on drop. Transactions started with
/// [`PgSession::transaction`] roll back on drop unless committed, so every
/// exit path releases cleanly.
pub struct PgSession {
    client: deadpool_postgres::Client,
}

impl PgSession {
    /// Begin a transaction on this session.
    pub async fn transaction(
        &mut self,
    ) -> Result<deadpool_postgres::Transaction<'_>, TenantError> {
        Ok(self.client.transaction().await?)
    }
}

impl Deref for PgSession {
    type Target = tokio_postgres::Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl DerefMut for PgSession {
    fn deref_mut(&mut self) -> &mut tokio_postgres::Client {
        &mut self.client
    }
}

/// Deadpool-backed [`PoolProvider`].
///
/// Each tenant pool pins `search_path` to the tenant schema through
/// connection options, so every session it hands out is scoped before the
/// first query runs.
pub struct PgPoolProvider {
    base: tokio_postgres::Config,
    settings: PoolSettings,
}

impl PgPoolProvider {
    /// Create a provider from a connection string for the shared cluster.
    pub fn new(dsn: &str) -> Result<Self, TenantError> {
        let base = dsn
            .parse::<tokio_postgres::Config>()
            .map_err(|e| TenantError::database(format!("invalid connection string: {e}")))?;
        Ok(Self {
            base,
            settings: PoolSettings::default(),
        })
    }

    /// Override the pool sizing.
    pub fn with_settings(mut self, settings: PoolSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[async_trait]
impl PoolProvider for PgPoolProvider {
    type Pool = deadpool_postgres::Pool;
    type Session = PgSession;

    async fn create_pool(&self, schema_name: &str) -> Result<Self::Pool, TenantError> {
        use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
        use tokio_postgres::NoTls;

        let mut config = self.base.clone();
        config.options(&format!("-c search_path={schema_name},public"));

        let manager = Manager::from_config(
            config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(self.settings.max_size)
            .wait_timeout(Some(self.settings.wait_timeout))
            .create_timeout(Some(self.settings.create_timeout))
            .recycle_timeout(Some(self.settings.recycle_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| TenantError::database(format!("failed to build tenant pool: {e}")))?;

        info!(
            schema = %schema_name,
            max_size = self.settings.max_size,
            "tenant pool created"
        );
        Ok(pool)
    }

    async fn acquire(&self, pool: &Self::Pool) -> Result<Self::Session, TenantError> {
        let client = pool.get().await?;
        Ok(PgSession { client })
    }

    async fn dispose(&self, pool: &Self::Pool) {
        pool.close();
    }
}
