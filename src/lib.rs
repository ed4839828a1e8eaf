//! Stratum: schema-per-tenant data plane for PostgreSQL
//!
//! Provisions fully isolated per-tenant data partitions inside one shared
//! PostgreSQL cluster and routes every request to the correct isolated
//! connection.
//!
//! # Features
//!
//! - 🏢 **Tenant Catalog** - Shared master store of tenants, memberships, and
//!   daily analytics
//! - 📊 **Schema Per Tenant** - Each tenant's tables live in an isolated
//!   schema, provisioned idempotently with compensating teardown
//! - 🔀 **Connection Routing** - One lazily built, cached pool per tenant
//!   with schema-pinned sessions
//! - 🔍 **Tenant Resolution** - Subdomain, explicit identifier, and path
//!   strategies with fixed precedence
//! - 🔄 **Lifecycle Management** - Active, suspended, migrating, and archived
//!   states with enforced transitions
//! - 💾 **Backup & Restore** - Schema-scoped logical dumps with optional
//!   object-store upload
//! - 🎛️ **Tier Limits** - Plan-based quota lookup for usage metering
//!
//! # Quick Start
//!
//! ## 1. Stand Up the Catalog and Router
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratum::prelude::*;
//!
//! let catalog: Arc<dyn CatalogStore> = Arc::new(PgCatalog::new(master_pool));
//! let provider = PgPoolProvider::new("postgresql://app@db.internal/master")?;
//! let router = Arc::new(ConnectionRouter::new(provider, Arc::clone(&catalog)));
//! ```
//!
//! ## 2. Create a Tenant
//!
//! ```rust,ignore
//! let provisioner = Arc::new(SchemaProvisioner::new(PgSchemaBackend::new(admin_pool)));
//! let manager = TenantManager::new(Arc::clone(&catalog), provisioner, Arc::clone(&router));
//!
//! let tenant = manager
//!     .create(NewTenant::new("Acme Inc", "acme", TenantTier::Starter))
//!     .await?;
//! assert_eq!(tenant.schema_name, "tenant_acme");
//! ```
//!
//! ## 3. Resolve and Route a Request
//!
//! ```rust,ignore
//! let resolver = TenantResolver::new(Arc::clone(&catalog), ResolverConfig::new("example.com"));
//!
//! let signals = RequestSignals::new().with_host("acme.example.com");
//! let identity = resolver.resolve(&signals).await?;
//! if let Some(tenant) = identity.tenant() {
//!     let session = router.get_session(tenant.id).await?;
//!     let rows = session.query("SELECT id, title FROM documents", &[]).await?;
//! }
//! ```
//!
//! ## 4. Operate
//!
//! ```rust,ignore
//! let lifecycle = LifecycleController::new(Arc::clone(&catalog));
//! lifecycle.suspend(tenant.id).await?;
//!
//! let backups = BackupManager::new(catalog, PgDumpTool::new(config), backend, "./backups");
//! let artifact = backups.backup(tenant.id).await?;
//! ```

pub mod backup;
pub mod catalog;
pub mod error;
pub mod lifecycle;
pub mod limits;
pub mod management;
pub mod resolver;
pub mod router;
pub mod schema;
pub mod tenant;

pub use backup::{
    BackupArtifact, BackupConfig, BackupManager, DumpTool, FsObjectStore, ObjectStore, PgDumpTool,
};
pub use catalog::{CatalogStore, MemoryCatalog, NewTenant, PgCatalog};
pub use error::{Result, TenantError};
pub use lifecycle::LifecycleController;
pub use limits::{ResourceLimits, UNLIMITED};
pub use management::{ReconciliationReport, TenantManager};
pub use resolver::{
    GLOBAL_ADMIN_SLUG, RequestSignals, ResolvedIdentity, ResolvedTenant, ResolverConfig,
    TenantResolver,
};
pub use router::{ConnectionRouter, PgPoolProvider, PgSession, PoolProvider, PoolSettings};
pub use schema::{
    PgSchemaBackend, SchemaBackend, SchemaProvisioner, derive_schema_name, validate_schema_name,
};
pub use tenant::{
    DailyAnalytics, MembershipRole, Tenant, TenantMembership, TenantStatus, TenantTier,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backup::{BackupConfig, BackupManager, ObjectStore, PgDumpTool};
    pub use crate::catalog::{CatalogStore, NewTenant, PgCatalog};
    pub use crate::error::{Result, TenantError};
    pub use crate::lifecycle::LifecycleController;
    pub use crate::limits::ResourceLimits;
    pub use crate::management::TenantManager;
    pub use crate::resolver::{
        RequestSignals, ResolvedIdentity, ResolverConfig, TenantResolver,
    };
    pub use crate::router::{ConnectionRouter, PgPoolProvider, PoolProvider, PoolSettings};
    pub use crate::schema::{PgSchemaBackend, SchemaBackend, SchemaProvisioner};
    pub use crate::tenant::{Tenant, TenantStatus, TenantTier};
}
