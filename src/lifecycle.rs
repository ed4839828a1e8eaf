//! Tenant lifecycle transitions.
//!
//! Applies the status state machine through the catalog. The rules
//! themselves live on [`TenantStatus::can_transition`]; this controller adds
//! the lookup, the idempotent no-op for same-state requests, and the audit
//! log line.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::error::TenantError;
use crate::tenant::{Tenant, TenantStatus};

/// Drives tenant status changes.
pub struct LifecycleController {
    catalog: Arc<dyn CatalogStore>,
}

impl LifecycleController {
    /// Create a controller over the shared catalog.
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    /// Temporarily disable a tenant.
    pub async fn suspend(&self, tenant_id: Uuid) -> Result<Tenant, TenantError> {
        self.transition(tenant_id, TenantStatus::Suspended).await
    }

    /// Re-enable a suspended tenant or close a migration window.
    pub async fn activate(&self, tenant_id: Uuid) -> Result<Tenant, TenantError> {
        self.transition(tenant_id, TenantStatus::Active).await
    }

    /// Open a schema-upgrade window.
    pub async fn begin_migration(&self, tenant_id: Uuid) -> Result<Tenant, TenantError> {
        self.transition(tenant_id, TenantStatus::Migrating).await
    }

    /// Close a schema-upgrade window.
    pub async fn complete_migration(&self, tenant_id: Uuid) -> Result<Tenant, TenantError> {
        let tenant = self.require(tenant_id).await?;
        if tenant.status != TenantStatus::Migrating {
            return Err(TenantError::transition(
                tenant.status.as_str(),
                TenantStatus::Active.as_str(),
            ));
        }
        self.transition(tenant_id, TenantStatus::Active).await
    }

    /// Permanently deactivate a tenant. Irreversible.
    pub async fn archive(&self, tenant_id: Uuid) -> Result<Tenant, TenantError> {
        self.transition(tenant_id, TenantStatus::Archived).await
    }

    /// Whether deletion may proceed. A live tenant needs an explicit force;
    /// suspended and archived tenants may be deleted outright.
    pub fn deletion_allowed(status: TenantStatus, force: bool) -> bool {
        force || matches!(status, TenantStatus::Suspended | TenantStatus::Archived)
    }

    async fn transition(
        &self,
        tenant_id: Uuid,
        to: TenantStatus,
    ) -> Result<Tenant, TenantError> {
        let mut tenant = self.require(tenant_id).await?;
        if tenant.status == to {
            return Ok(tenant);
        }
        if !tenant.status.can_transition(to) {
            return Err(TenantError::transition(tenant.status.as_str(), to.as_str()));
        }
        self.catalog.update_status(tenant_id, to).await?;
        info!(
            tenant = %tenant.slug,
            from = %tenant.status,
            to = %to,
            "tenant status changed"
        );
        tenant.status = to;
        Ok(tenant)
    }

    async fn require(&self, tenant_id: Uuid) -> Result<Tenant, TenantError> {
        self.catalog
            .get_by_id(tenant_id)
            .await?
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()))
    }
}
