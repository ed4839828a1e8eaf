//! Tenant provisioning orchestration and reconciliation.
//!
//! Creation spans two stores no transaction covers: the catalog row and the
//! physical schema. The manager inserts the row first, provisions second,
//! and compensates by removing the row when provisioning fails. Compensation
//! does not survive a process crash, so [`TenantManager::reconcile`] exists
//! to find and repair the divergence afterwards.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogStore, NewTenant};
use crate::error::TenantError;
use crate::lifecycle::LifecycleController;
use crate::router::{ConnectionRouter, PoolProvider};
use crate::schema::{SCHEMA_PREFIX, SchemaBackend, SchemaProvisioner};
use crate::tenant::Tenant;

/// Divergence between the catalog and the physical schemas.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    /// Catalog rows whose schema is missing.
    pub missing_schemas: Vec<String>,
    /// Schemas with no catalog row; reported, never dropped automatically.
    pub orphan_schemas: Vec<String>,
    /// Schemas re-provisioned during this run.
    pub repaired: Vec<String>,
}

impl ReconciliationReport {
    /// Whether the two stores agree.
    pub fn is_clean(&self) -> bool {
        self.missing_schemas.is_empty() && self.orphan_schemas.is_empty()
    }
}

/// Administrative entry point for tenant creation, deletion, and repair.
pub struct TenantManager<P: PoolProvider, B: SchemaBackend> {
    catalog: Arc<dyn CatalogStore>,
    provisioner: Arc<SchemaProvisioner<B>>,
    router: Arc<ConnectionRouter<P>>,
}

impl<P: PoolProvider, B: SchemaBackend> TenantManager<P, B> {
    /// Create a manager over the catalog, provisioner, and router.
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        provisioner: Arc<SchemaProvisioner<B>>,
        router: Arc<ConnectionRouter<P>>,
    ) -> Self {
        Self {
            catalog,
            provisioner,
            router,
        }
    }

    /// Create a tenant: catalog row first, then the physical schema.
    ///
    /// When provisioning fails the catalog row is removed again before the
    /// error propagates, so a failed create leaves nothing behind on the
    /// happy path.
    pub async fn create(&self, new: NewTenant) -> Result<Tenant, TenantError> {
        let tenant = self.catalog.create(new).await?;

        if let Err(err) = self.provisioner.provision(&tenant.schema_name).await {
            warn!(
                tenant = %tenant.slug,
                error = %err,
                "provisioning failed, removing catalog row"
            );
            if let Err(cleanup_err) = self.catalog.delete(tenant.id).await {
                warn!(
                    tenant = %tenant.slug,
                    error = %cleanup_err,
                    "catalog cleanup failed, reconciliation will repair"
                );
            }
            return Err(err);
        }

        info!(tenant = %tenant.slug, schema = %tenant.schema_name, "tenant created");
        Ok(tenant)
    }

    /// Delete a tenant permanently.
    ///
    /// A live tenant requires `force`. The catalog row goes first so
    /// resolution and routing stop immediately; the schema drop afterwards
    /// is best-effort cleanup and a failure there only leaves an orphan for
    /// [`TenantManager::reconcile`].
    pub async fn delete(&self, tenant_id: Uuid, force: bool) -> Result<(), TenantError> {
        let tenant = self
            .catalog
            .get_by_id(tenant_id)
            .await?
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()))?;

        if !LifecycleController::deletion_allowed(tenant.status, force) {
            return Err(TenantError::transition(tenant.status.as_str(), "deleted"));
        }

        self.catalog.delete(tenant.id).await?;
        self.router.evict(tenant.id).await;

        if let Err(err) = self.provisioner.deprovision(&tenant.schema_name).await {
            warn!(
                schema = %tenant.schema_name,
                error = %err,
                "schema drop failed, reconciliation will report the orphan"
            );
        }

        info!(tenant = %tenant.slug, "tenant deleted");
        Ok(())
    }

    /// Compare catalog rows against physical schemas.
    ///
    /// With `repair` set, rows lacking a schema are re-provisioned. Schemas
    /// lacking a row are only reported; dropping data automatically is not
    /// this crate's call.
    pub async fn reconcile(&self, repair: bool) -> Result<ReconciliationReport, TenantError> {
        let tenants = self.catalog.list(None).await?;
        let schemas = self
            .provisioner
            .backend()
            .list_schemas(SCHEMA_PREFIX)
            .await?;

        let known: HashSet<&str> = tenants.iter().map(|t| t.schema_name.as_str()).collect();
        let existing: HashSet<&str> = schemas.iter().map(String::as_str).collect();

        let mut report = ReconciliationReport::default();
        for tenant in &tenants {
            if existing.contains(tenant.schema_name.as_str()) {
                continue;
            }
            if repair {
                match self.provisioner.provision(&tenant.schema_name).await {
                    Ok(()) => report.repaired.push(tenant.schema_name.clone()),
                    Err(err) => {
                        warn!(
                            schema = %tenant.schema_name,
                            error = %err,
                            "repair provisioning failed"
                        );
                        report.missing_schemas.push(tenant.schema_name.clone());
                    }
                }
            } else {
                report.missing_schemas.push(tenant.schema_name.clone());
            }
        }
        for schema in &schemas {
            if !known.contains(schema.as_str()) {
                report.orphan_schemas.push(schema.clone());
            }
        }

        if !report.is_clean() {
            warn!(
                missing = report.missing_schemas.len(),
                orphans = report.orphan_schemas.len(),
                "catalog and physical schemas diverged"
            );
        }
        Ok(report)
    }
}
