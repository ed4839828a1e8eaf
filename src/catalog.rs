//! Shared master catalog.
//!
//! The catalog is the single source of truth for tenant existence and
//! status. It lives in one shared namespace, distinct from every per-tenant
//! schema, and also holds tenant-user memberships and daily analytics
//! rollups.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::TenantError;
use crate::limits::ResourceLimits;
use crate::schema::derive_schema_name;
use crate::tenant::{
    DailyAnalytics, MembershipRole, Tenant, TenantMembership, TenantStatus, TenantTier,
};

/// Payload for creating a tenant.
#[derive(Debug, Clone)]
pub struct NewTenant {
    /// Display name.
    pub name: String,
    /// URL-safe unique slug; the schema name is derived from it.
    pub slug: String,
    /// Plan tier; resource limits default from it.
    pub tier: TenantTier,
    /// Primary contact address.
    pub contact_email: String,
    /// Initial settings.
    pub settings: HashMap<String, Value>,
}

impl NewTenant {
    /// Create a request with empty contact and settings.
    pub fn new(name: impl Into<String>, slug: impl Into<String>, tier: TenantTier) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            tier,
            contact_email: String::new(),
            settings: HashMap::new(),
        }
    }

    /// Set the contact address.
    pub fn with_contact_email(mut self, email: impl Into<String>) -> Self {
        self.contact_email = email.into();
        self
    }

    /// Add a setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Materialize the catalog row. Fails before any store access when the
    /// slug cannot produce a valid schema name.
    pub fn into_tenant(self) -> Result<Tenant, TenantError> {
        let schema_name = derive_schema_name(&self.slug)?;
        let resource_limits = ResourceLimits::for_tier(self.tier);
        Ok(Tenant {
            id: Uuid::new_v4(),
            name: self.name,
            slug: self.slug,
            schema_name,
            status: TenantStatus::Active,
            tier: self.tier,
            created_at: Utc::now(),
            settings: self.settings,
            resource_limits,
            contact_email: self.contact_email,
        })
    }
}

/// Catalog store over tenants, memberships, and daily analytics.
///
/// Implement this with your database; [`MemoryCatalog`] backs tests and
/// [`PgCatalog`] is the PostgreSQL implementation.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert a tenant row with tier-default limits.
    ///
    /// Fails with [`TenantError::DuplicateTenant`] when the slug or derived
    /// schema name is already taken, atomically with respect to concurrent
    /// calls.
    async fn create(&self, new: NewTenant) -> Result<Tenant, TenantError>;

    /// Fetch a tenant by id.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>, TenantError>;

    /// Fetch a tenant by slug.
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenantError>;

    /// List tenants, optionally filtered by status.
    async fn list(&self, status: Option<TenantStatus>) -> Result<Vec<Tenant>, TenantError>;

    /// Replace the mutable fields of a tenant row.
    async fn update(&self, tenant: &Tenant) -> Result<(), TenantError>;

    /// Set a tenant's status. Fails with [`TenantError::NotFound`] when the
    /// tenant is absent; setting the current status again is fine.
    async fn update_status(&self, id: Uuid, status: TenantStatus) -> Result<(), TenantError>;

    /// Remove the catalog row only. Dropping the physical schema is the
    /// caller's responsibility and must happen after this succeeds.
    async fn delete(&self, id: Uuid) -> Result<(), TenantError>;

    /// Insert or update a membership; the (tenant, user) pair stays unique.
    async fn add_member(&self, membership: TenantMembership) -> Result<(), TenantError>;

    /// Remove a membership.
    async fn remove_member(&self, tenant_id: Uuid, user_id: Uuid) -> Result<(), TenantError>;

    /// List a tenant's memberships.
    async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<TenantMembership>, TenantError>;

    /// Upsert the daily analytics row; at most one row exists per tenant-day.
    async fn upsert_daily(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
        metrics: HashMap<String, Value>,
    ) -> Result<(), TenantError>;

    /// Fetch one daily analytics row.
    async fn get_daily(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyAnalytics>, TenantError>;
}

#[derive(Default)]
struct MemoryCatalogInner {
    tenants: HashMap<Uuid, Tenant>,
    members: HashMap<(Uuid, Uuid), TenantMembership>,
    analytics: HashMap<(Uuid, NaiveDate), DailyAnalytics>,
}

/// In-memory catalog for tests and embedded use.
#[derive(Default)]
pub struct MemoryCatalog {
    inner: parking_lot::RwLock<MemoryCatalogInner>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn create(&self, new: NewTenant) -> Result<Tenant, TenantError> {
        let tenant = new.into_tenant()?;
        // Uniqueness is checked and the row inserted under one write lock so
        // concurrent duplicates cannot both pass the check.
        let mut inner = self.inner.write();
        if inner.tenants.values().any(|t| t.slug == tenant.slug) {
            return Err(TenantError::DuplicateTenant(tenant.slug));
        }
        if inner
            .tenants
            .values()
            .any(|t| t.schema_name == tenant.schema_name)
        {
            return Err(TenantError::DuplicateTenant(tenant.schema_name));
        }
        inner.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>, TenantError> {
        Ok(self.inner.read().tenants.get(&id).cloned())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenantError> {
        Ok(self
            .inner
            .read()
            .tenants
            .values()
            .find(|t| t.slug == slug)
            .cloned())
    }

    async fn list(&self, status: Option<TenantStatus>) -> Result<Vec<Tenant>, TenantError> {
        let inner = self.inner.read();
        let mut tenants: Vec<Tenant> = inner
            .tenants
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tenants.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tenants)
    }

    async fn update(&self, tenant: &Tenant) -> Result<(), TenantError> {
        let mut inner = self.inner.write();
        if !inner.tenants.contains_key(&tenant.id) {
            return Err(TenantError::NotFound(tenant.id.to_string()));
        }
        inner.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: TenantStatus) -> Result<(), TenantError> {
        let mut inner = self.inner.write();
        match inner.tenants.get_mut(&id) {
            Some(tenant) => {
                tenant.status = status;
                Ok(())
            }
            None => Err(TenantError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), TenantError> {
        let mut inner = self.inner.write();
        if inner.tenants.remove(&id).is_none() {
            return Err(TenantError::NotFound(id.to_string()));
        }
        inner.members.retain(|(tenant_id, _), _| *tenant_id != id);
        inner.analytics.retain(|(tenant_id, _), _| *tenant_id != id);
        Ok(())
    }

    async fn add_member(&self, membership: TenantMembership) -> Result<(), TenantError> {
        let mut inner = self.inner.write();
        if !inner.tenants.contains_key(&membership.tenant_id) {
            return Err(TenantError::NotFound(membership.tenant_id.to_string()));
        }
        inner
            .members
            .insert((membership.tenant_id, membership.user_id), membership);
        Ok(())
    }

    async fn remove_member(&self, tenant_id: Uuid, user_id: Uuid) -> Result<(), TenantError> {
        self.inner.write().members.remove(&(tenant_id, user_id));
        Ok(())
    }

    async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<TenantMembership>, TenantError> {
        let inner = self.inner.read();
        let mut members: Vec<TenantMembership> = inner
            .members
            .values()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(members)
    }

    async fn upsert_daily(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
        metrics: HashMap<String, Value>,
    ) -> Result<(), TenantError> {
        let mut inner = self.inner.write();
        if !inner.tenants.contains_key(&tenant_id) {
            return Err(TenantError::NotFound(tenant_id.to_string()));
        }
        inner.analytics.insert(
            (tenant_id, date),
            DailyAnalytics {
                tenant_id,
                date,
                metrics,
            },
        );
        Ok(())
    }

    async fn get_daily(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyAnalytics>, TenantError> {
        Ok(self.inner.read().analytics.get(&(tenant_id, date)).cloned())
    }
}

/// Idempotent DDL for the master catalog tables.
const MASTER_DDL: &str = "\
CREATE TABLE IF NOT EXISTS tenants (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    schema_name TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    tier TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    settings JSONB NOT NULL DEFAULT '{}',
    resource_limits JSONB NOT NULL DEFAULT '{}',
    contact_email TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS tenant_users (
    tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    user_id UUID NOT NULL,
    role TEXT NOT NULL,
    permissions TEXT[] NOT NULL DEFAULT '{}',
    joined_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (tenant_id, user_id)
);
CREATE TABLE IF NOT EXISTS tenant_analytics_daily (
    tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    date DATE NOT NULL,
    metrics JSONB NOT NULL DEFAULT '{}',
    PRIMARY KEY (tenant_id, date)
);
CREATE TABLE IF NOT EXISTS catalog_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const TENANT_COLUMNS: &str = "id, name, slug, schema_name, status, tier, created_at, \
                              settings, resource_limits, contact_email";

/// PostgreSQL catalog over the shared master namespace.
pub struct PgCatalog {
    pool: deadpool_postgres::Pool,
}

impl PgCatalog {
    /// Create a catalog over a pool connected to the master database.
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }

    /// Apply the master DDL and record the once-applied marker. Safe to call
    /// on every startup.
    pub async fn init(&self) -> Result<(), TenantError> {
        let client = self.pool.get().await?;
        client.batch_execute(MASTER_DDL).await?;
        client
            .execute(
                "INSERT INTO catalog_meta (key, value) VALUES ('catalog_schema_applied', $1) \
                 ON CONFLICT (key) DO NOTHING",
                &[&Utc::now().to_rfc3339()],
            )
            .await?;
        Ok(())
    }

    fn row_to_tenant(row: &tokio_postgres::Row) -> Result<Tenant, TenantError> {
        let status_raw: String = row.get("status");
        let status = TenantStatus::parse(&status_raw)
            .ok_or_else(|| TenantError::database(format!("unknown tenant status: {status_raw}")))?;
        let tier_raw: String = row.get("tier");
        let tier = TenantTier::parse(&tier_raw)
            .ok_or_else(|| TenantError::database(format!("unknown tenant tier: {tier_raw}")))?;
        let settings: Value = row.get("settings");
        let settings = serde_json::from_value(settings)
            .map_err(|e| TenantError::database(format!("malformed tenant settings: {e}")))?;
        let limits: Value = row.get("resource_limits");
        let resource_limits = serde_json::from_value(limits)
            .map_err(|e| TenantError::database(format!("malformed resource limits: {e}")))?;
        Ok(Tenant {
            id: row.get("id"),
            name: row.get("name"),
            slug: row.get("slug"),
            schema_name: row.get("schema_name"),
            status,
            tier,
            created_at: row.get("created_at"),
            settings,
            resource_limits,
            contact_email: row.get("contact_email"),
        })
    }

    fn row_to_membership(row: &tokio_postgres::Row) -> Result<TenantMembership, TenantError> {
        let role_raw: String = row.get("role");
        let role = MembershipRole::parse(&role_raw)
            .ok_or_else(|| TenantError::database(format!("unknown membership role: {role_raw}")))?;
        Ok(TenantMembership {
            tenant_id: row.get("tenant_id"),
            user_id: row.get("user_id"),
            role,
            permissions: row.get("permissions"),
            joined_at: row.get("joined_at"),
        })
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn create(&self, new: NewTenant) -> Result<Tenant, TenantError> {
        let tenant = new.into_tenant()?;
        let settings = serde_json::to_value(&tenant.settings)
            .map_err(|e| TenantError::database(e.to_string()))?;
        let limits = serde_json::to_value(tenant.resource_limits)
            .map_err(|e| TenantError::database(e.to_string()))?;
        let client = self.pool.get().await?;
        // The unique constraints on slug and schema_name arbitrate
        // concurrent duplicates; 23505 maps to DuplicateTenant.
        client
            .execute(
                "INSERT INTO tenants (id, name, slug, schema_name, status, tier, created_at, \
                 settings, resource_limits, contact_email) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &tenant.id,
                    &tenant.name,
                    &tenant.slug,
                    &tenant.schema_name,
                    &tenant.status.as_str(),
                    &tenant.tier.as_str(),
                    &tenant.created_at,
                    &settings,
                    &limits,
                    &tenant.contact_email,
                ],
            )
            .await?;
        Ok(tenant)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>, TenantError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1");
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        row.as_ref().map(Self::row_to_tenant).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenantError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE slug = $1");
        let row = client.query_opt(sql.as_str(), &[&slug]).await?;
        row.as_ref().map(Self::row_to_tenant).transpose()
    }

    async fn list(&self, status: Option<TenantStatus>) -> Result<Vec<Tenant>, TenantError> {
        let client = self.pool.get().await?;
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {TENANT_COLUMNS} FROM tenants WHERE status = $1 ORDER BY created_at"
                );
                client.query(sql.as_str(), &[&status.as_str()]).await?
            }
            None => {
                let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY created_at");
                client.query(sql.as_str(), &[]).await?
            }
        };
        rows.iter().map(Self::row_to_tenant).collect()
    }

    async fn update(&self, tenant: &Tenant) -> Result<(), TenantError> {
        let settings = serde_json::to_value(&tenant.settings)
            .map_err(|e| TenantError::database(e.to_string()))?;
        let limits = serde_json::to_value(tenant.resource_limits)
            .map_err(|e| TenantError::database(e.to_string()))?;
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE tenants SET name = $2, status = $3, tier = $4, settings = $5, \
                 resource_limits = $6, contact_email = $7 WHERE id = $1",
                &[
                    &tenant.id,
                    &tenant.name,
                    &tenant.status.as_str(),
                    &tenant.tier.as_str(),
                    &settings,
                    &limits,
                    &tenant.contact_email,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(TenantError::NotFound(tenant.id.to_string()));
        }
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: TenantStatus) -> Result<(), TenantError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE tenants SET status = $2 WHERE id = $1",
                &[&id, &status.as_str()],
            )
            .await?;
        if updated == 0 {
            return Err(TenantError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), TenantError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM tenants WHERE id = $1", &[&id])
            .await?;
        if deleted == 0 {
            return Err(TenantError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn add_member(&self, membership: TenantMembership) -> Result<(), TenantError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO tenant_users (tenant_id, user_id, role, permissions, joined_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (tenant_id, user_id) \
                 DO UPDATE SET role = EXCLUDED.role, permissions = EXCLUDED.permissions",
                &[
                    &membership.tenant_id,
                    &membership.user_id,
                    &membership.role.as_str(),
                    &membership.permissions,
                    &membership.joined_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn remove_member(&self, tenant_id: Uuid, user_id: Uuid) -> Result<(), TenantError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM tenant_users WHERE tenant_id = $1 AND user_id = $2",
                &[&tenant_id, &user_id],
            )
            .await?;
        Ok(())
    }

    async fn list_members(&self, tenant_id: Uuid) -> Result<Vec<TenantMembership>, TenantError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT tenant_id, user_id, role, permissions, joined_at \
                 FROM tenant_users WHERE tenant_id = $1 ORDER BY joined_at",
                &[&tenant_id],
            )
            .await?;
        rows.iter().map(Self::row_to_membership).collect()
    }

    async fn upsert_daily(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
        metrics: HashMap<String, Value>,
    ) -> Result<(), TenantError> {
        let metrics =
            serde_json::to_value(&metrics).map_err(|e| TenantError::database(e.to_string()))?;
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO tenant_analytics_daily (tenant_id, date, metrics) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (tenant_id, date) DO UPDATE SET metrics = EXCLUDED.metrics",
                &[&tenant_id, &date, &metrics],
            )
            .await?;
        Ok(())
    }

    async fn get_daily(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyAnalytics>, TenantError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT metrics FROM tenant_analytics_daily WHERE tenant_id = $1 AND date = $2",
                &[&tenant_id, &date],
            )
            .await?;
        match row {
            Some(row) => {
                let metrics: Value = row.get("metrics");
                let metrics = serde_json::from_value(metrics)
                    .map_err(|e| TenantError::database(format!("malformed metrics: {e}")))?;
                Ok(Some(DailyAnalytics {
                    tenant_id,
                    date,
                    metrics,
                }))
            }
            None => Ok(None),
        }
    }
}
