//! Tenant catalog models.
//!
//! These types mirror the rows of the shared master catalog. Per-tenant
//! application data never appears here; it lives in the tenant's own schema.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::TenantError;
use crate::limits::ResourceLimits;

/// Tenant lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Tenant is operational.
    Active,
    /// Tenant is temporarily disabled.
    Suspended,
    /// Tenant is inside a schema-upgrade window.
    Migrating,
    /// Tenant is permanently inactive.
    Archived,
}

impl TenantStatus {
    /// Stable lowercase form used in the catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Migrating => "migrating",
            Self::Archived => "archived",
        }
    }

    /// Parse the catalog form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "migrating" => Some(Self::Migrating),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Whether the state machine allows moving to `to`.
    ///
    /// Archived is a sink: the only way out of it is full deletion, which is
    /// not a status.
    pub fn can_transition(self, to: TenantStatus) -> bool {
        use TenantStatus::*;
        matches!(
            (self, to),
            (Active, Suspended)
                | (Suspended, Active)
                | (Active, Migrating)
                | (Migrating, Active)
                | (Active, Archived)
                | (Suspended, Archived)
                | (Migrating, Archived)
        )
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TenantTier {
    /// Free tier with minimal quotas.
    #[default]
    Free,
    /// Starter plan for small teams.
    Starter,
    /// Professional plan for growing organizations.
    Professional,
    /// Enterprise plan with no quotas.
    Enterprise,
}

impl TenantTier {
    /// Stable lowercase form used in the catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parse the catalog form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "starter" => Some(Self::Starter),
            "professional" => Some(Self::Professional),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

impl std::fmt::Display for TenantTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the shared tenant catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// URL-safe unique slug.
    pub slug: String,
    /// Derived unique schema identifier (`tenant_*`).
    pub schema_name: String,
    /// Lifecycle status.
    pub status: TenantStatus,
    /// Plan tier.
    pub tier: TenantTier,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Per-tenant settings.
    pub settings: HashMap<String, serde_json::Value>,
    /// Resource ceilings, defaulted from the tier at creation.
    pub resource_limits: ResourceLimits,
    /// Primary contact address.
    pub contact_email: String,
}

impl Tenant {
    /// Reject routing to a disabled tenant.
    ///
    /// Called before any tenant-schema query, both at the resolver boundary
    /// and inside session acquisition.
    pub fn ensure_routable(&self) -> Result<(), TenantError> {
        match self.status {
            TenantStatus::Suspended => Err(TenantError::Suspended(self.slug.clone())),
            TenantStatus::Archived => Err(TenantError::Archived(self.slug.clone())),
            TenantStatus::Active | TenantStatus::Migrating => Ok(()),
        }
    }
}

/// Role of a user inside a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl MembershipRole {
    /// Stable lowercase form used in the catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }

    /// Parse the catalog form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }
}

/// Membership of a user in a tenant; the (tenant, user) pair is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: MembershipRole,
    pub permissions: Vec<String>,
    pub joined_at: DateTime<Utc>,
}

impl TenantMembership {
    /// Create a membership with no extra permissions.
    pub fn new(tenant_id: Uuid, user_id: Uuid, role: MembershipRole) -> Self {
        Self {
            tenant_id,
            user_id,
            role,
            permissions: Vec::new(),
            joined_at: Utc::now(),
        }
    }

    /// Add a permission.
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }
}

/// Daily analytics rollup; at most one row per tenant per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAnalytics {
    pub tenant_id: Uuid,
    pub date: NaiveDate,
    pub metrics: HashMap<String, serde_json::Value>,
}
