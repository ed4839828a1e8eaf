//! Tenant identity resolution.
//!
//! Derives tenant identity from ambiguous request signals with a fixed
//! precedence, then enforces lifecycle status before anything touches the
//! tenant's schema. Strategies never merge: the first signal that yields a
//! candidate decides the outcome, including its failures.

use std::sync::Arc;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::error::TenantError;
use crate::tenant::{Tenant, TenantStatus};

/// Reserved identity meaning "verified administrator, bypass isolation".
///
/// Only the authenticated-identity layer may mint it, via
/// [`RequestSignals::with_admin_access`]. A request signal carrying this
/// value verbatim is rejected instead of resolved.
pub const GLOBAL_ADMIN_SLUG: &str = "__global_admin__";

/// Signals extracted from an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    host: Option<String>,
    tenant_hint: Option<String>,
    path: Option<String>,
    admin: bool,
}

impl RequestSignals {
    /// Create empty signals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Host value (port allowed).
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the explicit tenant identifier (id or slug).
    pub fn with_tenant_hint(mut self, hint: impl Into<String>) -> Self {
        self.tenant_hint = Some(hint.into());
        self
    }

    /// Set the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Grant the global-admin bypass.
    ///
    /// Only the authenticated-identity layer may call this, after verifying
    /// the principal; the flag is never derived from request data.
    pub fn with_admin_access(mut self) -> Self {
        self.admin = true;
        self
    }
}

/// Canonical identity attached to responses after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTenant {
    pub id: Uuid,
    pub slug: String,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIdentity {
    /// A single tenant; all work is scoped to its schema.
    Tenant(ResolvedTenant),
    /// Cross-tenant administrative access.
    GlobalAdmin,
}

impl ResolvedIdentity {
    /// The tenant, unless this is the admin bypass.
    pub fn tenant(&self) -> Option<&ResolvedTenant> {
        match self {
            Self::Tenant(tenant) => Some(tenant),
            Self::GlobalAdmin => None,
        }
    }
}

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Base domain for subdomain resolution; empty disables the strategy.
    pub base_domain: String,
    /// Subdomains that never name a tenant.
    pub reserved_subdomains: Vec<String>,
    /// Path prefix for the path-based convention.
    pub path_prefix: String,
}

impl ResolverConfig {
    /// Configuration for a base domain with the default reserved set.
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into(),
            reserved_subdomains: ["www", "api", "app", "admin"]
                .map(String::from)
                .to_vec(),
            path_prefix: "/tenant/".to_string(),
        }
    }

    /// Reserve an additional subdomain.
    pub fn with_reserved_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.reserved_subdomains.push(subdomain.into());
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Resolves tenant identity from request signals.
pub struct TenantResolver {
    catalog: Arc<dyn CatalogStore>,
    config: ResolverConfig,
}

impl TenantResolver {
    /// Create a resolver over the shared catalog.
    pub fn new(catalog: Arc<dyn CatalogStore>, config: ResolverConfig) -> Self {
        Self { catalog, config }
    }

    /// Resolve identity for a tenant-required route.
    ///
    /// Fails with [`TenantError::Unresolved`] when no signal yields a
    /// tenant, and with [`TenantError::Suspended`] or
    /// [`TenantError::Archived`] when the resolved tenant is disabled.
    pub async fn resolve(
        &self,
        signals: &RequestSignals,
    ) -> Result<ResolvedIdentity, TenantError> {
        match self.resolve_optional(signals).await? {
            Some(identity) => Ok(identity),
            None => Err(TenantError::Unresolved),
        }
    }

    /// Resolve identity for a tenant-optional route; `None` means the
    /// request proceeds without tenant context.
    pub async fn resolve_optional(
        &self,
        signals: &RequestSignals,
    ) -> Result<Option<ResolvedIdentity>, TenantError> {
        if signals.admin {
            debug!("resolved global admin identity");
            return Ok(Some(ResolvedIdentity::GlobalAdmin));
        }

        if let Some(slug) = self.subdomain_slug(signals) {
            let tenant = self.require_by_slug(&slug).await?;
            return Ok(Some(self.admit(tenant)?));
        }

        if let Some(hint) = signals.tenant_hint.as_deref() {
            if hint == GLOBAL_ADMIN_SLUG {
                // The sentinel is assigned by the identity layer, never
                // accepted from an untrusted signal.
                return Err(TenantError::InvalidIdentifier(hint.to_string()));
            }
            let tenant = match Uuid::parse_str(hint) {
                Ok(id) => self.require_by_id(id).await?,
                Err(_) => self.require_by_slug(hint).await?,
            };
            return Ok(Some(self.admit(tenant)?));
        }

        if let Some(slug) = self.path_slug(signals) {
            let tenant = self.require_by_slug(&slug).await?;
            return Ok(Some(self.admit(tenant)?));
        }

        Ok(None)
    }

    /// Status gate, applied after lookup and before any tenant-schema work.
    fn admit(&self, tenant: Tenant) -> Result<ResolvedIdentity, TenantError> {
        tenant.ensure_routable()?;
        if tenant.status == TenantStatus::Migrating {
            debug!(tenant = %tenant.slug, "routing to tenant inside a migration window");
        }
        Ok(ResolvedIdentity::Tenant(ResolvedTenant {
            id: tenant.id,
            slug: tenant.slug,
        }))
    }

    fn subdomain_slug(&self, signals: &RequestSignals) -> Option<String> {
        if self.config.base_domain.is_empty() {
            return None;
        }
        let host = signals.host.as_deref()?;
        // Remove port if present
        let host = host.split(':').next().unwrap_or(host);
        let subdomain = host.strip_suffix(&format!(".{}", self.config.base_domain))?;
        if subdomain.is_empty() || subdomain.contains('.') {
            return None;
        }
        if self
            .config
            .reserved_subdomains
            .iter()
            .any(|reserved| reserved == subdomain)
        {
            return None;
        }
        Some(subdomain.to_string())
    }

    fn path_slug(&self, signals: &RequestSignals) -> Option<String> {
        let path = signals.path.as_deref()?;
        let rest = path.strip_prefix(&self.config.path_prefix)?;
        let slug = rest.split('/').next()?;
        if slug.is_empty() {
            return None;
        }
        Some(slug.to_string())
    }

    async fn require_by_id(&self, id: Uuid) -> Result<Tenant, TenantError> {
        self.catalog
            .get_by_id(id)
            .await?
            .ok_or_else(|| TenantError::NotFound(id.to_string()))
    }

    async fn require_by_slug(&self, slug: &str) -> Result<Tenant, TenantError> {
        self.catalog
            .get_by_slug(slug)
            .await?
            .ok_or_else(|| TenantError::NotFound(slug.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, NewTenant};
    use crate::tenant::TenantTier;

    async fn setup() -> (TenantResolver, Arc<MemoryCatalog>, Tenant, Tenant) {
        let catalog = Arc::new(MemoryCatalog::new());
        let acme = catalog
            .create(NewTenant::new("Acme Inc", "acme", TenantTier::Starter))
            .await
            .unwrap();
        let beta = catalog
            .create(NewTenant::new("Beta LLC", "beta", TenantTier::Free))
            .await
            .unwrap();
        let resolver = TenantResolver::new(
            Arc::clone(&catalog) as Arc<dyn CatalogStore>,
            ResolverConfig::new("example.com"),
        );
        (resolver, catalog, acme, beta)
    }

    fn expect_tenant(identity: ResolvedIdentity) -> ResolvedTenant {
        match identity {
            ResolvedIdentity::Tenant(tenant) => tenant,
            ResolvedIdentity::GlobalAdmin => panic!("expected tenant identity"),
        }
    }

    #[tokio::test]
    async fn test_subdomain_resolves() {
        let (resolver, _, acme, _) = setup().await;
        let signals = RequestSignals::new().with_host("acme.example.com");
        let resolved = expect_tenant(resolver.resolve(&signals).await.unwrap());
        assert_eq!(resolved.id, acme.id);
        assert_eq!(resolved.slug, "acme");
    }

    #[tokio::test]
    async fn test_subdomain_ignores_port() {
        let (resolver, _, acme, _) = setup().await;
        let signals = RequestSignals::new().with_host("acme.example.com:8443");
        let resolved = expect_tenant(resolver.resolve(&signals).await.unwrap());
        assert_eq!(resolved.id, acme.id);
    }

    #[tokio::test]
    async fn test_subdomain_wins_over_hint() {
        let (resolver, _, acme, _) = setup().await;
        let signals = RequestSignals::new()
            .with_host("acme.example.com")
            .with_tenant_hint("beta");
        let resolved = expect_tenant(resolver.resolve(&signals).await.unwrap());
        assert_eq!(resolved.id, acme.id);
    }

    #[tokio::test]
    async fn test_reserved_subdomain_falls_through_to_hint() {
        let (resolver, _, _, beta) = setup().await;
        let signals = RequestSignals::new()
            .with_host("www.example.com")
            .with_tenant_hint("beta");
        let resolved = expect_tenant(resolver.resolve(&signals).await.unwrap());
        assert_eq!(resolved.id, beta.id);
    }

    #[tokio::test]
    async fn test_hint_accepts_canonical_id() {
        let (resolver, _, _, beta) = setup().await;
        let signals = RequestSignals::new().with_tenant_hint(beta.id.to_string());
        let resolved = expect_tenant(resolver.resolve(&signals).await.unwrap());
        assert_eq!(resolved.id, beta.id);
    }

    #[tokio::test]
    async fn test_path_prefix_resolves() {
        let (resolver, _, acme, _) = setup().await;
        let signals = RequestSignals::new().with_path("/tenant/acme/documents");
        let resolved = expect_tenant(resolver.resolve(&signals).await.unwrap());
        assert_eq!(resolved.id, acme.id);
    }

    #[tokio::test]
    async fn test_no_signal_is_unresolved() {
        let (resolver, _, _, _) = setup().await;
        let err = resolver.resolve(&RequestSignals::new()).await.unwrap_err();
        assert!(matches!(err, TenantError::Unresolved));

        let optional = resolver
            .resolve_optional(&RequestSignals::new())
            .await
            .unwrap();
        assert!(optional.is_none());
    }

    #[tokio::test]
    async fn test_unknown_subdomain_is_not_found_not_fallthrough() {
        let (resolver, _, _, _) = setup().await;
        // The subdomain matched as a signal, so its lookup failure decides
        // the outcome even though a valid hint is present.
        let signals = RequestSignals::new()
            .with_host("ghost.example.com")
            .with_tenant_hint("beta");
        let err = resolver.resolve(&signals).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_suspended_is_distinct_from_not_found() {
        let (resolver, catalog, acme, _) = setup().await;
        catalog
            .update_status(acme.id, TenantStatus::Suspended)
            .await
            .unwrap();

        let signals = RequestSignals::new().with_host("acme.example.com");
        let err = resolver.resolve(&signals).await.unwrap_err();
        assert!(matches!(err, TenantError::Suspended(slug) if slug == "acme"));
    }

    #[tokio::test]
    async fn test_archived_is_distinct_kind() {
        let (resolver, catalog, _, beta) = setup().await;
        catalog
            .update_status(beta.id, TenantStatus::Archived)
            .await
            .unwrap();

        let signals = RequestSignals::new().with_tenant_hint("beta");
        let err = resolver.resolve(&signals).await.unwrap_err();
        assert!(matches!(err, TenantError::Archived(_)));
    }

    #[tokio::test]
    async fn test_migrating_tenant_still_resolves() {
        let (resolver, catalog, acme, _) = setup().await;
        catalog
            .update_status(acme.id, TenantStatus::Migrating)
            .await
            .unwrap();

        let signals = RequestSignals::new().with_tenant_hint("acme");
        assert!(resolver.resolve(&signals).await.is_ok());
    }

    #[tokio::test]
    async fn test_sentinel_in_hint_is_rejected() {
        let (resolver, _, _, _) = setup().await;
        let signals = RequestSignals::new().with_tenant_hint(GLOBAL_ADMIN_SLUG);
        let err = resolver.resolve(&signals).await.unwrap_err();
        assert!(matches!(err, TenantError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn test_admin_access_flag_resolves_global_admin() {
        let (resolver, _, _, _) = setup().await;
        let signals = RequestSignals::new()
            .with_host("acme.example.com")
            .with_admin_access();
        let identity = resolver.resolve(&signals).await.unwrap();
        assert_eq!(identity, ResolvedIdentity::GlobalAdmin);
        assert!(identity.tenant().is_none());
    }

    #[tokio::test]
    async fn test_suspension_applies_on_next_resolution() {
        let (resolver, catalog, acme, _) = setup().await;
        let signals = RequestSignals::new().with_host("acme.example.com");
        assert!(resolver.resolve(&signals).await.is_ok());

        catalog
            .update_status(acme.id, TenantStatus::Suspended)
            .await
            .unwrap();
        let err = resolver.resolve(&signals).await.unwrap_err();
        assert!(matches!(err, TenantError::Suspended(_)));
    }
}
