//! Schema naming and physical provisioning.
//!
//! Every tenant owns one PostgreSQL schema holding an identical set of
//! application tables. The schema name is derived from the tenant slug and
//! validated against a strict identifier invariant before it is ever
//! interpolated into DDL.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::error::TenantError;

/// PostgreSQL identifier limit.
pub const MAX_SCHEMA_NAME_LEN: usize = 63;

/// Prefix shared by every tenant schema.
pub const SCHEMA_PREFIX: &str = "tenant_";

static SCHEMA_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^tenant_[a-z0-9_]+$").expect("schema name pattern"));

/// Derive the schema identifier for a slug.
///
/// Lowercases the slug, maps hyphens and spaces to underscores, and prefixes
/// `tenant_`. Deterministic and free of I/O. Fails with
/// [`TenantError::InvalidIdentifier`] when the result would violate the
/// identifier invariant.
///
/// # Examples
///
/// ```
/// use stratum::schema::derive_schema_name;
///
/// assert_eq!(derive_schema_name("acme").unwrap(), "tenant_acme");
/// assert_eq!(derive_schema_name("Acme-Corp").unwrap(), "tenant_acme_corp");
/// assert!(derive_schema_name("acme!").is_err());
/// ```
pub fn derive_schema_name(slug: &str) -> Result<String, TenantError> {
    let normalized = slug.trim().to_lowercase().replace(['-', ' '], "_");
    let candidate = format!("{SCHEMA_PREFIX}{normalized}");
    if candidate.len() > MAX_SCHEMA_NAME_LEN || !SCHEMA_NAME_RE.is_match(&candidate) {
        return Err(TenantError::InvalidIdentifier(slug.to_string()));
    }
    Ok(candidate)
}

/// Check a stored schema name against the identifier invariant.
pub fn validate_schema_name(schema_name: &str) -> Result<(), TenantError> {
    if schema_name.len() > MAX_SCHEMA_NAME_LEN || !SCHEMA_NAME_RE.is_match(schema_name) {
        return Err(TenantError::InvalidIdentifier(schema_name.to_string()));
    }
    Ok(())
}

/// Application tables replicated into every tenant schema.
///
/// Each statement is idempotent so a retried provision converges instead of
/// failing on the second pass.
pub fn tenant_table_ddl(schema_name: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS \"{schema_name}\".documents (\
             id UUID PRIMARY KEY, \
             title TEXT NOT NULL, \
             content TEXT, \
             metadata JSONB NOT NULL DEFAULT '{{}}', \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
             updated_at TIMESTAMPTZ)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_documents_created_at \
             ON \"{schema_name}\".documents (created_at)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{schema_name}\".sandboxes (\
             id UUID PRIMARY KEY, \
             name TEXT NOT NULL UNIQUE, \
             state TEXT NOT NULL DEFAULT 'stopped', \
             config JSONB NOT NULL DEFAULT '{{}}', \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now())"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS \"{schema_name}\".usage_records (\
             id BIGSERIAL PRIMARY KEY, \
             recorded_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
             kind TEXT NOT NULL, \
             quantity BIGINT NOT NULL, \
             metadata JSONB NOT NULL DEFAULT '{{}}')"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_usage_records_recorded_at \
             ON \"{schema_name}\".usage_records (recorded_at)"
        ),
    ]
}

/// Backend executing DDL and catalog queries against the database cluster.
///
/// Implement this with your PostgreSQL client; [`PgSchemaBackend`] is the
/// pooled implementation.
#[async_trait]
pub trait SchemaBackend: Send + Sync {
    /// Execute one or more SQL statements.
    async fn execute(&self, sql: &str) -> Result<(), TenantError>;

    /// Check if a schema exists.
    async fn schema_exists(&self, schema_name: &str) -> Result<bool, TenantError>;

    /// List schemas whose name starts with `prefix`.
    async fn list_schemas(&self, prefix: &str) -> Result<Vec<String>, TenantError>;

    /// Number of tables currently inside a schema.
    async fn table_count(&self, schema_name: &str) -> Result<i64, TenantError>;
}

/// Creates and destroys physical tenant schemas.
///
/// Provisioning is a two-phase operation against a store the catalog
/// transaction cannot cover, so a failure part-way through triggers a
/// compensating teardown of whatever was created before the error
/// propagates.
pub struct SchemaProvisioner<B: SchemaBackend> {
    backend: B,
}

impl<B: SchemaBackend> SchemaProvisioner<B> {
    /// Create a provisioner over a backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Access the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Create the schema and its application tables idempotently.
    pub async fn provision(&self, schema_name: &str) -> Result<(), TenantError> {
        validate_schema_name(schema_name)?;

        let mut statements = vec![format!("CREATE SCHEMA IF NOT EXISTS \"{schema_name}\"")];
        statements.extend(tenant_table_ddl(schema_name));

        for statement in &statements {
            if let Err(err) = self.backend.execute(statement).await {
                warn!(
                    schema = %schema_name,
                    error = %err,
                    "provisioning failed, attempting compensating teardown"
                );
                if let Err(teardown_err) = self.teardown(schema_name).await {
                    warn!(
                        schema = %schema_name,
                        error = %teardown_err,
                        "compensating teardown failed, leaving orphan for reconciliation"
                    );
                }
                return Err(TenantError::provision(schema_name, err.to_string()));
            }
        }

        info!(schema = %schema_name, "tenant schema provisioned");
        Ok(())
    }

    /// Drop the schema and everything in it. Dropping an absent schema is a
    /// no-op, not an error.
    pub async fn deprovision(&self, schema_name: &str) -> Result<(), TenantError> {
        validate_schema_name(schema_name)?;
        self.teardown(schema_name).await?;
        info!(schema = %schema_name, "tenant schema dropped");
        Ok(())
    }

    async fn teardown(&self, schema_name: &str) -> Result<(), TenantError> {
        self.backend
            .execute(&format!("DROP SCHEMA IF EXISTS \"{schema_name}\" CASCADE"))
            .await
    }
}

/// Pooled PostgreSQL implementation of [`SchemaBackend`].
pub struct PgSchemaBackend {
    pool: deadpool_postgres::Pool,
}

impl PgSchemaBackend {
    /// Create a backend over an administrative pool on the cluster.
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaBackend for PgSchemaBackend {
    async fn execute(&self, sql: &str) -> Result<(), TenantError> {
        let client = self.pool.get().await?;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn schema_exists(&self, schema_name: &str) -> Result<bool, TenantError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM information_schema.schemata WHERE schema_name = $1",
                &[&schema_name],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn list_schemas(&self, prefix: &str) -> Result<Vec<String>, TenantError> {
        let client = self.pool.get().await?;
        let pattern = format!("{prefix}%");
        let rows = client
            .query(
                "SELECT schema_name::text FROM information_schema.schemata \
                 WHERE schema_name LIKE $1 ORDER BY schema_name",
                &[&pattern],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn table_count(&self, schema_name: &str) -> Result<i64, TenantError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT count(*) FROM information_schema.tables WHERE table_schema = $1",
                &[&schema_name],
            )
            .await?;
        Ok(row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[test]
    fn test_derive_schema_name() {
        assert_eq!(derive_schema_name("acme").unwrap(), "tenant_acme");
        assert_eq!(derive_schema_name("Acme-Corp").unwrap(), "tenant_acme_corp");
        assert_eq!(derive_schema_name("  zeta 9 ").unwrap(), "tenant_zeta_9");
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = derive_schema_name("Globex-Intl").unwrap();
        let b = derive_schema_name("Globex-Intl").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_rejects_invalid() {
        assert!(derive_schema_name("").is_err());
        assert!(derive_schema_name("   ").is_err());
        assert!(derive_schema_name("acme!").is_err());
        assert!(derive_schema_name("café").is_err());
        assert!(derive_schema_name(&"a".repeat(80)).is_err());
    }

    #[test]
    fn test_derive_respects_length_limit() {
        // 56 chars of slug plus the 7-char prefix lands exactly on 63.
        let slug = "a".repeat(MAX_SCHEMA_NAME_LEN - SCHEMA_PREFIX.len());
        assert!(derive_schema_name(&slug).is_ok());
        let slug = "a".repeat(MAX_SCHEMA_NAME_LEN - SCHEMA_PREFIX.len() + 1);
        assert!(matches!(
            derive_schema_name(&slug),
            Err(TenantError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_validate_schema_name() {
        assert!(validate_schema_name("tenant_acme").is_ok());
        assert!(validate_schema_name("public").is_err());
        assert!(validate_schema_name("tenant_").is_err());
        assert!(validate_schema_name("tenant_Acme").is_err());
    }

    /// Backend that records statements and fails on the nth execute call.
    struct RecordingBackend {
        executed: Mutex<Vec<String>>,
        fail_on_call: Option<usize>,
        schemas: Mutex<HashSet<String>>,
    }

    impl RecordingBackend {
        fn new(fail_on_call: Option<usize>) -> Self {
            Self {
                executed: Mutex::new(Vec::new()),
                fail_on_call,
                schemas: Mutex::new(HashSet::new()),
            }
        }
    }

    #[async_trait]
    impl SchemaBackend for RecordingBackend {
        async fn execute(&self, sql: &str) -> Result<(), TenantError> {
            let call_index = {
                let mut executed = self.executed.lock();
                executed.push(sql.to_string());
                executed.len()
            };
            if self.fail_on_call == Some(call_index) {
                return Err(TenantError::database("simulated ddl failure"));
            }
            Ok(())
        }

        async fn schema_exists(&self, schema_name: &str) -> Result<bool, TenantError> {
            Ok(self.schemas.lock().contains(schema_name))
        }

        async fn list_schemas(&self, prefix: &str) -> Result<Vec<String>, TenantError> {
            let mut names: Vec<String> = self
                .schemas
                .lock()
                .iter()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect();
            names.sort();
            Ok(names)
        }

        async fn table_count(&self, _schema_name: &str) -> Result<i64, TenantError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_provision_executes_schema_then_tables() {
        let provisioner = SchemaProvisioner::new(RecordingBackend::new(None));
        provisioner.provision("tenant_acme").await.unwrap();

        let executed = provisioner.backend().executed.lock();
        assert!(executed[0].starts_with("CREATE SCHEMA IF NOT EXISTS \"tenant_acme\""));
        assert_eq!(executed.len(), 1 + tenant_table_ddl("tenant_acme").len());
        assert!(executed.iter().any(|sql| sql.contains("usage_records")));
    }

    #[tokio::test]
    async fn test_provision_failure_compensates() {
        // Fail on the third statement, after the schema and one table exist.
        let provisioner = SchemaProvisioner::new(RecordingBackend::new(Some(3)));
        let err = provisioner.provision("tenant_acme").await.unwrap_err();
        assert!(matches!(err, TenantError::ProvisionFailed { .. }));

        let executed = provisioner.backend().executed.lock();
        let last = executed.last().unwrap();
        assert!(last.starts_with("DROP SCHEMA IF EXISTS \"tenant_acme\" CASCADE"));
    }

    #[tokio::test]
    async fn test_provision_rejects_invalid_name() {
        let provisioner = SchemaProvisioner::new(RecordingBackend::new(None));
        let err = provisioner.provision("public; DROP TABLE x").await.unwrap_err();
        assert!(matches!(err, TenantError::InvalidIdentifier(_)));
        assert!(provisioner.backend().executed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_deprovision_is_idempotent() {
        let provisioner = SchemaProvisioner::new(RecordingBackend::new(None));
        provisioner.deprovision("tenant_acme").await.unwrap();
        provisioner.deprovision("tenant_acme").await.unwrap();

        let executed = provisioner.backend().executed.lock();
        assert_eq!(executed.len(), 2);
        assert!(executed.iter().all(|sql| sql.contains("IF EXISTS")));
    }
}
