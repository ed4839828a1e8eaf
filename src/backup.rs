//! Schema-scoped logical backup and restore.
//!
//! Backups shell out to the PostgreSQL dump tooling, scoped to one tenant
//! schema and stripped of ownership and privilege metadata. Artifacts land
//! in a local directory and can optionally be uploaded to an object store.
//! A failed dump keeps its partial artifact on disk for inspection.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::error::TenantError;
use crate::schema::SchemaBackend;
use crate::tenant::Tenant;

/// Settings for the external dump tooling.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Connection string passed to the tools via `--dbname`.
    pub dsn: String,
    /// Path to the `pg_dump` binary.
    pub pg_dump_path: PathBuf,
    /// Path to the `psql` binary used for restore.
    pub psql_path: PathBuf,
    /// Wall-clock budget for one tool invocation.
    pub timeout: Duration,
}

impl BackupConfig {
    /// Configuration with tool defaults resolved from `PATH`.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            pg_dump_path: PathBuf::from("pg_dump"),
            psql_path: PathBuf::from("psql"),
            timeout: Duration::from_secs(600),
        }
    }

    /// Set the `pg_dump` binary path.
    pub fn with_pg_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pg_dump_path = path.into();
        self
    }

    /// Set the `psql` binary path.
    pub fn with_psql_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.psql_path = path.into();
        self
    }

    /// Set the wall-clock budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// External tool performing the schema-scoped dump and restore.
#[async_trait]
pub trait DumpTool: Send + Sync {
    /// Dump one schema into `artifact`.
    async fn dump(&self, schema_name: &str, artifact: &Path) -> Result<(), TenantError>;

    /// Replay an artifact against the cluster.
    async fn restore(&self, artifact: &Path) -> Result<(), TenantError>;
}

/// `pg_dump`/`psql` implementation of [`DumpTool`].
pub struct PgDumpTool {
    config: BackupConfig,
}

impl PgDumpTool {
    /// Create a tool from its configuration.
    pub fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    fn dump_args(&self, schema_name: &str, artifact: &Path) -> Vec<String> {
        vec![
            "--dbname".to_string(),
            self.config.dsn.clone(),
            format!("--schema={schema_name}"),
            "--no-owner".to_string(),
            "--no-privileges".to_string(),
            "--format=plain".to_string(),
            "--file".to_string(),
            artifact.display().to_string(),
        ]
    }

    fn restore_args(&self, artifact: &Path) -> Vec<String> {
        vec![
            "--dbname".to_string(),
            self.config.dsn.clone(),
            "--set".to_string(),
            "ON_ERROR_STOP=1".to_string(),
            "--file".to_string(),
            artifact.display().to_string(),
        ]
    }

    async fn run(&self, program: &Path, args: Vec<String>) -> Result<(), TenantError> {
        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.timeout, command.output())
            .await
            .map_err(|_| TenantError::Timeout(self.config.timeout.as_millis() as u64))?
            .map_err(|e| {
                TenantError::backup(format!("failed to run {}: {e}", program.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TenantError::backup(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DumpTool for PgDumpTool {
    async fn dump(&self, schema_name: &str, artifact: &Path) -> Result<(), TenantError> {
        let args = self.dump_args(schema_name, artifact);
        self.run(&self.config.pg_dump_path, args).await
    }

    async fn restore(&self, artifact: &Path) -> Result<(), TenantError> {
        let args = self.restore_args(artifact);
        self.run(&self.config.psql_path, args).await
    }
}

/// Remote artifact storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), TenantError>;
}

/// Directory-backed [`ObjectStore`].
pub struct FsObjectStore {
    base_path: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), TenantError> {
        let path = self.base_path.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TenantError::storage(e.to_string()))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| TenantError::storage(e.to_string()))?;
        info!(key = %key, size = data.len(), "artifact uploaded");
        Ok(())
    }
}

/// Description of a completed backup.
#[derive(Debug, Clone, Serialize)]
pub struct BackupArtifact {
    pub tenant_id: Uuid,
    pub slug: String,
    pub schema_name: String,
    /// Local artifact path.
    pub path: PathBuf,
    /// Object-store key, when an upload happened.
    pub remote_key: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Runs tenant backups and restores out-of-band.
pub struct BackupManager<D: DumpTool, B: SchemaBackend> {
    catalog: Arc<dyn CatalogStore>,
    tool: D,
    backend: Arc<B>,
    output_dir: PathBuf,
    store: Option<Arc<dyn ObjectStore>>,
}

impl<D: DumpTool, B: SchemaBackend> BackupManager<D, B> {
    /// Create a manager writing artifacts under `output_dir`.
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        tool: D,
        backend: Arc<B>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            tool,
            backend,
            output_dir: output_dir.into(),
            store: None,
        }
    }

    /// Upload every artifact to an object store as well.
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Dump one tenant's schema.
    ///
    /// A schema with no tables still produces a valid, possibly empty
    /// artifact. On failure the partial artifact stays on disk.
    pub async fn backup(&self, tenant_id: Uuid) -> Result<BackupArtifact, TenantError> {
        let tenant = self.require(tenant_id).await?;
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| TenantError::storage(e.to_string()))?;

        let created_at = Utc::now();
        let file_name = format!("{}-{}.sql", tenant.slug, created_at.format("%Y%m%dT%H%M%SZ"));
        let path = self.output_dir.join(&file_name);
        info!(
            tenant = %tenant.slug,
            schema = %tenant.schema_name,
            path = %path.display(),
            "starting tenant backup"
        );

        if let Err(err) = self.tool.dump(&tenant.schema_name, &path).await {
            warn!(
                tenant = %tenant.slug,
                path = %path.display(),
                error = %err,
                "backup failed, partial artifact retained"
            );
            return Err(err);
        }

        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map_err(|e| TenantError::storage(e.to_string()))?
            .len();

        let remote_key = match &self.store {
            Some(store) => {
                let key = format!("tenants/{}/{}", tenant.slug, file_name);
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|e| TenantError::storage(e.to_string()))?;
                store.put(&key, Bytes::from(data)).await?;
                Some(key)
            }
            None => None,
        };

        info!(tenant = %tenant.slug, size_bytes, "tenant backup complete");
        Ok(BackupArtifact {
            tenant_id: tenant.id,
            slug: tenant.slug,
            schema_name: tenant.schema_name,
            path,
            remote_key,
            size_bytes,
            created_at,
        })
    }

    /// Replay an artifact into the tenant's schema.
    ///
    /// Refuses a non-empty target unless `force` is set; with `force` the
    /// existing schema is dropped first so the artifact replays cleanly.
    pub async fn restore(
        &self,
        tenant_id: Uuid,
        artifact: &Path,
        force: bool,
    ) -> Result<(), TenantError> {
        let tenant = self.require(tenant_id).await?;
        let exists = tokio::fs::try_exists(artifact)
            .await
            .map_err(|e| TenantError::storage(e.to_string()))?;
        if !exists {
            return Err(TenantError::backup(format!(
                "artifact not found: {}",
                artifact.display()
            )));
        }

        let tables = self.backend.table_count(&tenant.schema_name).await?;
        if tables > 0 {
            if !force {
                return Err(TenantError::backup(format!(
                    "schema '{}' holds {tables} tables; pass force to overwrite",
                    tenant.schema_name
                )));
            }
            self.backend
                .execute(&format!(
                    "DROP SCHEMA IF EXISTS \"{}\" CASCADE",
                    tenant.schema_name
                ))
                .await?;
        }

        self.tool.restore(artifact).await?;
        info!(
            tenant = %tenant.slug,
            artifact = %artifact.display(),
            "tenant restore complete"
        );
        Ok(())
    }

    async fn require(&self, tenant_id: Uuid) -> Result<Tenant, TenantError> {
        self.catalog
            .get_by_id(tenant_id)
            .await?
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, NewTenant};
    use crate::tenant::TenantTier;
    use parking_lot::Mutex;

    enum DumpBehavior {
        Write(&'static str),
        WritePartialThenFail,
    }

    struct MockDumpTool {
        behavior: DumpBehavior,
        restored: Mutex<Vec<PathBuf>>,
    }

    impl MockDumpTool {
        fn new(behavior: DumpBehavior) -> Self {
            Self {
                behavior,
                restored: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DumpTool for MockDumpTool {
        async fn dump(&self, _schema_name: &str, artifact: &Path) -> Result<(), TenantError> {
            match &self.behavior {
                DumpBehavior::Write(content) => {
                    tokio::fs::write(artifact, content).await.unwrap();
                    Ok(())
                }
                DumpBehavior::WritePartialThenFail => {
                    tokio::fs::write(artifact, "-- truncated").await.unwrap();
                    Err(TenantError::backup("pg_dump exited with signal 9"))
                }
            }
        }

        async fn restore(&self, artifact: &Path) -> Result<(), TenantError> {
            self.restored.lock().push(artifact.to_path_buf());
            Ok(())
        }
    }

    struct StubBackend {
        tables: i64,
        executed: Mutex<Vec<String>>,
    }

    impl StubBackend {
        fn with_tables(tables: i64) -> Self {
            Self {
                tables,
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SchemaBackend for StubBackend {
        async fn execute(&self, sql: &str) -> Result<(), TenantError> {
            self.executed.lock().push(sql.to_string());
            Ok(())
        }

        async fn schema_exists(&self, _schema_name: &str) -> Result<bool, TenantError> {
            Ok(true)
        }

        async fn list_schemas(&self, _prefix: &str) -> Result<Vec<String>, TenantError> {
            Ok(Vec::new())
        }

        async fn table_count(&self, _schema_name: &str) -> Result<i64, TenantError> {
            Ok(self.tables)
        }
    }

    async fn setup(
        behavior: DumpBehavior,
        tables: i64,
    ) -> (
        BackupManager<MockDumpTool, StubBackend>,
        Uuid,
        tempfile::TempDir,
    ) {
        let catalog = Arc::new(MemoryCatalog::new());
        let tenant = catalog
            .create(NewTenant::new("Acme Inc", "acme", TenantTier::Free))
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(
            catalog as Arc<dyn CatalogStore>,
            MockDumpTool::new(behavior),
            Arc::new(StubBackend::with_tables(tables)),
            dir.path(),
        );
        (manager, tenant.id, dir)
    }

    #[tokio::test]
    async fn test_backup_writes_artifact() {
        let (manager, id, _dir) = setup(DumpBehavior::Write("-- dump\n"), 3).await;
        let artifact = manager.backup(id).await.unwrap();

        assert!(artifact.path.exists());
        assert_eq!(artifact.size_bytes, 8);
        assert!(artifact.remote_key.is_none());
        let name = artifact.path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("acme-"));
        assert!(name.ends_with(".sql"));
    }

    #[tokio::test]
    async fn test_backup_of_empty_schema_succeeds() {
        let (manager, id, _dir) = setup(DumpBehavior::Write(""), 0).await;
        let artifact = manager.backup(id).await.unwrap();
        assert!(artifact.path.exists());
        assert_eq!(artifact.size_bytes, 0);
    }

    #[tokio::test]
    async fn test_failed_backup_retains_partial_artifact() {
        let (manager, id, dir) = setup(DumpBehavior::WritePartialThenFail, 3).await;
        let err = manager.backup(id).await.unwrap_err();
        assert!(matches!(err, TenantError::BackupFailed(_)));

        let retained: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(retained.len(), 1);
        assert_eq!(std::fs::read_to_string(&retained[0]).unwrap(), "-- truncated");
    }

    #[tokio::test]
    async fn test_backup_unknown_tenant() {
        let (manager, _, _dir) = setup(DumpBehavior::Write(""), 0).await;
        let err = manager.backup(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_backup_uploads_when_store_configured() {
        let catalog = Arc::new(MemoryCatalog::new());
        let tenant = catalog
            .create(NewTenant::new("Acme Inc", "acme", TenantTier::Free))
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(
            catalog as Arc<dyn CatalogStore>,
            MockDumpTool::new(DumpBehavior::Write("-- dump\n")),
            Arc::new(StubBackend::with_tables(1)),
            dir.path(),
        )
        .with_object_store(Arc::new(FsObjectStore::new(remote.path())));

        let artifact = manager.backup(tenant.id).await.unwrap();
        let key = artifact.remote_key.unwrap();
        assert!(key.starts_with("tenants/acme/"));
        assert!(remote.path().join(&key).exists());
    }

    #[tokio::test]
    async fn test_restore_refuses_nonempty_target() {
        let (manager, id, dir) = setup(DumpBehavior::Write(""), 3).await;
        let artifact = dir.path().join("acme.sql");
        std::fs::write(&artifact, "-- dump").unwrap();

        let err = manager.restore(id, &artifact, false).await.unwrap_err();
        assert!(matches!(err, TenantError::BackupFailed(_)));
        assert!(manager.tool.restored.lock().is_empty());
    }

    #[tokio::test]
    async fn test_restore_with_force_drops_then_replays() {
        let (manager, id, dir) = setup(DumpBehavior::Write(""), 3).await;
        let artifact = dir.path().join("acme.sql");
        std::fs::write(&artifact, "-- dump").unwrap();

        manager.restore(id, &artifact, true).await.unwrap();

        let executed = manager.backend.executed.lock();
        assert!(executed[0].starts_with("DROP SCHEMA IF EXISTS \"tenant_acme\""));
        assert_eq!(manager.tool.restored.lock().as_slice(), &[artifact]);
    }

    #[tokio::test]
    async fn test_restore_into_empty_schema_needs_no_force() {
        let (manager, id, dir) = setup(DumpBehavior::Write(""), 0).await;
        let artifact = dir.path().join("acme.sql");
        std::fs::write(&artifact, "-- dump").unwrap();

        manager.restore(id, &artifact, false).await.unwrap();
        assert!(manager.backend.executed.lock().is_empty());
        assert_eq!(manager.tool.restored.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_missing_artifact() {
        let (manager, id, dir) = setup(DumpBehavior::Write(""), 0).await;
        let err = manager
            .restore(id, &dir.path().join("missing.sql"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::BackupFailed(_)));
    }

    #[test]
    fn test_pg_dump_args() {
        let tool = PgDumpTool::new(BackupConfig::new("postgresql://localhost/master"));
        let args = tool.dump_args("tenant_acme", Path::new("/backups/acme.sql"));
        assert!(args.contains(&"--schema=tenant_acme".to_string()));
        assert!(args.contains(&"--no-owner".to_string()));
        assert!(args.contains(&"--no-privileges".to_string()));
        assert!(args.contains(&"/backups/acme.sql".to_string()));

        let args = tool.restore_args(Path::new("/backups/acme.sql"));
        assert!(args.contains(&"ON_ERROR_STOP=1".to_string()));
    }
}
