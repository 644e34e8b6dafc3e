//! Database provisioning.
//!
//! Resolves `(clientProjectRoot, repository, branch)` to an opened embedded
//! graph database. Handles are cached for the life of the process and
//! opened at most once per key; concurrent requests for the same key share
//! one handle.

pub mod store;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use self::store::GraphStore;

/// Cache key for one provisioned database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbKey {
    pub client_project_root: PathBuf,
    pub repository: String,
    pub branch: String,
}

/// A reference-counted open database. The store mutex serializes access;
/// the embedded engine serializes writes per file underneath.
pub struct DatabaseHandle {
    key: DbKey,
    path: PathBuf,
    store: Mutex<GraphStore>,
}

impl DatabaseHandle {
    /// Run a closure against the locked store.
    pub async fn with_store<T>(
        &self,
        f: impl FnOnce(&mut GraphStore) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut store = self.store.lock().await;
        f(&mut store)
    }

    /// Run a read-only query against the store.
    pub async fn execute_query(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Value>> {
        let store = self.store.lock().await;
        store.execute_query(sql, params)
    }

    /// Provisioner key this handle was opened for.
    #[must_use]
    pub fn key(&self) -> &DbKey {
        &self.key
    }

    /// On-disk path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("path", &self.path)
            .finish()
    }
}

/// Process-wide provisioner and handle cache.
pub struct DbProvisioner {
    db_relative_dir: String,
    db_extension: String,
    handles: RwLock<HashMap<DbKey, Arc<DatabaseHandle>>>,
    /// Per-key open guards so an open happens at most once per key without
    /// blocking unrelated keys.
    open_locks: Mutex<HashMap<DbKey, Arc<Mutex<()>>>>,
}

impl DbProvisioner {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            db_relative_dir: config.db_relative_dir.clone(),
            db_extension: config.db_extension.clone(),
            handles: RwLock::new(HashMap::new()),
            open_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a key to its open handle, opening the database on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PathTraversal`] for branch names that escape
    /// the client project root and [`StoreError::Open`] when the file
    /// cannot be created or opened.
    pub async fn acquire(
        &self,
        client_project_root: &str,
        repository: &str,
        branch: &str,
    ) -> StoreResult<Arc<DatabaseHandle>> {
        let key = DbKey {
            client_project_root: PathBuf::from(client_project_root),
            repository: repository.to_string(),
            branch: branch.to_string(),
        };

        if let Some(handle) = self.handles.read().await.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let open_lock = {
            let mut locks = self.open_locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let _guard = open_lock.lock().await;

        // Another request may have finished the open while we waited.
        if let Some(handle) = self.handles.read().await.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let path = self.derive_path(&key.client_project_root, branch)?;
        let directory = path
            .parent()
            .ok_or_else(|| StoreError::open(path.display().to_string(), "no parent directory"))?;
        std::fs::create_dir_all(directory)
            .map_err(|e| StoreError::open(directory.display().to_string(), e.to_string()))?;

        let opened_path = path.clone();
        let store = tokio::task::spawn_blocking(move || GraphStore::open(&opened_path))
            .await
            .map_err(|e| StoreError::open(path.display().to_string(), e.to_string()))??;

        let handle = Arc::new(DatabaseHandle {
            key: key.clone(),
            path: path.clone(),
            store: Mutex::new(store),
        });
        self.handles
            .write()
            .await
            .insert(key, Arc::clone(&handle));
        tracing::info!(path = %path.display(), "database opened");
        Ok(handle)
    }

    /// Derive the deterministic on-disk path for a branch under a client
    /// project root. The sanitized branch is a single path component, so
    /// the file cannot escape the root.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PathTraversal`] for empty or dot-only branch
    /// names, or a relative db directory that climbs upward.
    pub fn derive_path(&self, client_project_root: &Path, branch: &str) -> StoreResult<PathBuf> {
        let sanitized = sanitize_branch(branch);
        if sanitized.is_empty() {
            return Err(StoreError::PathTraversal {
                branch: branch.to_string(),
            });
        }

        let relative = Path::new(&self.db_relative_dir);
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(StoreError::PathTraversal {
                branch: branch.to_string(),
            });
        }

        Ok(client_project_root
            .join(relative)
            .join(format!("{sanitized}.{}", self.db_extension)))
    }

    /// Number of open handles.
    pub async fn open_count(&self) -> usize {
        self.handles.read().await.len()
    }

    /// Drop every handle, closing the underlying files.
    pub async fn close_all(&self) {
        let mut handles = self.handles.write().await;
        let count = handles.len();
        handles.clear();
        self.open_locks.lock().await.clear();
        if count > 0 {
            tracing::info!(count, "database handles closed");
        }
    }
}

impl std::fmt::Debug for DbProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbProvisioner")
            .field("db_relative_dir", &self.db_relative_dir)
            .finish()
    }
}

/// Collapse a branch name into one safe path component. Slashes become
/// dashes (`feature/login` -> `feature-login`); anything outside
/// `[A-Za-z0-9._-]` becomes a dash; dot-only results are rejected upstream.
fn sanitize_branch(branch: &str) -> String {
    let mapped: String = branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches('-');
    if trimmed.chars().all(|c| c == '.') {
        String::new()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioner() -> DbProvisioner {
        DbProvisioner::new(&Config::for_testing())
    }

    #[test]
    fn test_sanitize_branch() {
        assert_eq!(sanitize_branch("main"), "main");
        assert_eq!(sanitize_branch("feature/login"), "feature-login");
        assert_eq!(sanitize_branch("release/v1.2"), "release-v1.2");
        assert_eq!(sanitize_branch("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_branch(".."), "");
        assert_eq!(sanitize_branch(""), "");
    }

    #[test]
    fn test_derive_path_stays_under_root() {
        let p = provisioner();
        let root = Path::new("/tmp/project");

        let path = p.derive_path(root, "feature/login").unwrap();
        assert!(path.starts_with(root));
        assert_eq!(
            path,
            root.join(".graph-memory").join("feature-login.gmdb")
        );

        assert!(matches!(
            p.derive_path(root, ".."),
            Err(StoreError::PathTraversal { .. })
        ));
    }

    #[tokio::test]
    async fn test_acquire_caches_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let p = provisioner();

        let first = p.acquire(root, "demo", "main").await.unwrap();
        let second = p.acquire(root, "demo", "main").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(p.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_handles() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let p = provisioner();

        let main = p.acquire(root, "demo", "main").await.unwrap();
        let dev = p.acquire(root, "demo", "dev").await.unwrap();
        assert!(!Arc::ptr_eq(&main, &dev));
        assert_ne!(main.path(), dev.path());
        assert_eq!(p.open_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_opens_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();
        let p = Arc::new(provisioner());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let p = Arc::clone(&p);
                let root = root.clone();
                tokio::spawn(async move { p.acquire(&root, "demo", "main").await.unwrap() })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(p.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_handle_reaches_store() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let p = provisioner();

        let handle = p.acquire(root, "demo", "main").await.unwrap();
        handle
            .with_store(|s| {
                s.upsert_node("demo", "Component", "comp-a", "Auth", &serde_json::json!({}))
                    .map(|_| ())
            })
            .await
            .unwrap();

        let rows = handle
            .execute_query("SELECT COUNT(*) AS n FROM nodes", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!(1));
    }
}
