//! External data stores queried by data-existence triggers.
//!
//! Store handles are opened lazily from a store reference such as
//! `file:///data` and kept in a [`DataStores`] cache for the rest of the
//! process. Each reference is connected at most once, even when several
//! callers ask for it at the same time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;

const FILE_SCHEME: &str = "file://";

/// Errors raised while opening or querying a data store.
#[derive(Debug, Error)]
pub enum DataStoreError {
    /// No connector understands this store reference.
    #[error("unsupported store reference: {0}")]
    UnsupportedStore(String),

    /// The existence check itself failed.
    #[error("failed to check '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The handle cache lock was poisoned.
    #[error("store cache lock poisoned")]
    LockPoisoned,
}

/// A store that can answer whether an object exists at a path.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Check whether `path` exists.
    async fn exists(&self, path: &str) -> Result<bool, DataStoreError>;
}

/// Opens store handles from store references.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Open a handle for `store_ref`.
    async fn connect(&self, store_ref: &str) -> Result<Arc<dyn DataStore>, DataStoreError>;
}

/// A data store backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl DataStore for LocalFileStore {
    async fn exists(&self, path: &str) -> Result<bool, DataStoreError> {
        let resolved = self.resolve(path);
        tokio::fs::try_exists(&resolved)
            .await
            .map_err(|source| DataStoreError::Io {
                path: resolved.display().to_string(),
                source,
            })
    }
}

/// Connector for `file://<root>` references.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnector;

#[async_trait]
impl StoreConnector for LocalConnector {
    async fn connect(&self, store_ref: &str) -> Result<Arc<dyn DataStore>, DataStoreError> {
        let root = store_ref
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| DataStoreError::UnsupportedStore(store_ref.to_string()))?;
        let root = if root.is_empty() { "/" } else { root };
        tracing::debug!(store = %store_ref, root = %root, "Opening local data store");
        Ok(Arc::new(LocalFileStore::new(root)))
    }
}

static SHARED: LazyLock<Arc<DataStores>> = LazyLock::new(|| Arc::new(DataStores::new()));

/// Cache of open store handles keyed by store reference.
///
/// Handles live as long as the cache and are never evicted.
pub struct DataStores {
    connector: Arc<dyn StoreConnector>,
    handles: Mutex<HashMap<String, Arc<OnceCell<Arc<dyn DataStore>>>>>,
}

impl DataStores {
    /// Create an empty cache that opens `file://` references.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(LocalConnector))
    }

    /// Create an empty cache with a custom connector.
    pub fn with_connector(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide cache.
    pub fn shared() -> Arc<DataStores> {
        Arc::clone(&SHARED)
    }

    /// Register an already-open handle under `store_ref`.
    ///
    /// Has no effect if the reference was already opened.
    pub fn insert(
        &self,
        store_ref: impl Into<String>,
        store: Arc<dyn DataStore>,
    ) -> Result<(), DataStoreError> {
        let mut handles = self
            .handles
            .lock()
            .map_err(|_| DataStoreError::LockPoisoned)?;
        handles
            .entry(store_ref.into())
            .or_insert_with(|| Arc::new(OnceCell::from(store)));
        Ok(())
    }

    /// Get the handle for `store_ref`, connecting on first use.
    ///
    /// A failed connection is not cached; the next call tries again.
    pub async fn get(&self, store_ref: &str) -> Result<Arc<dyn DataStore>, DataStoreError> {
        let cell = {
            let mut handles = self
                .handles
                .lock()
                .map_err(|_| DataStoreError::LockPoisoned)?;
            Arc::clone(handles.entry(store_ref.to_string()).or_default())
        };

        let store = cell
            .get_or_try_init(|| self.connector.connect(store_ref))
            .await?;
        Ok(Arc::clone(store))
    }

    /// Number of references with an open handle.
    pub fn open_count(&self) -> usize {
        self.handles
            .lock()
            .map(|handles| handles.values().filter(|cell| cell.initialized()).count())
            .unwrap_or(0)
    }
}

impl Default for DataStores {
    fn default() -> Self {
        Self::new()
    }
}
