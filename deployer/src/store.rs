//! Persisted stack outputs.
//!
//! [`LocalStackStore`] keeps one JSON document per stack at
//! `<root>/<organization>/<project>/<stack>.json`. It is both where a finished
//! run publishes its exports and where stack references read them back.

use crate::exports::ExportSet;
use crate::reference::{OutputSource, ResolveError, ResolveResult, StackName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt stack document '{path}': {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// On-disk document for one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStack {
    pub stack: StackName,
    pub updated_at: DateTime<Utc>,
    pub outputs: ExportSet,
}

#[derive(Debug, Clone)]
pub struct LocalStackStore {
    root: PathBuf,
}

impl LocalStackStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &StackName) -> PathBuf {
        self.root
            .join(&name.organization)
            .join(&name.project)
            .join(format!("{}.json", name.stack))
    }

    pub async fn save(&self, name: &StackName, outputs: &ExportSet) -> StoreResult<PathBuf> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let document = StoredStack {
            stack: name.clone(),
            updated_at: Utc::now(),
            outputs: outputs.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        info!("Saved {} outputs for {} to {}", outputs.len(), name, path.display());
        Ok(path)
    }

    /// Load a stack document; `None` when the stack was never saved
    pub async fn load(&self, name: &StackName) -> StoreResult<Option<StoredStack>> {
        let path = self.path_for(name);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let document =
            serde_json::from_str(&text).map_err(|source| StoreError::Corrupt { path, source })?;
        Ok(Some(document))
    }
}

#[async_trait]
impl OutputSource for LocalStackStore {
    async fn fetch_outputs(&self, name: &StackName) -> ResolveResult<BTreeMap<String, Value>> {
        debug!("Reading outputs of {} from {}", name, self.root.display());
        match self.load(name).await {
            Ok(Some(document)) => Ok(document.outputs.values()),
            Ok(None) => Err(ResolveError::StackNotFound {
                stack: name.to_string(),
            }),
            Err(e) => Err(ResolveError::Source {
                stack: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Outputs held in memory, counting how often they are fetched
#[derive(Debug, Default)]
pub struct InMemoryOutputs {
    stacks: HashMap<StackName, BTreeMap<String, Value>>,
    fetches: AtomicUsize,
}

impl InMemoryOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack(mut self, name: StackName, outputs: BTreeMap<String, Value>) -> Self {
        self.stacks.insert(name, outputs);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutputSource for InMemoryOutputs {
    async fn fetch_outputs(&self, name: &StackName) -> ResolveResult<BTreeMap<String, Value>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.stacks
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::StackNotFound {
                stack: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn name() -> StackName {
        StackName::new("organization", "infrastructure-vpc", "dev")
    }

    #[test]
    fn test_path_layout() {
        let store = LocalStackStore::new("/var/lib/stacks");
        assert_eq!(
            store.path_for(&name()),
            PathBuf::from("/var/lib/stacks/organization/infrastructure-vpc/dev.json")
        );
    }

    #[tokio::test]
    async fn test_save_then_fetch() {
        let dir = TempDir::new().unwrap();
        let store = LocalStackStore::new(dir.path());

        let mut exports = ExportSet::new();
        exports.insert("vpcId", "vpc-1");
        exports.insert("publicSubnetIds", vec!["subnet-a".to_string()]);
        exports.insert_secret("token", "abc");

        let path = store.save(&name(), &exports).await.unwrap();
        assert!(path.exists());

        let document = store.load(&name()).await.unwrap().unwrap();
        assert_eq!(document.stack, name());
        assert_eq!(document.outputs, exports);

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["stack"], json!("organization/infrastructure-vpc/dev"));

        let outputs = store.fetch_outputs(&name()).await.unwrap();
        assert_eq!(outputs["vpcId"], json!("vpc-1"));
        assert_eq!(outputs["token"], json!("abc"));
    }

    #[tokio::test]
    async fn test_missing_stack() {
        let dir = TempDir::new().unwrap();
        let store = LocalStackStore::new(dir.path());

        assert!(store.load(&name()).await.unwrap().is_none());
        assert!(matches!(
            store.fetch_outputs(&name()).await,
            Err(ResolveError::StackNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_document() {
        let dir = TempDir::new().unwrap();
        let store = LocalStackStore::new(dir.path());
        let path = store.path_for(&name());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            store.load(&name()).await,
            Err(StoreError::Corrupt { .. })
        ));

        std::fs::write(
            &path,
            r#"{"stack": "dev", "updated_at": "2024-01-01T00:00:00Z", "outputs": {}}"#,
        )
        .unwrap();
        assert!(matches!(
            store.load(&name()).await,
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(
            store.fetch_outputs(&name()).await,
            Err(ResolveError::Source { .. })
        ));
    }

    #[tokio::test]
    async fn test_in_memory_counts_fetches() {
        let source = InMemoryOutputs::new().with_stack(name(), BTreeMap::new());
        assert!(source.fetch_outputs(&name()).await.unwrap().is_empty());
        assert!(source
            .fetch_outputs(&StackName::new("o", "p", "s"))
            .await
            .is_err());
        assert_eq!(source.fetch_count(), 2);
    }
}
