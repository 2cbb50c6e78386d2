use crate::domain::ports::ArtifactStorage;
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

/// Stores rendered artifacts under a directory on the local filesystem.
pub struct LocalArtifactStorage {
    base_path: PathBuf,
}

impl LocalArtifactStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BillingError::ValidationError(format!(
                "artifact path must be relative: {path}"
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl ArtifactStorage for LocalArtifactStorage {
    async fn put(&self, bytes: Vec<u8>, path: &str) -> Result<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, bytes).await?;
        Ok(format!("file://{}", target.display()))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        Ok(fs::read(target).await?)
    }
}

/// Keeps artifacts in memory; URLs use the `memory://` scheme.
#[derive(Default, Clone)]
pub struct InMemoryArtifactStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryArtifactStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ArtifactStorage for InMemoryArtifactStorage {
    async fn put(&self, bytes: Vec<u8>, path: &str) -> Result<String> {
        self.objects.write().await.insert(path.to_string(), bytes);
        Ok(format!("memory://{path}"))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| BillingError::not_found("artifact", path))
    }
}
