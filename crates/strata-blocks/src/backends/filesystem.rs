use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::backend::BlobBackend;
use crate::error::{BackendError, BackendResult};

const TEMP_MARKER: &str = ".tmp.";

/// Local filesystem blob backend.
///
/// Keys map to relative paths under the root. Writes go to a uniquely named
/// temporary file that is synced and then renamed into place.
#[derive(Debug)]
pub struct FilesystemBackend {
    name: String,
    root: PathBuf,
}

impl FilesystemBackend {
    pub async fn new(name: impl Into<String>, root: impl AsRef<Path>) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> BackendResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        if key.contains(TEMP_MARKER) {
            return Err(BackendError::InvalidKey(format!("reserved marker in {key}")));
        }
        for component in Path::new(key).components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(BackendError::InvalidKey(key.to_string()));
            }
        }
        Ok(self.root.join(key))
    }

    fn not_found(key: &str) -> impl FnOnce(std::io::Error) -> BackendError + '_ {
        move |e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::NotFound(key.to_string())
            } else {
                BackendError::Io(e)
            }
        }
    }
}

#[async_trait]
impl BlobBackend for FilesystemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, data), fields(backend = %self.name, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> BackendResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path =
            path.with_file_name(format!("{file_name}{TEMP_MARKER}{}", uuid::Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn get(&self, key: &str) -> BackendResult<Bytes> {
        let path = self.key_path(key)?;
        let data = fs::read(&path).await.map_err(Self::not_found(key))?;
        Ok(Bytes::from(data))
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let path = self.key_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn delete(&self, key: &str) -> BackendResult<()> {
        let path = self.key_path(key)?;
        fs::remove_file(&path).await.map_err(Self::not_found(key))
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        // Walk the deepest directory the prefix names, then filter.
        let base = match prefix.rfind('/') {
            Some(i) => self.key_path(&prefix[..i])?,
            None => self.root.clone(),
        };
        let mut keys = Vec::new();
        if !fs::try_exists(&base).await? {
            return Ok(keys);
        }

        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    let Ok(rel) = path.strip_prefix(&self.root) else {
                        continue;
                    };
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) && !key.contains(TEMP_MARKER) {
                        keys.push(key);
                    }
                }
            }
        }
        Ok(keys)
    }
}
