//! Filesystem-backed object store.
//!
//! Keys map to paths under a root directory. Writes go to a temporary sibling
//! and are renamed into place, so readers never see a partial object.

use crate::ObjectStore;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const TMP_MARKER: &str = ".tmp-";

pub struct FsObjectStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsObjectStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create object store root {:?}", root))?;
        log::debug!("Object store rooted at {:?}", root);
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("Invalid object key {:?}", key);
        }
        Ok(self.root.join(rel))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read object {}", key)),
        }
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory for {}", key))?;
        }

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let mut tmp = path.clone().into_os_string();
        tmp.push(format!("{}{}-{}", TMP_MARKER, std::process::id(), n));
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &data)
            .await
            .with_context(|| format!("Failed to write object {}", key))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                log::warn!("Failed to remove temporary object {:?}: {}", tmp, cleanup);
            }
            return Err(e).with_context(|| format!("Failed to commit object {}", key));
        }
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to stat object {}", key)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("Failed to list {:?}", dir)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = self.key_for(&path) else { continue };
                if key.contains(TMP_MARKER) {
                    continue;
                }
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_head_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path()).await.unwrap();

        assert!(!store.head("dem/N46W113").await.unwrap());
        assert!(store.get("dem/N46W113").await.unwrap().is_none());

        store.put("dem/N46W113", Bytes::from_static(b"abc")).await.unwrap();
        store.put("chunks/v1/terrain/r8/0/0.bin", Bytes::from_static(b"x")).await.unwrap();

        assert!(store.head("dem/N46W113").await.unwrap());
        assert_eq!(store.get("dem/N46W113").await.unwrap().unwrap(), Bytes::from_static(b"abc"));

        let keys = store.list("dem/").await.unwrap();
        assert_eq!(keys, vec!["dem/N46W113".to_string()]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path()).await.unwrap();

        store.put("a/b", Bytes::from_static(b"first")).await.unwrap();
        store.put("a/b", Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(store.get("a/b").await.unwrap().unwrap(), Bytes::from_static(b"second"));
        assert_eq!(store.list("a/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path()).await.unwrap();

        assert!(store.put("../outside", Bytes::new()).await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
        assert!(store.head("").await.is_err());
    }
}
