// src/archive/backend.rs
//! Keyed storage behind the archive: get / put / list-by-prefix, nothing more.
//! Keys are `/`-separated relative paths such as `corp-a/1.0.meta.json`.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::Result;

#[async_trait::async_trait]
pub trait ArchiveBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Must be atomic: readers see either the old value or the new one.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Directory-tree backend. Writes go through a temp file in the target
/// directory, are fsynced, then renamed over the final path.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |p, seg| p.join(seg))
    }
}

#[async_trait::async_trait]
impl ArchiveBackend for FsBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || atomic_write_file(&path, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let keys = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            walk(&root, "", &mut out)?;
            out.retain(|k| k.starts_with(&prefix));
            out.sort();
            Ok::<_, std::io::Error>(out)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(keys)
    }
}

fn walk(dir: &Path, rel: &str, out: &mut Vec<String>) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for e in entries.flatten() {
        let name = e.file_name().to_string_lossy().to_string();
        // Leftover temp files from interrupted writes are not entries.
        if name.starts_with(".tmp") {
            continue;
        }
        let key = if rel.is_empty() {
            name.clone()
        } else {
            format!("{rel}/{name}")
        };
        if e.file_type()?.is_dir() {
            walk(&e.path(), &key, out)?;
        } else {
            out.push(key);
        }
    }
    Ok(())
}

fn atomic_write_file(final_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = final_path
        .parent()
        .ok_or_else(|| std::io::Error::other("archive key has no parent directory"))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.as_file_mut().write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(final_path).map_err(|e| e.error)?;
    Ok(())
}

/// In-process backend for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ArchiveBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.inner.read().expect("memory backend lock poisoned");
        Ok(map.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut map = self.inner.write().expect("memory backend lock poisoned");
        map.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.inner.read().expect("memory backend lock poisoned");
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
