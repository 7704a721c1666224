//! # Archive Store
//! Versioned, checksummed snapshots of feed documents.
//!
//! Layout per feed (keys relative to the backend root):
//! - `<feed>/<version>.xml`: the snapshot, written as ATF XML
//! - `<feed>/<version>.meta.json`: the [`ArchiveEntry`] record
//!
//! The snapshot is written before the metadata record and only metadata
//! records are listed, so an entry becomes visible in one atomic step.
//! Writers are serialized per feed id; readers never lock.

pub mod backend;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AtfError, Missing, Result};
use crate::feed::xml::{parse_feed, write_feed};
use crate::feed::FeedDocument;
pub use backend::{ArchiveBackend, FsBackend, MemoryBackend};

const META_SUFFIX: &str = ".meta.json";
const SNAPSHOT_SUFFIX: &str = ".xml";

static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub feed_id: String,
    pub version: String,
    /// SHA-256 of the canonical content serialization.
    pub checksum: String,
    pub archived_at: DateTime<Utc>,
    /// 1-based archival order within the feed.
    pub sequence: u64,
    pub prior_version: Option<String>,
    /// Earlier version of this feed with byte-identical canonical content.
    #[serde(default)]
    pub duplicate_of: Option<String>,
    pub snapshot_key: String,
}

pub struct ArchiveStore<B: ArchiveBackend> {
    backend: B,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<B: ArchiveBackend> ArchiveStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn writer_lock(&self, feed_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.writers.lock().expect("writer map mutex poisoned");
        map.entry(feed_id.to_string()).or_default().clone()
    }

    /// Store `document` as `version` of `feed_id`.
    ///
    /// The label lives in the entry only; the XML snapshot always carries the
    /// ATF format version on its root.
    pub async fn archive(
        &self,
        feed_id: &str,
        document: &FeedDocument,
        version: &str,
    ) -> Result<ArchiveEntry> {
        check_key(feed_id)?;
        check_key(version)?;

        let mut snapshot = document.clone();
        snapshot.version = version.to_string();
        snapshot.check()?;
        let xml = write_feed(&snapshot)?;
        // Checksum what readers will get back; sub-second precision does not
        // survive the XML form.
        let checksum = parse_feed(&xml)?.checksum()?;

        let lock = self.writer_lock(feed_id);
        let _guard = lock.lock().await;

        if self.backend.get(&meta_key(feed_id, version)).await?.is_some() {
            return Err(AtfError::DuplicateVersion {
                feed_id: feed_id.to_string(),
                version: version.to_string(),
            });
        }

        let history = self.entries(feed_id).await?;
        let prior = history.last();
        let duplicate_of = history
            .iter()
            .find(|e| e.checksum == checksum)
            .map(|e| e.version.clone());

        let entry = ArchiveEntry {
            feed_id: feed_id.to_string(),
            version: version.to_string(),
            checksum,
            archived_at: Utc::now(),
            sequence: prior.map(|p| p.sequence + 1).unwrap_or(1),
            prior_version: prior.map(|p| p.version.clone()),
            duplicate_of,
            snapshot_key: snapshot_key(feed_id, version),
        };

        self.backend
            .put(&entry.snapshot_key, xml.into_bytes())
            .await?;
        self.backend
            .put(&meta_key(feed_id, version), serde_json::to_vec_pretty(&entry)?)
            .await?;

        counter!("atf_archive_writes_total").increment(1);
        if let Some(same) = &entry.duplicate_of {
            counter!("atf_archive_duplicate_content_total").increment(1);
            tracing::warn!(
                feed_id,
                version,
                same_as = %same,
                checksum = %entry.checksum,
                "archived content identical to an earlier version"
            );
        }
        tracing::info!(
            feed_id,
            version,
            sequence = entry.sequence,
            checksum = %entry.checksum,
            "archived feed version"
        );
        Ok(entry)
    }

    pub async fn retrieve(&self, feed_id: &str, version: &str) -> Result<FeedDocument> {
        let entry = self.entry(feed_id, version).await?;
        let bytes = self
            .backend
            .get(&entry.snapshot_key)
            .await?
            .ok_or_else(|| AtfError::not_found(Missing::Version, entry.snapshot_key.clone()))?;
        let xml = String::from_utf8(bytes)
            .map_err(|e| AtfError::Xml(format!("snapshot is not utf-8: {e}")))?;
        let mut doc = parse_feed(&xml)?;
        doc.version = entry.version;
        Ok(doc)
    }

    /// Raw snapshot bytes, exactly as stored. These are the bytes that get signed.
    pub async fn snapshot_bytes(&self, feed_id: &str, version: &str) -> Result<Vec<u8>> {
        let entry = self.entry(feed_id, version).await?;
        self.backend
            .get(&entry.snapshot_key)
            .await?
            .ok_or_else(|| AtfError::not_found(Missing::Version, entry.snapshot_key))
    }

    pub async fn entry(&self, feed_id: &str, version: &str) -> Result<ArchiveEntry> {
        check_key(feed_id)?;
        check_key(version)?;
        match self.backend.get(&meta_key(feed_id, version)).await? {
            Some(b) => Ok(serde_json::from_slice(&b)?),
            None => Err(AtfError::not_found(
                Missing::Version,
                format!("{feed_id}@{version}"),
            )),
        }
    }

    pub async fn latest(&self, feed_id: &str) -> Result<ArchiveEntry> {
        self.history(feed_id)
            .await?
            .pop()
            .ok_or_else(|| AtfError::not_found(Missing::Feed, feed_id))
    }

    /// All entries of `feed_id`, oldest first.
    pub async fn history(&self, feed_id: &str) -> Result<Vec<ArchiveEntry>> {
        check_key(feed_id)?;
        let entries = self.entries(feed_id).await?;
        if entries.is_empty() {
            return Err(AtfError::not_found(Missing::Feed, feed_id));
        }
        Ok(entries)
    }

    /// Feed ids that have at least one committed entry.
    pub async fn feeds(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .backend
            .list("")
            .await?
            .into_iter()
            .filter(|k| k.ends_with(META_SUFFIX))
            .filter_map(|k| k.split_once('/').map(|(feed, _)| feed.to_string()))
            .collect();
        ids.dedup();
        Ok(ids)
    }

    /// Entries whose metadata satisfies `predicate`, ordered by feed id and
    /// then archival order.
    ///
    /// Metadata is read once per call; the returned iterator filters lazily
    /// over that snapshot. Call again to observe later writes.
    pub async fn search<F>(&self, predicate: F) -> Result<impl Iterator<Item = ArchiveEntry>>
    where
        F: FnMut(&ArchiveEntry) -> bool,
    {
        let mut all = Vec::new();
        for feed_id in self.feeds().await? {
            all.extend(self.entries(&feed_id).await?);
        }
        Ok(all.into_iter().filter(predicate))
    }

    async fn entries(&self, feed_id: &str) -> Result<Vec<ArchiveEntry>> {
        let prefix = format!("{feed_id}/");
        let mut out = Vec::new();
        for key in self.backend.list(&prefix).await? {
            if !key.ends_with(META_SUFFIX) {
                continue;
            }
            if let Some(bytes) = self.backend.get(&key).await? {
                out.push(serde_json::from_slice::<ArchiveEntry>(&bytes)?);
            }
        }
        out.sort_by_key(|e| e.sequence);
        Ok(out)
    }
}

pub(crate) fn check_key(k: &str) -> Result<()> {
    if KEY_RE.is_match(k) {
        Ok(())
    } else {
        Err(AtfError::InvalidKey(k.to_string()))
    }
}

fn meta_key(feed_id: &str, version: &str) -> String {
    format!("{feed_id}/{version}{META_SUFFIX}")
}

fn snapshot_key(feed_id: &str, version: &str) -> String {
    format!("{feed_id}/{version}{SNAPSHOT_SUFFIX}")
}
