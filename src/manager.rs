//! # Feed Manager
//! Orchestrates the archive, the differ, the impact engine and the signer.
//! Per feed id the only state transition is Unarchived -> Archived, taken by
//! [`FeedManager::archive_feed`].

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::archive::{ArchiveBackend, ArchiveEntry, ArchiveStore, FsBackend};
use crate::config::AtfConfig;
use crate::diff::{diff, FeedDiff};
use crate::error::{AtfError, Missing, Result};
use crate::feed::FeedDocument;
use crate::impact::{AssessmentRecord, AssessmentRequest, ImpactEngine};
use crate::metrics::ensure_metrics_described;
use crate::signing::{FeedSigner, KeyHandle, SignatureEnvelope};
use crate::update::{apply_updates, FeedUpdate};

/// Result of [`FeedManager::automated_update`].
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub entry: ArchiveEntry,
    pub document: FeedDocument,
    /// Base version vs. the newly archived one.
    pub diff: FeedDiff,
}

pub struct FeedManager<B: ArchiveBackend> {
    store: ArchiveStore<B>,
    engine: ImpactEngine,
    signer: Option<Arc<dyn FeedSigner>>,
}

impl FeedManager<FsBackend> {
    /// Filesystem archive under `archive_dir`, catalog and signer per config.
    pub fn from_config(cfg: &AtfConfig) -> Result<Self> {
        let store = ArchiveStore::new(FsBackend::new(&cfg.archive_dir));
        let engine = ImpactEngine::new(Arc::new(cfg.catalog()?));
        let mut mgr = Self::new(store, engine);
        if let Some(signer) = cfg.command_signer()? {
            mgr = mgr.with_signer(Arc::new(signer));
        }
        tracing::debug!(archive_dir = %cfg.archive_dir.display(), "feed manager ready");
        Ok(mgr)
    }
}

impl<B: ArchiveBackend> FeedManager<B> {
    pub fn new(store: ArchiveStore<B>, engine: ImpactEngine) -> Self {
        ensure_metrics_described();
        Self {
            store,
            engine,
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn FeedSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn store(&self) -> &ArchiveStore<B> {
        &self.store
    }

    pub fn engine(&self) -> &ImpactEngine {
        &self.engine
    }

    pub async fn archive_feed(
        &self,
        feed_id: &str,
        document: &FeedDocument,
        version: &str,
    ) -> Result<ArchiveEntry> {
        self.store.archive(feed_id, document, version).await
    }

    /// Pure comparison; works on any two documents, archived or not.
    pub fn compare_feeds(&self, a: &FeedDocument, b: &FeedDocument) -> FeedDiff {
        diff(a, b)
    }

    pub async fn compare_versions(
        &self,
        feed_id: &str,
        old_version: &str,
        new_version: &str,
    ) -> Result<FeedDiff> {
        let old = self.store.retrieve(feed_id, old_version).await?;
        let new = self.store.retrieve(feed_id, new_version).await?;
        Ok(diff(&old, &new))
    }

    pub async fn history(&self, feed_id: &str) -> Result<Vec<ArchiveEntry>> {
        self.store.history(feed_id).await
    }

    /// Apply `updates` to the latest archived version and archive the result
    /// as `new_version`. Anything the updates do not mention, channel
    /// included, is carried over. If any step fails nothing is stored.
    pub async fn automated_update(
        &self,
        feed_id: &str,
        updates: &[FeedUpdate],
        new_version: &str,
    ) -> Result<UpdateOutcome> {
        let latest = self.store.latest(feed_id).await?;
        let base = self.store.retrieve(feed_id, &latest.version).await?;

        let mut updated = apply_updates(&base, updates)?;
        updated.version = new_version.to_string();

        let entry = self.archive_feed(feed_id, &updated, new_version).await?;
        tracing::info!(
            feed_id,
            from = %latest.version,
            to = %new_version,
            operations = updates.len(),
            "automated update archived"
        );

        let diff = diff(&base, &updated);
        Ok(UpdateOutcome {
            entry,
            document: updated,
            diff,
        })
    }

    pub fn build_assessment(
        &self,
        template: &str,
        request: &AssessmentRequest,
    ) -> Result<AssessmentRecord> {
        self.engine.build(template, request)
    }

    /// Sign the stored snapshot bytes of `feed_id@version` and keep the
    /// envelope next to the snapshot. Re-signing replaces the envelope.
    pub async fn sign_version(
        &self,
        feed_id: &str,
        version: &str,
        key: &KeyHandle,
    ) -> Result<SignatureEnvelope> {
        let signer = self.signer()?;
        let entry = self.store.entry(feed_id, version).await?;
        let content = self.store.snapshot_bytes(feed_id, version).await?;

        let signature = signer.sign(&content, key).await?;
        let envelope = SignatureEnvelope {
            feed_id: feed_id.to_string(),
            version: version.to_string(),
            checksum: entry.checksum,
            key_handle: key.clone(),
            signature: hex::encode(&signature),
            signed_at: Utc::now(),
        };
        self.store
            .backend()
            .put(
                &signature_key(feed_id, version),
                serde_json::to_vec_pretty(&envelope)?,
            )
            .await?;
        tracing::info!(feed_id, version, key = %key, "feed version signed");
        Ok(envelope)
    }

    pub async fn signature(&self, feed_id: &str, version: &str) -> Result<SignatureEnvelope> {
        // Resolving the entry first validates the keys and the version.
        self.store.entry(feed_id, version).await?;
        match self
            .store
            .backend()
            .get(&signature_key(feed_id, version))
            .await?
        {
            Some(b) => Ok(serde_json::from_slice(&b)?),
            None => Err(AtfError::not_found(
                Missing::Signature,
                format!("{feed_id}@{version}"),
            )),
        }
    }

    /// `Ok(false)` when the signature does not match the stored snapshot.
    pub async fn verify_version(&self, feed_id: &str, version: &str) -> Result<bool> {
        let signer = self.signer()?;
        let envelope = self.signature(feed_id, version).await?;
        let entry = self.store.entry(feed_id, version).await?;
        if envelope.checksum != entry.checksum {
            tracing::warn!(feed_id, version, "signature envelope checksum does not match entry");
            return Ok(false);
        }
        let content = self.store.snapshot_bytes(feed_id, version).await?;
        let ok = signer
            .verify(&content, &envelope.signature_bytes()?, &envelope.key_handle)
            .await?;
        if !ok {
            tracing::warn!(feed_id, version, "signature verification failed");
        }
        Ok(ok)
    }

    fn signer(&self) -> Result<&Arc<dyn FeedSigner>> {
        self.signer
            .as_ref()
            .ok_or_else(|| AtfError::Signing("no signer configured".into()))
    }
}

fn signature_key(feed_id: &str, version: &str) -> String {
    format!("{feed_id}/{version}.sig.json")
}
