// src/lib.rs
//! Lifecycle manager for Algorithmic Transparency Feeds (ATF).
//!
//! ```text
//! feed (model + XML) ──► archive ──► manager ◄── impact (templates)
//!                          │            │
//!                          └── diff ◄───┘── update / signing
//! ```

pub mod archive;
pub mod config;
pub mod diff;
pub mod error;
pub mod feed;
pub mod impact;
pub mod manager;
pub mod metrics;
pub mod signing;
pub mod update;

// ---- Re-exports for stable public API ----
pub use crate::archive::{ArchiveBackend, ArchiveEntry, ArchiveStore, FsBackend, MemoryBackend};
pub use crate::diff::{diff, FeedDiff};
pub use crate::error::{AtfError, Result};
pub use crate::feed::{FeedChannel, FeedDocument, FeedItem, ImpactAssessment, ItemKey};
pub use crate::impact::{AssessmentRecord, AssessmentRequest, ImpactEngine, TemplateCatalog};
pub use crate::manager::{FeedManager, UpdateOutcome};
pub use crate::update::FeedUpdate;
