//! # Feed Document Model
//! In-memory shape of an ATF feed: channel metadata plus ordered items.
//! Nothing here knows about XML; see [`xml`] for the wire format.

pub mod xml;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AtfError, Result};

pub const ATF_NAMESPACE: &str = "https://www.algorithmictransparency.gov/atf";
pub const ATF_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedChannel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub last_build_date: DateTime<Utc>,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAssessment {
    pub summary: String,
    /// `<number>%`, kept as written.
    pub affected_users: String,
    /// Metric values are opaque strings (units vary: %, ms, ε=…, ratios).
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub pub_date: DateTime<Utc>,
    pub categories: Vec<String>,
    pub description: String,
    pub impact_assessment: ImpactAssessment,
}

impl FeedItem {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.title, &self.link)
    }
}

/// Composite item identity. The schema has no item id, so (title, link) is
/// the only stable handle available.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub title: String,
    pub link: String,
}

impl ItemKey {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.title, self.link)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDocument {
    pub version: String,
    pub channel: FeedChannel,
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

impl FeedDocument {
    pub fn new(version: impl Into<String>, channel: FeedChannel) -> Self {
        Self {
            version: version.into(),
            channel,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: FeedItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn find_item(&self, key: &ItemKey) -> Option<&FeedItem> {
        self.items.iter().find(|it| it.title == key.title && it.link == key.link)
    }

    /// Structural checks the model guarantees regardless of the schema.
    pub fn check(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(AtfError::InvalidDocument("version is empty".into()));
        }
        for it in &self.items {
            if it.categories.is_empty() {
                return Err(AtfError::InvalidDocument(format!(
                    "item {} has no categories",
                    it.key()
                )));
            }
        }
        Ok(())
    }

    /// Stable serialization of the document content, used for checksums.
    ///
    /// The version string is left out: it labels a snapshot, it is not part
    /// of what the snapshot says. Metrics are a `BTreeMap`, so key order is
    /// fixed no matter how the source XML ordered them.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            channel: &'a FeedChannel,
            items: &'a [FeedItem],
        }
        Ok(serde_json::to_vec(&Canonical {
            channel: &self.channel,
            items: &self.items,
        })?)
    }

    /// SHA-256 of [`canonical_bytes`](Self::canonical_bytes), lowercase hex.
    pub fn checksum(&self) -> Result<String> {
        Ok(sha256_hex(&self.canonical_bytes()?))
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
