// src/update.rs
//! Update operations applied by the manager's automated update.
//!
//! An update file is a JSON array of operations tagged by `type`:
//! `add`, `modify`, `remove`, `channel`. Operations run in order against the
//! evolving document; anything an operation does not mention is carried over.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::error::{AtfError, Missing, Result};
use crate::feed::{FeedDocument, FeedItem, ItemKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedUpdate {
    /// New item; its (title, link) must not exist in the base document.
    Add { item: FeedItem },
    Modify { key: ItemKey, changes: ItemPatch },
    Remove { key: ItemKey },
    Channel { changes: ChannelPatch },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub affected_users: Option<String>,
    /// Merged into the existing metrics; `null` removes a metric.
    #[serde(default)]
    pub metrics: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub last_build_date: Option<DateTime<Utc>>,
}

pub fn parse_updates(json: &str) -> Result<Vec<FeedUpdate>> {
    Ok(serde_json::from_str(json)?)
}

/// Apply `updates` to a copy of `base`. `base` itself is never touched, so a
/// failure leaves no partial state behind.
pub fn apply_updates(base: &FeedDocument, updates: &[FeedUpdate]) -> Result<FeedDocument> {
    let base_keys: HashSet<ItemKey> = base.items.iter().map(FeedItem::key).collect();
    let mut doc = base.clone();

    for up in updates {
        match up {
            FeedUpdate::Add { item } => {
                let key = item.key();
                if base_keys.contains(&key) || doc.find_item(&key).is_some() {
                    return Err(AtfError::ItemExists(key.to_string()));
                }
                if item.categories.is_empty() {
                    return Err(AtfError::InvalidDocument(format!(
                        "added item {key} has no categories"
                    )));
                }
                doc.items.push(item.clone());
            }
            FeedUpdate::Modify { key, changes } => {
                let idx = position(&doc, key)?;
                let patched = patch_item(&doc.items[idx], changes)?;
                let new_key = patched.key();
                if new_key != *key && doc.find_item(&new_key).is_some() {
                    return Err(AtfError::ItemExists(new_key.to_string()));
                }
                doc.items[idx] = patched;
            }
            FeedUpdate::Remove { key } => {
                let idx = position(&doc, key)?;
                doc.items.remove(idx);
            }
            FeedUpdate::Channel { changes } => {
                let ch = &mut doc.channel;
                if let Some(v) = &changes.title {
                    ch.title = v.clone();
                }
                if let Some(v) = &changes.link {
                    ch.link = v.clone();
                }
                if let Some(v) = &changes.description {
                    ch.description = v.clone();
                }
                if let Some(v) = &changes.language {
                    ch.language = v.clone();
                }
                if let Some(v) = changes.last_build_date {
                    ch.last_build_date = v;
                }
            }
        }
    }

    counter!("atf_updates_applied_total").increment(updates.len() as u64);
    Ok(doc)
}

fn position(doc: &FeedDocument, key: &ItemKey) -> Result<usize> {
    doc.items
        .iter()
        .position(|it| it.title == key.title && it.link == key.link)
        .ok_or_else(|| AtfError::not_found(Missing::Item, key.to_string()))
}

fn patch_item(item: &FeedItem, p: &ItemPatch) -> Result<FeedItem> {
    let mut out = item.clone();
    if let Some(v) = &p.title {
        out.title = v.clone();
    }
    if let Some(v) = &p.link {
        out.link = v.clone();
    }
    if let Some(v) = p.pub_date {
        out.pub_date = v;
    }
    if let Some(v) = &p.description {
        out.description = v.clone();
    }
    if let Some(v) = &p.categories {
        if v.is_empty() {
            return Err(AtfError::InvalidDocument(format!(
                "modify of {} would leave no categories",
                item.key()
            )));
        }
        out.categories = v.clone();
    }
    let ia = &mut out.impact_assessment;
    if let Some(v) = &p.summary {
        ia.summary = v.clone();
    }
    if let Some(v) = &p.affected_users {
        ia.affected_users = v.clone();
    }
    for (name, value) in &p.metrics {
        match value {
            Some(v) => {
                ia.metrics.insert(name.clone(), v.clone());
            }
            None => {
                ia.metrics.remove(name);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fixtures::*;

    fn base() -> FeedDocument {
        FeedDocument::new("1.0", channel("Corp A"))
            .with_item(item("X", "https://x.example.com/x"))
            .with_item(item("Y", "https://x.example.com/y"))
    }

    #[test]
    fn parses_tagged_operations() {
        let json = r#"[
            {"type": "remove", "key": {"title": "Y", "link": "https://x.example.com/y"}},
            {"type": "modify", "key": {"title": "X", "link": "https://x.example.com/x"},
             "changes": {"description": "new text", "metrics": {"accuracy": null, "latency": "-4%"}}},
            {"type": "channel", "changes": {"language": "en-gb", "lastBuildDate": "2024-03-27T12:00:00Z"}}
        ]"#;
        let ups = parse_updates(json).unwrap();
        assert_eq!(ups.len(), 3);

        let out = apply_updates(&base(), &ups).unwrap();
        assert_eq!(out.items.len(), 1);
        let x = &out.items[0];
        assert_eq!(x.description, "new text");
        assert_eq!(x.impact_assessment.metrics.get("latency").map(String::as_str), Some("-4%"));
        assert!(!x.impact_assessment.metrics.contains_key("accuracy"));
        assert_eq!(x.impact_assessment.summary, "X summary");
        assert_eq!(out.channel.language, "en-gb");
        assert_eq!(out.channel.last_build_date, ts(27));
        assert_eq!(out.channel.title, "Corp A");
    }

    #[test]
    fn add_requires_fresh_key() {
        let ups = vec![FeedUpdate::Add {
            item: item("X", "https://x.example.com/x"),
        }];
        assert!(matches!(apply_updates(&base(), &ups), Err(AtfError::ItemExists(_))));
    }

    #[test]
    fn re_adding_a_removed_base_key_is_rejected() {
        let key = ItemKey::new("X", "https://x.example.com/x");
        let ups = vec![
            FeedUpdate::Remove { key },
            FeedUpdate::Add {
                item: item("X", "https://x.example.com/x"),
            },
        ];
        assert!(matches!(apply_updates(&base(), &ups), Err(AtfError::ItemExists(_))));
    }

    #[test]
    fn unknown_key_is_not_found() {
        let ups = vec![FeedUpdate::Remove {
            key: ItemKey::new("Nope", "https://x.example.com/n"),
        }];
        let err = apply_updates(&base(), &ups).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rekey_onto_existing_item_is_rejected() {
        let ups = vec![FeedUpdate::Modify {
            key: ItemKey::new("X", "https://x.example.com/x"),
            changes: ItemPatch {
                title: Some("Y".into()),
                link: Some("https://x.example.com/y".into()),
                ..Default::default()
            },
        }];
        assert!(matches!(apply_updates(&base(), &ups), Err(AtfError::ItemExists(_))));
    }

    #[test]
    fn base_is_untouched_on_failure() {
        let b = base();
        let ups = vec![
            FeedUpdate::Channel {
                changes: ChannelPatch {
                    title: Some("Changed".into()),
                    ..Default::default()
                },
            },
            FeedUpdate::Remove {
                key: ItemKey::new("Nope", "https://x.example.com/n"),
            },
        ];
        assert!(apply_updates(&b, &ups).is_err());
        assert_eq!(b, base());
    }
}
