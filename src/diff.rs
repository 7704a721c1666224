//! # Feed Differencer
//! Pure, total comparison of two feed documents. No I/O.
//!
//! Items are matched on (title, link). When a key repeats inside one
//! document, occurrences are paired positionally: the k-th old occurrence
//! with the k-th new one.
//!
//! Timestamps compare at whole-second precision, the precision the XML
//! form keeps.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use metrics::{counter, histogram};
use serde::Serialize;

use crate::feed::xml::format_timestamp;
use crate::feed::{FeedChannel, FeedDocument, FeedItem, ItemKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelField {
    Title,
    Link,
    Description,
    LastBuildDate,
    Language,
}

impl fmt::Display for ChannelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelField::Title => "title",
            ChannelField::Link => "link",
            ChannelField::Description => "description",
            ChannelField::LastBuildDate => "lastBuildDate",
            ChannelField::Language => "language",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelChange {
    pub field: ChannelField,
    pub old: String,
    pub new: String,
}

/// One differing sub-field of a matched item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "field", rename_all = "camelCase")]
pub enum ItemFieldChange {
    PubDate { old: String, new: String },
    /// Categories compare as a set; reordering alone is not a change.
    Categories { added: Vec<String>, removed: Vec<String> },
    Description { old: String, new: String },
    Summary { old: String, new: String },
    AffectedUsers { old: String, new: String },
    Metric {
        name: String,
        old: Option<String>,
        new: Option<String>,
    },
}

impl fmt::Display for ItemFieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemFieldChange::PubDate { old, new } => write!(f, "pubDate: {old} -> {new}"),
            ItemFieldChange::Categories { added, removed } => {
                write!(f, "categories: +{:?} -{:?}", added, removed)
            }
            ItemFieldChange::Description { old, new } => {
                write!(f, "description: {old:?} -> {new:?}")
            }
            ItemFieldChange::Summary { old, new } => {
                write!(f, "impactAssessment.summary: {old:?} -> {new:?}")
            }
            ItemFieldChange::AffectedUsers { old, new } => {
                write!(f, "impactAssessment.affectedUsers: {old} -> {new}")
            }
            ItemFieldChange::Metric { name, old, new } => write!(
                f,
                "metric {name}: {} -> {}",
                old.as_deref().unwrap_or("(none)"),
                new.as_deref().unwrap_or("(none)")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemChange {
    pub key: ItemKey,
    pub changes: Vec<ItemFieldChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDiff {
    pub channel_changes: Vec<ChannelChange>,
    pub added_items: Vec<FeedItem>,
    pub removed_items: Vec<FeedItem>,
    pub changed_items: Vec<ItemChange>,
}

impl FeedDiff {
    pub fn is_empty(&self) -> bool {
        self.channel_changes.is_empty()
            && self.added_items.is_empty()
            && self.removed_items.is_empty()
            && self.changed_items.is_empty()
    }
}

impl fmt::Display for FeedDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No differences.");
        }
        if !self.channel_changes.is_empty() {
            writeln!(f, "Channel:")?;
            for c in &self.channel_changes {
                writeln!(f, "  {}: {:?} -> {:?}", c.field, c.old, c.new)?;
            }
        }
        writeln!(f, "Added items: {}", self.added_items.len())?;
        for it in &self.added_items {
            writeln!(f, "  + {}", it.key())?;
        }
        writeln!(f, "Removed items: {}", self.removed_items.len())?;
        for it in &self.removed_items {
            writeln!(f, "  - {}", it.key())?;
        }
        writeln!(f, "Modified items: {}", self.changed_items.len())?;
        for c in &self.changed_items {
            writeln!(f, "  ~ {}", c.key)?;
            for ch in &c.changes {
                writeln!(f, "      {ch}")?;
            }
        }
        Ok(())
    }
}

pub fn diff(old: &FeedDocument, new: &FeedDocument) -> FeedDiff {
    let t0 = std::time::Instant::now();

    let channel_changes = diff_channel(&old.channel, &new.channel);

    // Queue of unmatched old positions per key, in document order.
    let mut old_by_key: HashMap<ItemKey, VecDeque<usize>> = HashMap::new();
    for (i, it) in old.items.iter().enumerate() {
        old_by_key.entry(it.key()).or_default().push_back(i);
    }

    let mut matched_old = vec![false; old.items.len()];
    let mut added_items = Vec::new();
    let mut changed_items = Vec::new();

    for it in &new.items {
        let paired = old_by_key.get_mut(&it.key()).and_then(|q| q.pop_front());
        match paired {
            Some(i) => {
                matched_old[i] = true;
                let changes = diff_item(&old.items[i], it);
                if !changes.is_empty() {
                    changed_items.push(ItemChange {
                        key: it.key(),
                        changes,
                    });
                }
            }
            None => added_items.push(it.clone()),
        }
    }

    let removed_items = old
        .items
        .iter()
        .zip(matched_old)
        .filter(|(_, m)| !m)
        .map(|(it, _)| it.clone())
        .collect();

    counter!("atf_diff_runs_total").increment(1);
    histogram!("atf_diff_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

    FeedDiff {
        channel_changes,
        added_items,
        removed_items,
        changed_items,
    }
}

fn diff_channel(old: &FeedChannel, new: &FeedChannel) -> Vec<ChannelChange> {
    let pairs = [
        (ChannelField::Title, old.title.clone(), new.title.clone()),
        (ChannelField::Link, old.link.clone(), new.link.clone()),
        (
            ChannelField::Description,
            old.description.clone(),
            new.description.clone(),
        ),
        (
            ChannelField::LastBuildDate,
            format_timestamp(&old.last_build_date),
            format_timestamp(&new.last_build_date),
        ),
        (ChannelField::Language, old.language.clone(), new.language.clone()),
    ];
    pairs
        .into_iter()
        .filter(|(_, o, n)| o != n)
        .map(|(field, old, new)| ChannelChange { field, old, new })
        .collect()
}

fn diff_item(old: &FeedItem, new: &FeedItem) -> Vec<ItemFieldChange> {
    let mut out = Vec::new();

    let (old_date, new_date) = (format_timestamp(&old.pub_date), format_timestamp(&new.pub_date));
    if old_date != new_date {
        out.push(ItemFieldChange::PubDate {
            old: old_date,
            new: new_date,
        });
    }

    let old_cats: BTreeSet<&str> = old.categories.iter().map(String::as_str).collect();
    let new_cats: BTreeSet<&str> = new.categories.iter().map(String::as_str).collect();
    if old_cats != new_cats {
        out.push(ItemFieldChange::Categories {
            added: new_cats.difference(&old_cats).map(|s| s.to_string()).collect(),
            removed: old_cats.difference(&new_cats).map(|s| s.to_string()).collect(),
        });
    }

    if old.description != new.description {
        out.push(ItemFieldChange::Description {
            old: old.description.clone(),
            new: new.description.clone(),
        });
    }

    let (oi, ni) = (&old.impact_assessment, &new.impact_assessment);
    if oi.summary != ni.summary {
        out.push(ItemFieldChange::Summary {
            old: oi.summary.clone(),
            new: ni.summary.clone(),
        });
    }
    if oi.affected_users != ni.affected_users {
        out.push(ItemFieldChange::AffectedUsers {
            old: oi.affected_users.clone(),
            new: ni.affected_users.clone(),
        });
    }

    let names: BTreeSet<&String> = oi.metrics.keys().chain(ni.metrics.keys()).collect();
    for name in names {
        let (o, n) = (oi.metrics.get(name), ni.metrics.get(name));
        if o != n {
            out.push(ItemFieldChange::Metric {
                name: name.clone(),
                old: o.cloned(),
                new: n.cloned(),
            });
        }
    }

    out
}
