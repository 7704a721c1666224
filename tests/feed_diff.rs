// tests/feed_diff.rs
use std::path::Path;

use pretty_assertions::assert_eq;

use atf_feed::diff::{ChannelChange, ChannelField, ItemChange, ItemFieldChange};
use atf_feed::feed::xml::read_feed_file;
use atf_feed::{diff, FeedDocument, ItemKey};

fn fixture(name: &str) -> FeedDocument {
    let p = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    read_feed_file(&p).expect("fixture should parse")
}

#[test]
fn feed_compared_with_itself_is_empty() {
    let v1 = fixture("feed_v1.xml");
    let d = diff(&v1, &v1);
    assert!(d.is_empty());
}

#[test]
fn corp_a_week_over_week() {
    let v1 = fixture("feed_v1.xml");
    let v2 = fixture("feed_v2.xml");
    let d = diff(&v1, &v2);

    assert_eq!(
        d.channel_changes,
        vec![ChannelChange {
            field: ChannelField::LastBuildDate,
            old: "2024-03-20T12:00:00Z".into(),
            new: "2024-03-27T12:00:00Z".into(),
        }]
    );

    let added: Vec<ItemKey> = d.added_items.iter().map(|it| it.key()).collect();
    assert_eq!(
        added,
        vec![ItemKey::new(
            "Feed Personalization",
            "https://corp-a.example.com/changes/personalization"
        )]
    );

    let removed: Vec<&str> = d.removed_items.iter().map(|it| it.title.as_str()).collect();
    assert_eq!(removed, vec!["Spam Filter Tuning"]);

    assert_eq!(
        d.changed_items,
        vec![ItemChange {
            key: ItemKey::new(
                "Search Ranking Update",
                "https://corp-a.example.com/changes/search-ranking"
            ),
            changes: vec![ItemFieldChange::AffectedUsers {
                old: "25%".into(),
                new: "30%".into(),
            }],
        }]
    );

    let report = d.to_string();
    assert!(report.contains("Added items: 1"));
    assert!(report.contains("Removed items: 1"));
    assert!(report.contains("impactAssessment.affectedUsers: 25% -> 30%"));
}

#[test]
fn swapping_sides_swaps_added_and_removed() {
    let v1 = fixture("feed_v1.xml");
    let v2 = fixture("feed_v2.xml");
    let forward = diff(&v1, &v2);
    let backward = diff(&v2, &v1);

    assert_eq!(forward.added_items, backward.removed_items);
    assert_eq!(forward.removed_items, backward.added_items);

    let reversed: Vec<ChannelChange> = backward
        .channel_changes
        .iter()
        .map(|c| ChannelChange {
            field: c.field,
            old: c.new.clone(),
            new: c.old.clone(),
        })
        .collect();
    assert!(!forward.channel_changes.is_empty());
    assert_eq!(forward.channel_changes, reversed);

    assert_eq!(forward.changed_items.len(), backward.changed_items.len());
    for (f, b) in forward.changed_items.iter().zip(&backward.changed_items) {
        assert_eq!(f.key, b.key);
        assert_eq!(f.changes.len(), b.changes.len());
    }
}

#[test]
fn diff_serializes_for_machine_consumers() {
    let d = diff(&fixture("feed_v1.xml"), &fixture("feed_v2.xml"));
    let v = serde_json::to_value(&d).unwrap();
    assert_eq!(v["channelChanges"][0]["field"], "lastBuildDate");
    assert_eq!(v["changedItems"][0]["changes"][0]["field"], "affectedUsers");
    assert_eq!(v["addedItems"][0]["impactAssessment"]["affectedUsers"], "60%");
}
