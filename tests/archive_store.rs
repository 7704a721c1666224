// tests/archive_store.rs
use std::path::Path;
use std::sync::Arc;

use atf_feed::diff::ItemFieldChange;
use atf_feed::feed::xml::read_feed_file;
use atf_feed::{diff, ArchiveStore, AtfError, FeedDocument, FsBackend, ItemKey, MemoryBackend};

fn fixture(name: &str) -> FeedDocument {
    let p = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    read_feed_file(&p).expect("fixture should parse")
}

#[tokio::test]
async fn second_archive_of_same_version_is_rejected() {
    let store = ArchiveStore::new(MemoryBackend::new());
    let v1 = fixture("feed_v1.xml");
    store.archive("corp-a", &v1, "1.0").await.unwrap();

    let err = store
        .archive("corp-a", &fixture("feed_v2.xml"), "1.0")
        .await
        .unwrap_err();
    assert!(matches!(err, AtfError::DuplicateVersion { .. }), "got {err:?}");

    // The first snapshot is untouched.
    let back = store.retrieve("corp-a", "1.0").await.unwrap();
    assert_eq!(back.items, v1.items);
}

#[tokio::test]
async fn history_is_ordered_by_archival_not_by_label() {
    let store = ArchiveStore::new(MemoryBackend::new());
    let doc = fixture("feed_v1.xml");
    // Labels that would sort differently as strings.
    for v in ["1.9", "1.10", "1.2"] {
        store.archive("corp-a", &doc, v).await.unwrap();
    }
    let versions: Vec<String> = store
        .history("corp-a")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.version)
        .collect();
    assert_eq!(versions, ["1.9", "1.10", "1.2"]);
    assert_eq!(store.latest("corp-a").await.unwrap().version, "1.2");
}

#[tokio::test]
async fn corp_a_adds_z_and_modifies_x() {
    // V1 = {X, Y}; V2 = {X modified, Y, Z}; same channel.
    let v1 = fixture("feed_v1.xml");
    let mut x = v1.items[0].clone();
    x.impact_assessment.affected_users = "40%".into();
    let mut z = v1.items[1].clone();
    z.title = "Z".into();
    z.link = "https://corp-a.example.com/changes/z".into();
    let mut v2 = v1.clone();
    v2.items = vec![x, v1.items[1].clone(), z.clone()];

    let store = ArchiveStore::new(MemoryBackend::new());
    store.archive("corp-a", &v1, "1.0").await.unwrap();
    let e2 = store.archive("corp-a", &v2, "1.1").await.unwrap();

    let versions: Vec<String> = store
        .history("corp-a")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.version)
        .collect();
    assert_eq!(versions, ["1.0", "1.1"]);
    assert_eq!(e2.prior_version.as_deref(), Some("1.0"));

    let d = diff(
        &store.retrieve("corp-a", "1.0").await.unwrap(),
        &store.retrieve("corp-a", "1.1").await.unwrap(),
    );
    assert!(d.channel_changes.is_empty());
    assert!(d.removed_items.is_empty());
    assert_eq!(d.added_items, vec![z]);
    assert_eq!(d.changed_items.len(), 1);
    assert_eq!(d.changed_items[0].key, ItemKey::new(&v1.items[0].title, &v1.items[0].link));
    assert_eq!(
        d.changed_items[0].changes,
        vec![ItemFieldChange::AffectedUsers {
            old: "25%".into(),
            new: "40%".into(),
        }]
    );
}

#[tokio::test]
async fn snapshot_root_is_format_version_whatever_the_label() {
    let store = ArchiveStore::new(MemoryBackend::new());
    store
        .archive("corp-a", &fixture("feed_v1.xml"), "2.3")
        .await
        .unwrap();
    let xml = String::from_utf8(store.snapshot_bytes("corp-a", "2.3").await.unwrap()).unwrap();
    assert!(
        xml.contains(r#"<atf xmlns="https://www.algorithmictransparency.gov/atf" version="1.0">"#),
        "{xml}"
    );
}

#[tokio::test]
async fn unknown_feed_and_version_are_not_found() {
    let store = ArchiveStore::new(MemoryBackend::new());
    assert!(store.latest("nobody").await.unwrap_err().is_not_found());
    store
        .archive("corp-a", &fixture("feed_v1.xml"), "1.0")
        .await
        .unwrap();
    assert!(store.retrieve("corp-a", "2.0").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn filesystem_archive_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let v1 = fixture("feed_v1.xml");
    let checksum = {
        let store = ArchiveStore::new(FsBackend::new(tmp.path()));
        store.archive("corp-a", &v1, "1.0").await.unwrap().checksum
    };

    assert!(tmp.path().join("corp-a/1.0.xml").is_file());
    assert!(tmp.path().join("corp-a/1.0.meta.json").is_file());

    let store = ArchiveStore::new(FsBackend::new(tmp.path()));
    let entry = store.entry("corp-a", "1.0").await.unwrap();
    assert_eq!(entry.checksum, checksum);
    let back = store.retrieve("corp-a", "1.0").await.unwrap();
    assert_eq!(back.checksum().unwrap(), checksum);
    assert_eq!(back.channel, v1.channel);
}

#[tokio::test]
async fn concurrent_archives_of_one_version_commit_once() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(ArchiveStore::new(FsBackend::new(tmp.path())));
    let doc = fixture("feed_v1.xml");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let doc = doc.clone();
        tasks.push(tokio::spawn(async move {
            store.archive("corp-a", &doc, "1.0").await
        }));
    }

    let mut ok = 0;
    let mut dup = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(_) => ok += 1,
            Err(AtfError::DuplicateVersion { .. }) => dup += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, dup), (1, 7));
    assert_eq!(store.history("corp-a").await.unwrap().len(), 1);
}

#[tokio::test]
async fn search_filters_across_feeds() {
    let store = ArchiveStore::new(MemoryBackend::new());
    let v1 = fixture("feed_v1.xml");
    let v2 = fixture("feed_v2.xml");
    store.archive("corp-a", &v1, "1.0").await.unwrap();
    store.archive("corp-a", &v2, "1.1").await.unwrap();
    store.archive("corp-b", &v1, "1.0").await.unwrap();
    store.archive("corp-b", &v1, "1.1").await.unwrap();

    assert_eq!(store.feeds().await.unwrap(), ["corp-a", "corp-b"]);

    let same_as_v1 = v1.checksum().unwrap();
    let hits: Vec<(String, String)> = store
        .search(|e| e.checksum == same_as_v1)
        .await
        .unwrap()
        .map(|e| (e.feed_id, e.version))
        .collect();
    assert_eq!(
        hits,
        [
            ("corp-a".to_string(), "1.0".to_string()),
            ("corp-b".to_string(), "1.0".to_string()),
            ("corp-b".to_string(), "1.1".to_string()),
        ]
    );

    let dups: Vec<_> = store
        .search(|e| e.duplicate_of.is_some())
        .await
        .unwrap()
        .collect();
    assert_eq!(dups.len(), 1);
    assert_eq!(dups[0].duplicate_of.as_deref(), Some("1.0"));
}
