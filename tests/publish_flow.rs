// tests/publish_flow.rs
mod common;

use async_trait::async_trait;
use common::{target, FakePlatform, FixedCompositor};
use reddit_discord_relay::notify::ReactionMarker;
use reddit_discord_relay::publish::Publisher;
use reddit_discord_relay::render::Renderer;
use reddit_discord_relay::tracking::{
    LocalFiles, PublishedPost, RemoteStore, Tracker, TrackingStore,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

struct DownRemote;

#[async_trait]
impl RemoteStore for DownRemote {
    async fn get_ids(&self) -> Option<Vec<String>> {
        None
    }
    async fn insert_batch(&self, _records: &[PublishedPost]) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
}

fn publisher(composite: Option<Vec<u8>>) -> Publisher {
    Publisher::new(Renderer::new(Arc::new(FixedCompositor(composite))))
}

fn tracker(dir: &tempfile::TempDir, remote: Option<Arc<dyn RemoteStore>>) -> Tracker {
    Tracker::new(
        LocalFiles::new(dir.path().join("processed_posts.txt"), dir.path().join("posted_ids.csv")),
        remote,
    )
}

fn items(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(id, blob)| (id.to_string(), blob.to_string()))
        .collect()
}

fn markers() -> Vec<ReactionMarker> {
    vec![
        ReactionMarker::custom("FIRE", "1"),
        ReactionMarker::unicode("🍅"),
    ]
}

#[tokio::test]
async fn publishes_records_and_reacts() {
    let dir = tempfile::tempdir().unwrap();
    let store = tracker(&dir, None);
    let platform = Arc::new(FakePlatform::default());
    let mut published = HashSet::new();

    let batch = items(&[("p1", "**Title** T **Author** A **Link** http://x")]);
    let report = publisher(None)
        .publish(&batch, &target(platform.clone()), &markers(), &mut published, &store)
        .await;

    assert_eq!(report.published.len(), 1);
    assert_eq!(
        report.published[0],
        PublishedPost {
            id: "p1".into(),
            title: "T".into(),
            author: "A".into()
        }
    );
    assert!(published.contains("p1"));
    assert_eq!(platform.posted_titles(), vec!["T"]);
    assert_eq!(platform.reactions.lock().unwrap().len(), 2);

    // round trip through tracking storage
    assert!(store.published_ids().await.contains("p1"));
}

#[tokio::test]
async fn missing_link_is_skipped_never_sent() {
    let dir = tempfile::tempdir().unwrap();
    let store = tracker(&dir, None);
    let platform = Arc::new(FakePlatform::default());
    let mut published = HashSet::new();

    let batch = items(&[
        ("a", "**Title** Only a title"),
        ("b", "**Title** T **Author** A **Text** some self text"),
        ("c", ""),
    ]);
    let report = publisher(None)
        .publish(&batch, &target(platform.clone()), &markers(), &mut published, &store)
        .await;

    assert!(report.published.is_empty());
    assert_eq!(report.unusable.len(), 3);
    assert!(platform.sent.lock().unwrap().is_empty());
    // nothing published → no tracking file written
    assert!(!dir.path().join("posted_ids.csv").exists());
}

#[tokio::test]
async fn already_published_ids_are_not_resent() {
    let dir = tempfile::tempdir().unwrap();
    let store = tracker(&dir, None);
    let platform = Arc::new(FakePlatform::default());
    let mut published: HashSet<String> = ["p1".to_string()].into_iter().collect();

    let batch = items(&[
        ("p1", "**Title** Old **Author** A **Link** http://x"),
        ("p2", "**Title** New **Author** A **Link** http://y"),
    ]);
    let report = publisher(None)
        .publish(&batch, &target(platform.clone()), &markers(), &mut published, &store)
        .await;

    assert_eq!(report.already_published, vec!["p1".to_string()]);
    assert_eq!(platform.posted_titles(), vec!["New"]);
    let settled: Vec<&str> = report.settled().collect();
    assert!(settled.contains(&"p1") && settled.contains(&"p2"));
}

#[tokio::test]
async fn forbidden_send_skips_item_but_not_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = tracker(&dir, None);
    let platform = Arc::new(FakePlatform::default());
    platform.forbid_titles.lock().unwrap().push("Blocked".into());
    let mut published = HashSet::new();

    let batch = items(&[
        ("a", "**Title** Blocked **Author** A **Link** http://x"),
        ("b", "**Title** Fine **Author** A **Link** http://y"),
    ]);
    let report = publisher(None)
        .publish(&batch, &target(platform.clone()), &markers(), &mut published, &store)
        .await;

    assert_eq!(report.failed, vec!["a".to_string()]);
    assert_eq!(report.published.len(), 1);
    assert!(!published.contains("a"));
    // failed sends stay pending
    assert!(!report.settled().any(|id| id == "a"));
}

#[tokio::test]
async fn forbidden_reactions_do_not_block_publishing() {
    let dir = tempfile::tempdir().unwrap();
    let store = tracker(&dir, None);
    let platform = Arc::new(FakePlatform {
        forbid_reactions: true,
        ..Default::default()
    });
    let mut published = HashSet::new();

    let batch = items(&[
        ("a", "**Title** One **Author** A **Link** http://x"),
        ("b", "**Title** Two **Author** A **Link** http://y"),
    ]);
    let report = publisher(None)
        .publish(&batch, &target(platform.clone()), &markers(), &mut published, &store)
        .await;

    assert_eq!(report.published.len(), 2);
    assert!(platform.reactions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn gallery_without_composite_still_sends_shell() {
    let dir = tempfile::tempdir().unwrap();
    let store = tracker(&dir, None);
    let platform = Arc::new(FakePlatform::default());
    let mut published = HashSet::new();

    let batch = items(&[(
        "g",
        "**Title** Gallery **Author** A **Link** http://g **IMAGES** http://a http://b",
    )]);
    publisher(None)
        .publish(&batch, &target(platform.clone()), &[], &mut published, &store)
        .await;

    let sent = platform.sent.lock().unwrap();
    let (_, msg) = &sent[0];
    assert!(msg.attachment.is_none());
    assert!(msg.embed.as_ref().unwrap().image.is_none());
}

#[tokio::test]
async fn gallery_with_composite_attaches_png() {
    let dir = tempfile::tempdir().unwrap();
    let store = tracker(&dir, None);
    let platform = Arc::new(FakePlatform::default());
    let mut published = HashSet::new();

    let batch = items(&[(
        "g",
        "**Title** Gallery **Author** A **Link** http://g **IMAGES** http://a http://b",
    )]);
    publisher(Some(vec![0x89, b'P', b'N', b'G']))
        .publish(&batch, &target(platform.clone()), &[], &mut published, &store)
        .await;

    let sent = platform.sent.lock().unwrap();
    let (_, msg) = &sent[0];
    assert_eq!(msg.attachment.as_ref().unwrap().filename, "combined.png");
    assert_eq!(
        msg.embed.as_ref().unwrap().image.as_ref().unwrap().url,
        "attachment://combined.png"
    );
}

#[tokio::test]
async fn unreachable_remote_falls_back_to_local_csv() {
    let dir = tempfile::tempdir().unwrap();
    let store = tracker(&dir, Some(Arc::new(DownRemote)));
    let platform = Arc::new(FakePlatform::default());
    let mut published = store.published_ids().await;
    assert!(published.is_empty());

    let batch = items(&[("p9", "**Title** T **Author** A **Link** http://x")]);
    let report = publisher(None)
        .publish(&batch, &target(platform.clone()), &[], &mut published, &store)
        .await;
    assert!(!report.persist_failed);

    let csv = std::fs::read_to_string(dir.path().join("posted_ids.csv")).unwrap();
    assert!(csv.starts_with("id,title,author"));
    assert!(csv.contains("p9,T,A"));
    assert!(store.published_ids().await.contains("p9"));
}
