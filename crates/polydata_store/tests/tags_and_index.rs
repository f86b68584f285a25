use std::collections::BTreeMap;
use std::time::Duration;

use polydata_store::{Poly, PolyQuery, PolyResult, PolyStorage, TAGS_KEY};
use serde_json::json;
use tempfile::tempdir;
use tokio::time::sleep;

async fn open_store(base: &std::path::Path) -> PolyResult<PolyStorage> {
    PolyStorage::connect_sqlite(&base.join("polydata.db")).await
}

fn tagged(id: &str, tags: &[&str]) -> Poly {
    Poly::new(id).with("1", "2").with(TAGS_KEY, json!(tags))
}

#[tokio::test]
async fn tag_counts_accumulate_across_documents() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    store.persist("main", tagged("id1", &["tag1", "tag2"])).await?;
    store
        .persist("main", tagged("id2", &["tag1", "tag2", "tag3"]))
        .await?;

    let tags = store.fetch_tags("main").await?;
    assert_eq!(tags.get("tag1"), Some(&json!(2)));
    assert_eq!(tags.get("tag2"), Some(&json!(2)));
    assert_eq!(tags.get("tag3"), Some(&json!(1)));
    store.close().await
}

#[tokio::test]
async fn fetch_tags_of_fresh_container_is_an_empty_mapping() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    let tags = store.fetch_tags("empty").await?;
    assert_eq!(tags.id(), Some("tags"));
    assert_eq!(tags.len(), 1);
    store.close().await
}

#[tokio::test]
async fn repersisting_does_not_double_count() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    store.persist("main", tagged("id1", &["tag1"])).await?;
    store.persist("main", tagged("id1", &["tag1"])).await?;

    let tags = store.fetch_tags("main").await?;
    assert_eq!(tags.get("tag1"), Some(&json!(1)));
    store.close().await
}

#[tokio::test]
async fn retagging_moves_counts_and_index_entries() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    store.persist("main", tagged("id1", &["old", "kept"])).await?;
    store.persist("main", tagged("id1", &["kept", "new"])).await?;

    let tags = store.fetch_tags("main").await?;
    assert_eq!(tags.get("old"), None);
    assert_eq!(tags.get("kept"), Some(&json!(1)));
    assert_eq!(tags.get("new"), Some(&json!(1)));

    let stale = store
        .query_index("main", &PolyQuery::new().tag("old"))
        .await?;
    assert!(stale.is_empty());
    assert_eq!(stale.count, 0);

    let current = store
        .query_index("main", &PolyQuery::new().tag("new"))
        .await?;
    assert_eq!(current.len(), 1);
    assert_eq!(current.list[0].id(), Some("id1"));
    store.close().await
}

#[tokio::test]
async fn removing_a_document_repairs_counts_and_index() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    store.persist("main", tagged("id1", &["shared"])).await?;
    store.persist("main", tagged("id2", &["shared"])).await?;
    assert_eq!(
        store.fetch_tags("main").await?.get("shared"),
        Some(&json!(2))
    );

    assert!(store.remove("main", "id1").await?);

    let tags = store.fetch_tags("main").await?;
    assert_eq!(tags.get("shared"), Some(&json!(1)));

    let listed = store
        .query_index("main", &PolyQuery::new().tag("shared"))
        .await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed.list[0].id(), Some("id2"));

    assert!(store.remove("main", "id2").await?);
    assert_eq!(store.fetch_tags("main").await?.get("shared"), None);
    store.close().await
}

#[tokio::test]
async fn index_tracks_multiple_documents_per_tag() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    for i in 0..10 {
        let poly = Poly::new(format!("id_{i}"))
            .with("1", "2")
            .with("iteration", i)
            .with(TAGS_KEY, json!([format!("tag{i}"), format!("tag{}", i + 1)]));
        store.persist("main", poly).await?;
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.fetch_poly_count("main").await?, 10);

    let only = store
        .query_index("main", &PolyQuery::new().tag("tag0").item_per_page(10))
        .await?;
    assert_eq!(only.len(), 1);
    assert_eq!(only.list[0].id(), Some("id_0"));
    assert_eq!(only.list[0].get("iteration"), Some(&json!(0)));
    assert_eq!(only.list[0].get("1"), Some(&json!("2")));

    // tag1 is carried by id_0 and id_1; newest entry first.
    let pair = store
        .query_index("main", &PolyQuery::new().tag("tag1").item_per_page(10))
        .await?;
    assert_eq!(pair.len(), 2);
    assert_eq!(pair.count, 2);
    assert_eq!(pair.list[0].id(), Some("id_1"));
    assert_eq!(pair.list[1].id(), Some("id_0"));
    store.close().await
}

#[tokio::test]
async fn index_query_without_tag_is_invalid() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    let err = store
        .query_index("main", &PolyQuery::new())
        .await
        .expect_err("tag required");
    assert!(err.to_string().contains("requires a tag"));
    store.close().await
}

#[tokio::test]
async fn tags_with_wildcard_characters_do_not_cross_match() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    store.persist("main", tagged("id1", &["100%"])).await?;
    store.persist("main", tagged("id2", &["100_"])).await?;

    let percent = store
        .query_index("main", &PolyQuery::new().tag("100%"))
        .await?;
    assert_eq!(percent.len(), 1);
    assert_eq!(percent.list[0].id(), Some("id1"));

    let underscore = store
        .query_index("main", &PolyQuery::new().tag("100_"))
        .await?;
    assert_eq!(underscore.len(), 1);
    assert_eq!(underscore.list[0].id(), Some("id2"));
    store.close().await
}

#[tokio::test]
async fn slashes_in_tags_and_ids_do_not_collide() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    // (tag "a/b", doc "c") and (tag "a", doc "b/c") must stay distinct pairs.
    store.persist("main", tagged("c", &["a/b"])).await?;
    store.persist("main", tagged("b/c", &["a"])).await?;

    let slashed = store
        .query_index("main", &PolyQuery::new().tag("a/b"))
        .await?;
    assert_eq!(slashed.len(), 1);
    assert_eq!(slashed.list[0].id(), Some("c"));

    let plain = store.query_index("main", &PolyQuery::new().tag("a")).await?;
    assert_eq!(plain.len(), 1);
    assert_eq!(plain.list[0].id(), Some("b/c"));

    // Removing one pair leaves the other's entry in place.
    assert!(store.remove("main", "b/c").await?);
    let slashed = store
        .query_index("main", &PolyQuery::new().tag("a/b"))
        .await?;
    assert_eq!(slashed.len(), 1);
    assert_eq!(slashed.list[0].id(), Some("c"));
    store.close().await
}

#[tokio::test]
async fn non_numeric_count_is_reset_not_compounded() -> PolyResult<()> {
    use polydata_store::RowKind;

    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    // A corrupted aggregate with a string where a count belongs.
    store
        .upsert_raw(
            RowKind::Polymap,
            "main",
            "tags",
            Poly::new("tags").with("tag1", "weird"),
        )
        .await?;

    store.persist("main", tagged("id1", &["tag1"])).await?;
    let tags = store.fetch_tags("main").await?;
    assert_eq!(tags.get("tag1"), Some(&json!(1)));

    assert!(store.remove("main", "id1").await?);
    assert_eq!(store.fetch_tags("main").await?.get("tag1"), None);
    store.close().await
}

#[tokio::test]
async fn manual_index_entries_use_the_composite_key() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    store.persist("main", Poly::new("doc1")).await?;
    let dimensions = BTreeMap::from([("tags".to_string(), "manual".to_string())]);
    store
        .persist_index("main", &dimensions, Poly::new("doc1"))
        .await?;

    let listed = store
        .query_index("main", &PolyQuery::new().tag("manual"))
        .await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed.list[0].id(), Some("doc1"));

    assert!(store.remove_index("main", &dimensions, "doc1").await?);
    let listed = store
        .query_index("main", &PolyQuery::new().tag("manual"))
        .await?;
    assert!(listed.is_empty());
    store.close().await
}

#[tokio::test]
async fn stale_reference_is_skipped_not_an_error() -> PolyResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;

    // An index entry pointing at a document that was never persisted.
    let dimensions = BTreeMap::from([("tags".to_string(), "dangling".to_string())]);
    store
        .persist_index("main", &dimensions, Poly::new("ghost"))
        .await?;

    let listed = store
        .query_index("main", &PolyQuery::new().tag("dangling"))
        .await?;
    assert!(listed.is_empty());
    assert_eq!(listed.count, 1);
    store.close().await
}
