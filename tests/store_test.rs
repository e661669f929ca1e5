use chrono::{Duration, TimeZone, Utc};
use skylark_sync::db::{self, LocalStore, SqliteStore};
use skylark_sync::model::{GroupDivider, Item};

async fn setup_store() -> SqliteStore {
    let pool = db::init_memory_pool().await.unwrap();
    SqliteStore::new(pool)
}

fn item(id: &str, position: i64) -> Item {
    Item {
        id: id.into(),
        title: format!("title {id}"),
        feed_position: position,
        ..Default::default()
    }
}

#[tokio::test]
async fn upsert_is_idempotent_and_keeps_favorite() {
    let store = setup_store().await;
    store.upsert_item(&item("a", 0)).await.unwrap();
    assert!(store.set_favorite("a", true).await.unwrap());

    let mut changed = item("a", 3);
    changed.title = "renamed".into();
    store.upsert_item(&changed).await.unwrap();
    store.upsert_item(&changed).await.unwrap();

    let all = store.fetch_active_items(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "renamed");
    assert_eq!(all[0].feed_position, 3);
    assert!(all[0].is_favorite);
}

#[tokio::test]
async fn favorite_on_unknown_id_reports_false() {
    let store = setup_store().await;
    assert!(!store.set_favorite("ghost", true).await.unwrap());
}

#[tokio::test]
async fn active_items_follow_feed_position() {
    let store = setup_store().await;
    store.upsert_item(&item("late", 5)).await.unwrap();
    store.upsert_item(&item("early", 1)).await.unwrap();
    let ids: Vec<String> = store
        .fetch_active_items(None)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec!["early", "late"]);
}

#[tokio::test]
async fn stale_items_are_soft_deleted_once() {
    let store = setup_store().await;
    let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = old + Duration::minutes(5);

    for (pos, id) in ["a", "b", "c"].into_iter().enumerate() {
        let mut it = item(id, pos as i64);
        it.last_seen_at = Some(old);
        store.upsert_item(&it).await.unwrap();
    }
    store.touch_item("a", now, 0).await.unwrap().unwrap();

    let deleted = store.soft_delete_stale(now, &["c".to_string()]).await.unwrap();
    let ids: Vec<&str> = deleted.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["b"]);
    assert!(deleted[0].is_deleted);

    let again = store.soft_delete_stale(now, &["c".to_string()]).await.unwrap();
    assert!(again.is_empty());

    let b = store.fetch_item("b").await.unwrap().unwrap();
    assert!(b.is_deleted);
    let active: Vec<String> = store
        .fetch_active_items(None)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(active, vec!["a", "c"]);
}

#[tokio::test]
async fn touch_revives_and_reports_unknown_ids() {
    let store = setup_store().await;
    let then = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    store.upsert_item(&item("a", 0)).await.unwrap();
    store.soft_delete_stale(then, &[]).await.unwrap();
    assert!(store.fetch_active_items(None).await.unwrap().is_empty());

    let revived = store.touch_item("a", then, 7).await.unwrap().unwrap();
    assert!(!revived.is_deleted);
    assert_eq!(revived.feed_position, 7);
    assert_eq!(revived.last_seen_at, Some(then));

    assert!(store.touch_item("nope", then, 0).await.unwrap().is_none());
}

#[tokio::test]
async fn image_write_skips_soft_deleted_rows() {
    let store = setup_store().await;
    let mut it = item("a", 0);
    it.image_endpoint = "/api/images/1".into();
    store.upsert_item(&it).await.unwrap();

    let updated = store
        .set_image_url("a", "https://cdn/1.png")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.image_url, "https://cdn/1.png");
    assert!(updated.image_endpoint.is_empty());

    let mut gone = item("b", 1);
    gone.image_endpoint = "/api/images/2".into();
    store.upsert_item(&gone).await.unwrap();
    let now = Utc::now();
    store.touch_item("a", now, 0).await.unwrap();
    store.soft_delete_stale(now, &[]).await.unwrap();

    assert!(store
        .set_image_url("b", "https://cdn/2.png")
        .await
        .unwrap()
        .is_none());
    let b = store.fetch_item("b").await.unwrap().unwrap();
    assert!(b.image_url.is_empty());
}

#[tokio::test]
async fn purge_removes_only_deleted_rows() {
    let store = setup_store().await;
    let now = Utc::now();
    store.upsert_item(&item("keep", 0)).await.unwrap();
    store.upsert_item(&item("drop", 1)).await.unwrap();
    store.touch_item("keep", now, 0).await.unwrap();
    store.soft_delete_stale(now, &[]).await.unwrap();

    assert!(store.fetch_item("drop").await.unwrap().unwrap().is_deleted);
    assert_eq!(store.purge_deleted().await.unwrap(), 1);
    assert_eq!(store.purge_deleted().await.unwrap(), 0);
    assert!(store.fetch_item("drop").await.unwrap().is_none());
    assert!(store.fetch_item("keep").await.unwrap().is_some());
}

#[tokio::test]
async fn dividers_filter_by_title_and_items_by_divider() {
    let store = setup_store().await;
    for (id, title) in [("d1", "Featured Films"), ("d2", "Documentaries")] {
        store
            .upsert_divider(&GroupDivider {
                id: id.into(),
                title: title.into(),
            })
            .await
            .unwrap();
    }
    store
        .upsert_divider(&GroupDivider {
            id: "d1".into(),
            title: "Featured".into(),
        })
        .await
        .unwrap();

    let all = store.fetch_dividers(None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].title, "Featured");

    let docs = store.fetch_dividers(Some("docu")).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "d2");

    let mut a = item("a", 0);
    a.divider_id = Some("d1".into());
    let mut b = item("b", 1);
    b.divider_id = Some("d2".into());
    store.upsert_item(&a).await.unwrap();
    store.upsert_item(&b).await.unwrap();

    let under_d2 = store.fetch_active_items(Some("d2")).await.unwrap();
    assert_eq!(under_d2.len(), 1);
    assert_eq!(under_d2[0].id, "b");
}
