use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::repo::{self, Pool};
use crate::model::{GroupDivider, Item};

/// Persistent side of a sync pass. Every mutating call is one transaction.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn upsert_item(&self, item: &Item) -> Result<()>;

    async fn upsert_divider(&self, divider: &GroupDivider) -> Result<()>;

    async fn fetch_item(&self, id: &str) -> Result<Option<Item>>;

    async fn fetch_active_items(&self, divider_id: Option<&str>) -> Result<Vec<Item>>;

    async fn fetch_dividers(&self, title_contains: Option<&str>) -> Result<Vec<GroupDivider>>;

    async fn touch_item(
        &self,
        id: &str,
        watermark: DateTime<Utc>,
        feed_position: i64,
    ) -> Result<Option<Item>>;

    async fn set_image_url(&self, id: &str, image_url: &str) -> Result<Option<Item>>;

    async fn soft_delete_stale(
        &self,
        watermark: DateTime<Utc>,
        exempt: &[String],
    ) -> Result<Vec<Item>>;

    async fn purge_deleted(&self) -> Result<u64>;

    async fn set_favorite(&self, id: &str, is_favorite: bool) -> Result<bool>;
}

/// SQLite-backed store. Writes from concurrent sync tasks are funnelled
/// through one lock so transactions never contend at the SQLite level.
#[derive(Debug)]
pub struct SqliteStore {
    pool: Pool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn upsert_item(&self, item: &Item) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        repo::upsert_item(&self.pool, item).await
    }

    async fn upsert_divider(&self, divider: &GroupDivider) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        repo::upsert_divider(&self.pool, divider).await
    }

    async fn fetch_item(&self, id: &str) -> Result<Option<Item>> {
        repo::fetch_item(&self.pool, id).await
    }

    async fn fetch_active_items(&self, divider_id: Option<&str>) -> Result<Vec<Item>> {
        repo::fetch_active_items(&self.pool, divider_id).await
    }

    async fn fetch_dividers(&self, title_contains: Option<&str>) -> Result<Vec<GroupDivider>> {
        repo::fetch_dividers(&self.pool, title_contains).await
    }

    async fn touch_item(
        &self,
        id: &str,
        watermark: DateTime<Utc>,
        feed_position: i64,
    ) -> Result<Option<Item>> {
        let _guard = self.write_lock.lock().await;
        repo::touch_item(&self.pool, id, watermark, feed_position).await
    }

    async fn set_image_url(&self, id: &str, image_url: &str) -> Result<Option<Item>> {
        let _guard = self.write_lock.lock().await;
        repo::set_image_url(&self.pool, id, image_url).await
    }

    async fn soft_delete_stale(
        &self,
        watermark: DateTime<Utc>,
        exempt: &[String],
    ) -> Result<Vec<Item>> {
        let _guard = self.write_lock.lock().await;
        repo::soft_delete_stale(&self.pool, watermark, exempt).await
    }

    async fn purge_deleted(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        repo::purge_deleted(&self.pool).await
    }

    async fn set_favorite(&self, id: &str, is_favorite: bool) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        repo::set_favorite(&self.pool, id, is_favorite).await
    }
}
