//! Row models used by repositories.
//!
//! These mirror table columns; conversion into domain types happens here so
//! the SQL functions stay mechanical.

use chrono::{DateTime, Utc};

use crate::model::{GroupDivider, Item};

pub const ITEM_COLUMNS: &str = "id, title, description, description_formatted, summary, divider_id, \
     last_seen_at, feed_position, is_deleted, is_favorite, image_endpoint, image_url";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub description_formatted: String,
    pub summary: String,
    pub divider_id: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub feed_position: i64,
    pub is_deleted: bool,
    pub is_favorite: bool,
    pub image_endpoint: String,
    pub image_url: String,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            title: row.title,
            description: row.description,
            description_formatted: row.description_formatted,
            summary: row.summary,
            divider_id: row.divider_id,
            last_seen_at: row.last_seen_at,
            feed_position: row.feed_position,
            is_deleted: row.is_deleted,
            is_favorite: row.is_favorite,
            image_endpoint: row.image_endpoint,
            image_url: row.image_url,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DividerRow {
    pub id: String,
    pub title: String,
}

impl From<DividerRow> for GroupDivider {
    fn from(row: DividerRow) -> Self {
        GroupDivider {
            id: row.id,
            title: row.title,
        }
    }
}
