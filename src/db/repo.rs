use super::model::{DividerRow, ItemRow, ITEM_COLUMNS};
use crate::model::{GroupDivider, Item};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {normalized}"))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Single-connection in-memory database with migrations applied.
pub async fn init_memory_pool() -> Result<Pool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure its parent
/// directory exists. In-memory and non-sqlite URLs are returned unchanged.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// Item operations

/// Insert or fully replace an item's synced fields. `is_favorite` is a user
/// flag and survives the update.
#[instrument(skip_all, fields(id = %item.id))]
pub async fn upsert_item(pool: &Pool, item: &Item) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"INSERT INTO items (id, title, description, description_formatted, summary, divider_id,
                              last_seen_at, feed_position, is_deleted, is_favorite, image_endpoint, image_url)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
               title = excluded.title,
               description = excluded.description,
               description_formatted = excluded.description_formatted,
               summary = excluded.summary,
               divider_id = excluded.divider_id,
               last_seen_at = excluded.last_seen_at,
               feed_position = excluded.feed_position,
               is_deleted = excluded.is_deleted,
               image_endpoint = excluded.image_endpoint,
               image_url = excluded.image_url"#,
    )
    .bind(&item.id)
    .bind(&item.title)
    .bind(&item.description)
    .bind(&item.description_formatted)
    .bind(&item.summary)
    .bind(&item.divider_id)
    .bind(item.last_seen_at)
    .bind(item.feed_position)
    .bind(item.is_deleted)
    .bind(item.is_favorite)
    .bind(&item.image_endpoint)
    .bind(&item.image_url)
    .execute(&mut *tx)
    .await
    .context("failed to upsert item")?;
    tx.commit().await?;
    Ok(())
}

/// Look up an item by id, soft-deleted or not.
#[instrument(skip_all)]
pub async fn fetch_item(pool: &Pool, id: &str) -> Result<Option<Item>> {
    let row = sqlx::query_as::<_, ItemRow>(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(Item::from))
}

/// Active (not soft-deleted) items in feed order, optionally limited to one divider.
#[instrument(skip_all)]
pub async fn fetch_active_items(pool: &Pool, divider_id: Option<&str>) -> Result<Vec<Item>> {
    let rows = match divider_id {
        Some(divider_id) => {
            sqlx::query_as::<_, ItemRow>(&format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE is_deleted = 0 AND divider_id = ? \
                 ORDER BY feed_position ASC, rowid ASC"
            ))
            .bind(divider_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, ItemRow>(&format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE is_deleted = 0 \
                 ORDER BY feed_position ASC, rowid ASC"
            ))
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.into_iter().map(Item::from).collect())
}

/// Mark an item as observed by the pass with `watermark`. Revives a
/// soft-deleted row. Returns the updated row, or `None` if the id is unknown.
#[instrument(skip_all, fields(id = %id))]
pub async fn touch_item(
    pool: &Pool,
    id: &str,
    watermark: DateTime<Utc>,
    feed_position: i64,
) -> Result<Option<Item>> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, ItemRow>(&format!(
        "UPDATE items SET last_seen_at = ?, feed_position = ?, is_deleted = 0 \
         WHERE id = ? RETURNING {ITEM_COLUMNS}"
    ))
    .bind(watermark)
    .bind(feed_position)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to update item watermark")?;
    tx.commit().await?;
    Ok(row.map(Item::from))
}

/// Store a resolved image URL and clear the endpoint it came from. Rows that
/// are soft-deleted (or gone) are left alone and `None` is returned.
#[instrument(skip_all, fields(id = %id))]
pub async fn set_image_url(pool: &Pool, id: &str, image_url: &str) -> Result<Option<Item>> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, ItemRow>(&format!(
        "UPDATE items SET image_url = ?, image_endpoint = '' \
         WHERE id = ? AND is_deleted = 0 RETURNING {ITEM_COLUMNS}"
    ))
    .bind(image_url)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to update item image")?;
    tx.commit().await?;
    Ok(row.map(Item::from))
}

/// Soft-delete every active item whose watermark differs from `watermark`,
/// except the ids in `exempt`. Returns the affected items in feed order.
#[instrument(skip_all)]
pub async fn soft_delete_stale(
    pool: &Pool,
    watermark: DateTime<Utc>,
    exempt: &[String],
) -> Result<Vec<Item>> {
    let mut tx = pool.begin().await?;
    let stale: Vec<ItemRow> = sqlx::query_as(&format!(
        "SELECT {ITEM_COLUMNS} FROM items \
         WHERE is_deleted = 0 AND (last_seen_at IS NULL OR last_seen_at != ?) \
         ORDER BY feed_position ASC, rowid ASC"
    ))
    .bind(watermark)
    .fetch_all(&mut *tx)
    .await?;

    let mut deleted = Vec::with_capacity(stale.len());
    for row in stale {
        if exempt.iter().any(|id| *id == row.id) {
            continue;
        }
        sqlx::query("UPDATE items SET is_deleted = 1 WHERE id = ?")
            .bind(&row.id)
            .execute(&mut *tx)
            .await
            .context("failed to soft-delete item")?;
        let mut item = Item::from(row);
        item.is_deleted = true;
        deleted.push(item);
    }
    tx.commit().await?;
    debug!(count = deleted.len(), "soft-deleted stale items");
    Ok(deleted)
}

/// Physically remove soft-deleted items. Idempotent.
#[instrument(skip_all)]
pub async fn purge_deleted(pool: &Pool) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let res = sqlx::query("DELETE FROM items WHERE is_deleted = 1")
        .execute(&mut *tx)
        .await
        .context("failed to purge deleted items")?;
    tx.commit().await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all, fields(id = %id))]
pub async fn set_favorite(pool: &Pool, id: &str, is_favorite: bool) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let res = sqlx::query("UPDATE items SET is_favorite = ? WHERE id = ?")
        .bind(is_favorite)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("failed to update favorite")?;
    tx.commit().await?;
    Ok(res.rows_affected() > 0)
}

// Divider operations

#[instrument(skip_all, fields(id = %divider.id))]
pub async fn upsert_divider(pool: &Pool, divider: &GroupDivider) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO dividers (id, title) VALUES (?, ?) \
         ON CONFLICT(id) DO UPDATE SET title = excluded.title",
    )
    .bind(&divider.id)
    .bind(&divider.title)
    .execute(&mut *tx)
    .await
    .context("failed to upsert divider")?;
    tx.commit().await?;
    Ok(())
}

/// Dividers in first-seen order, optionally filtered by a title substring.
#[instrument(skip_all)]
pub async fn fetch_dividers(pool: &Pool, title_contains: Option<&str>) -> Result<Vec<GroupDivider>> {
    let rows: Vec<DividerRow> = match title_contains {
        Some(needle) => {
            sqlx::query_as("SELECT id, title FROM dividers WHERE title LIKE ? ORDER BY rowid ASC")
                .bind(format!("%{needle}%"))
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT id, title FROM dividers ORDER BY rowid ASC")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows.into_iter().map(GroupDivider::from).collect())
}
