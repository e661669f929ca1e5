//! One-pass reconciliation of the remote feed into the local store.
//!
//! A pass reads the active items, fetches the feed, touches or creates every
//! item it lists (detail and image lookups run concurrently on a `JoinSet`),
//! soft-deletes whatever the feed no longer mentions, and reports the
//! resulting list changes as a [`Diff`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::db::LocalStore;
use crate::gateway::{ContentGateway, GatewayError};
use crate::model::{apply_group_to_item, sanitize_image_url, ContentKind, GroupDivider, Item};
use crate::projector::{Diff, DiffProjector};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync pass is already running")]
    Busy,
    #[error("failed to fetch feed: {0}")]
    FeedFetch(#[from] GatewayError),
    #[error("failed to read local store: {0:#}")]
    Store(anyhow::Error),
    #[error("sync pass exceeded {0:?}")]
    TimedOut(Duration),
}

impl SyncError {
    /// Text suitable for showing to a user.
    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::FeedFetch(err) => err.user_message(),
            _ => "Something went wrong\nPlease try again later",
        }
    }
}

/// Result of a completed pass: the list events and the active sequence they
/// were computed against.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub diff: Diff,
    pub items: Vec<Item>,
}

pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    gateway: Arc<dyn ContentGateway>,
    collection: String,
    projector: Mutex<DiffProjector>,
    running: Mutex<()>,
    generation: Arc<AtomicU64>,
    last_watermark: std::sync::Mutex<Option<DateTime<Utc>>>,
}

/// Identifies one pass to the tasks it spawns. Once the pass ends (or its
/// future is dropped) the ticket stops being current and late writes are
/// skipped.
#[derive(Clone)]
struct PassTicket {
    id: u64,
    generation: Arc<AtomicU64>,
}

impl PassTicket {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.id
    }
}

struct PassGuard {
    ticket: PassTicket,
}

impl PassGuard {
    fn begin(generation: &Arc<AtomicU64>) -> Self {
        let id = generation.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            ticket: PassTicket {
                id,
                generation: Arc::clone(generation),
            },
        }
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        // Only retire ourselves; a newer pass may already own the counter.
        let _ = self.ticket.generation.compare_exchange(
            self.ticket.id,
            self.ticket.id + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

enum TaskOutcome {
    /// A new item was fetched and stored.
    Inserted { ordinal: usize, item: Item },
    /// An image URL was stored for an item.
    ImageResolved { item: Item },
    /// The task gave up on its item; already logged.
    Skipped,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn ContentGateway>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            collection: collection.into(),
            projector: Mutex::new(DiffProjector::new()),
            running: Mutex::new(()),
            generation: Arc::new(AtomicU64::new(0)),
            last_watermark: std::sync::Mutex::new(None),
        }
    }

    /// The mirrored active sequence as of the last pass.
    pub async fn active_items(&self) -> Vec<Item> {
        self.projector.lock().await.items().to_vec()
    }

    /// Run [`sync`](Self::sync) bounded by `timeout`. On expiry the pass is
    /// abandoned: outstanding tasks are aborted and late results discarded.
    pub async fn sync_with_timeout<F>(
        &self,
        timeout: Duration,
        on_loading: F,
    ) -> Result<SyncOutcome, SyncError>
    where
        F: FnOnce(&[Item]) + Send,
    {
        tokio::time::timeout(timeout, self.sync(on_loading))
            .await
            .map_err(|_| SyncError::TimedOut(timeout))?
    }

    /// Run one reconciliation pass. `on_loading` receives the pre-pass
    /// snapshot as soon as it is read, before any network traffic.
    pub async fn sync<F>(&self, on_loading: F) -> Result<SyncOutcome, SyncError>
    where
        F: FnOnce(&[Item]) + Send,
    {
        let _running = self.running.try_lock().map_err(|_| SyncError::Busy)?;
        let pass = PassGuard::begin(&self.generation);
        let span = info_span!("sync_pass", pass_id = %Uuid::new_v4(), collection = %self.collection);
        self.run_pass(&pass.ticket, on_loading).instrument(span).await
    }

    async fn run_pass<F>(&self, ticket: &PassTicket, on_loading: F) -> Result<SyncOutcome, SyncError>
    where
        F: FnOnce(&[Item]) + Send,
    {
        let baseline = self
            .store
            .fetch_active_items(None)
            .await
            .map_err(SyncError::Store)?;
        {
            let mut projector = self.projector.lock().await;
            projector.seed(baseline);
            on_loading(projector.items());
        }

        let feed = self
            .gateway
            .fetch_feed(&self.collection)
            .await
            .map_err(|err| {
                warn!(%err, "feed fetch failed; pass aborted");
                SyncError::FeedFetch(err)
            })?;

        let watermark = self.next_watermark();
        info!(refs = feed.items.len(), %watermark, "processing feed");

        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut exempt: Vec<String> = Vec::new();
        let mut revived: Vec<(usize, Item)> = Vec::new();
        let mut current_divider: Option<String> = None;

        for (ordinal, content) in feed.items.iter().enumerate() {
            match content.kind {
                ContentKind::Divider => {
                    let divider = GroupDivider::from_ref(content);
                    current_divider = match self.store.upsert_divider(&divider).await {
                        Ok(()) => Some(divider.id),
                        Err(err) => {
                            warn!(id = %divider.id, ?err, "failed to store divider");
                            None
                        }
                    };
                }
                ContentKind::Item => {
                    if !seen.insert(content.id.clone()) {
                        debug!(id = %content.id, "duplicate item in feed; ignored");
                        continue;
                    }
                    let existing = match self.store.fetch_item(&content.id).await {
                        Ok(existing) => existing,
                        Err(err) => {
                            warn!(id = %content.id, ?err, "failed to read item; keeping old state");
                            exempt.push(content.id.clone());
                            continue;
                        }
                    };
                    match existing {
                        Some(existing) => {
                            let touched = self
                                .store
                                .touch_item(&content.id, watermark, ordinal as i64)
                                .await;
                            match touched {
                                Ok(Some(item)) => {
                                    if item.needs_image_resolution() {
                                        self.spawn_image(&mut tasks, ticket, item.clone());
                                    }
                                    if existing.is_deleted {
                                        revived.push((ordinal, item));
                                    }
                                }
                                Ok(None) => {
                                    warn!(id = %content.id, "item vanished before watermark update")
                                }
                                Err(err) => {
                                    warn!(id = %content.id, ?err, "failed to update watermark");
                                    exempt.push(content.id.clone());
                                }
                            }
                        }
                        None => {
                            let template = Item {
                                id: content.id.clone(),
                                divider_id: current_divider.clone(),
                                last_seen_at: Some(watermark),
                                feed_position: ordinal as i64,
                                ..Default::default()
                            };
                            self.spawn_detail(
                                &mut tasks,
                                ticket,
                                ordinal,
                                content.target_url.clone(),
                                template,
                            );
                        }
                    }
                }
            }
        }

        // Barrier: drain until every task, including chained image lookups, is done.
        let mut inserted: Vec<(usize, Item)> = Vec::new();
        let mut image_updates: Vec<Item> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskOutcome::Inserted { ordinal, item }) => {
                    if item.needs_image_resolution() {
                        self.spawn_image(&mut tasks, ticket, item.clone());
                    }
                    inserted.push((ordinal, item));
                }
                Ok(TaskOutcome::ImageResolved { item }) => image_updates.push(item),
                Ok(TaskOutcome::Skipped) => {}
                Err(err) => warn!(%err, "sync task failed to complete"),
            }
        }

        let deleted = match self.store.soft_delete_stale(watermark, &exempt).await {
            Ok(deleted) => deleted,
            Err(err) => {
                warn!(?err, "failed to soft-delete stale items");
                Vec::new()
            }
        };

        // Images resolved for items created this pass fold into their insertion.
        let mut new_items: HashMap<String, (usize, Item)> = inserted
            .into_iter()
            .chain(revived)
            .map(|(ordinal, item)| (item.id.clone(), (ordinal, item)))
            .collect();
        let mut updates = Vec::new();
        for item in image_updates {
            match new_items.get_mut(&item.id) {
                Some(entry) => entry.1 = item,
                None => updates.push(item),
            }
        }
        let mut new_items: Vec<(usize, Item)> = new_items.into_values().collect();
        new_items.sort_by_key(|(ordinal, _)| *ordinal);

        let mut projector = self.projector.lock().await;
        for item in updates {
            projector.record_update(item);
        }
        projector.record_delete(&deleted);
        for (_, item) in new_items {
            projector.record_insert(item);
        }

        let diff = projector.diff();
        info!(
            inserted = diff.inserted.len(),
            updated = diff.updated.len(),
            deleted = diff.deleted.len(),
            active = projector.len(),
            "sync pass complete"
        );
        Ok(SyncOutcome {
            diff,
            items: projector.items().to_vec(),
        })
    }

    fn spawn_detail(
        &self,
        tasks: &mut JoinSet<TaskOutcome>,
        ticket: &PassTicket,
        ordinal: usize,
        url: String,
        template: Item,
    ) {
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        let ticket = ticket.clone();
        tasks.spawn(
            async move {
                let detail = match gateway.fetch_item_detail(&url).await {
                    Ok(detail) => detail,
                    Err(err) => {
                        warn!(%url, %err, "item detail fetch failed");
                        return TaskOutcome::Skipped;
                    }
                };
                if !ticket.is_current() {
                    debug!("pass retired; dropping late detail");
                    return TaskOutcome::Skipped;
                }
                let item = apply_group_to_item(template, &detail);
                match store.upsert_item(&item).await {
                    Ok(()) => TaskOutcome::Inserted { ordinal, item },
                    Err(err) => {
                        warn!(?err, "failed to store new item");
                        TaskOutcome::Skipped
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn spawn_image(&self, tasks: &mut JoinSet<TaskOutcome>, ticket: &PassTicket, item: Item) {
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        let ticket = ticket.clone();
        tasks.spawn(
            async move { resolve_image(store, gateway, ticket, item).await }.in_current_span(),
        );
    }

    /// Pass watermark: wall clock at microsecond precision, strictly after
    /// the previous pass's.
    fn next_watermark(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let mut last = self
            .last_watermark
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = match *last {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }
}

#[instrument(skip_all, fields(id = %item.id))]
async fn resolve_image(
    store: Arc<dyn LocalStore>,
    gateway: Arc<dyn ContentGateway>,
    ticket: PassTicket,
    item: Item,
) -> TaskOutcome {
    let raw = match gateway.fetch_image(&item.image_endpoint).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(endpoint = %item.image_endpoint, %err, "image resolution failed");
            return TaskOutcome::Skipped;
        }
    };
    let Some(url) = sanitize_image_url(&raw) else {
        warn!(endpoint = %item.image_endpoint, raw = %raw, "image endpoint returned a non-absolute url");
        return TaskOutcome::Skipped;
    };
    if !ticket.is_current() {
        debug!("pass retired; dropping late image");
        return TaskOutcome::Skipped;
    }
    match store.set_image_url(&item.id, &url).await {
        Ok(Some(item)) => TaskOutcome::ImageResolved { item },
        Ok(None) => {
            debug!("item deleted before its image arrived; discarded");
            TaskOutcome::Skipped
        }
        Err(err) => {
            warn!(?err, "failed to store image url");
            TaskOutcome::Skipped
        }
    }
}
