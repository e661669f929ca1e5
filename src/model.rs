use chrono::{DateTime, Utc};
use reqwest::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Divider,
    Item,
}

impl ContentKind {
    /// Map a wire `content_type`. Unknown types yield `None` and are skipped.
    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "divider" => Some(ContentKind::Divider),
            "episode" | "item" => Some(ContentKind::Item),
            _ => None,
        }
    }
}

/// A remote set. Lives only for the duration of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub description_formatted: Option<String>,
    pub summary: Option<String>,
    pub image_candidates: Vec<String>,
    pub items: Vec<ContentRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    pub id: String,
    pub heading: Option<String>,
    pub kind: ContentKind,
    pub target_url: String,
}

/// Persisted episode row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
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

impl Item {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn needs_image_resolution(&self) -> bool {
        !self.image_endpoint.is_empty() && self.image_url.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDivider {
    pub id: String,
    pub title: String,
}

impl GroupDivider {
    pub fn from_ref(content: &ContentRef) -> Self {
        Self {
            id: content.id.clone(),
            title: content.heading.clone().unwrap_or_default(),
        }
    }
}

/// Copy the displayable fields of a detail `Group` onto an `Item`.
///
/// Only content and image fields change; favorite flag, watermark and divider
/// reference are left as they were on `item`.
pub fn apply_group_to_item(item: Item, group: &Group) -> Item {
    let mut item = Item {
        title: group.title.clone(),
        description: group.description.clone().unwrap_or_default(),
        description_formatted: group.description_formatted.clone().unwrap_or_default(),
        summary: group.summary.clone().unwrap_or_default(),
        ..item
    };

    match group.image_candidates.first() {
        Some(candidate) if candidate.starts_with("http") => {
            item.image_url = sanitize_image_url(candidate).unwrap_or_default();
            item.image_endpoint.clear();
        }
        Some(candidate) => {
            item.image_endpoint = candidate.clone();
            item.image_url.clear();
        }
        None => {
            item.image_endpoint.clear();
            item.image_url.clear();
        }
    }
    item
}

/// Strip query and fragment from an absolute image URL so the same asset
/// always produces the same cache key. Non-`http` values are rejected.
pub fn sanitize_image_url(raw: &str) -> Option<String> {
    if !raw.starts_with("http") {
        return None;
    }
    let mut url = Url::parse(raw).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

/// Last non-empty path segment of a content URL, e.g.
/// `/api/episodes/film_123/` -> `film_123`.
pub fn id_from_target_url(target_url: &str) -> Option<String> {
    let path = target_url.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}
