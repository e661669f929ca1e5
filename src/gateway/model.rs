use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{id_from_target_url, ContentKind, ContentRef, Group};

/// `GET /api/sets/` envelope. Entries are kept raw so that one malformed set
/// does not reject the whole listing.
#[derive(Deserialize, Debug)]
pub struct SetListResp {
    pub objects: Vec<Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApiSet {
    pub uid: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub formatted_body: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<Value>,
    #[serde(default)]
    pub items: Vec<ApiContentItem>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApiContentItem {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub content_url: String,
}

#[derive(Deserialize, Debug)]
pub struct ImageResp {
    pub url: Option<String>,
}

/// Error body returned by the CMS; either key being present marks a failure.
#[derive(Deserialize, Debug, Default)]
pub struct ErrorReply {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub traceback: Option<Value>,
}

impl ErrorReply {
    pub fn parse(body: &Value) -> Option<Self> {
        let reply: ErrorReply = serde_json::from_value(body.clone()).ok()?;
        if is_blank(&reply.error) && is_blank(&reply.traceback) {
            return None;
        }
        Some(reply)
    }

    pub fn message(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

fn is_blank(v: &Option<Value>) -> bool {
    matches!(v, None | Some(Value::Null))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefDecodeError {
    #[error("divider without uid")]
    MissingId,
    #[error("content url {0:?} has no trailing path segment")]
    NoPathSegment(String),
}

impl ApiContentItem {
    /// Convert into a domain ref. `Ok(None)` means the entry is of a kind this
    /// client does not mirror (or is missing its type/url) and is skipped.
    pub fn into_ref(self) -> Result<Option<ContentRef>, RefDecodeError> {
        if self.content_type.is_empty() || self.content_url.is_empty() {
            return Ok(None);
        }
        let Some(kind) = ContentKind::parse_kind(&self.content_type) else {
            return Ok(None);
        };
        let id = match kind {
            ContentKind::Divider => self.uid.ok_or(RefDecodeError::MissingId)?,
            ContentKind::Item => id_from_target_url(&self.content_url)
                .ok_or_else(|| RefDecodeError::NoPathSegment(self.content_url.clone()))?,
        };
        Ok(Some(ContentRef {
            id,
            heading: self.heading,
            kind,
            target_url: self.content_url,
        }))
    }
}

impl ApiSet {
    pub fn into_group(self) -> Group {
        let image_candidates = self
            .image_urls
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let mut items = Vec::with_capacity(self.items.len());
        for raw in self.items {
            let kind = raw.content_type.clone();
            match raw.into_ref() {
                Ok(Some(content)) => items.push(content),
                Ok(None) => debug!(set = %self.uid, kind = %kind, "skipping content item"),
                Err(err) => warn!(set = %self.uid, %err, "dropping undecodable content item"),
            }
        }

        Group {
            id: self.uid,
            slug: self.slug,
            title: self.title,
            description: self.body,
            description_formatted: self.formatted_body,
            summary: self.summary,
            image_candidates,
            items,
        }
    }
}

impl SetListResp {
    /// Decode every complete set entry, skipping the rest.
    pub fn into_groups(self) -> Vec<Group> {
        self.objects
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<ApiSet>(raw) {
                Ok(set) => Some(set.into_group()),
                Err(err) => {
                    debug!(%err, "skipping incomplete set entry");
                    None
                }
            })
            .collect()
    }
}
