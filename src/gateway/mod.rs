use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::gateway::model::{ApiSet, ErrorReply, ImageResp, SetListResp};
use crate::model::Group;

pub mod model;

const SETS_PATH: &str = "/api/sets/";

/// Error code the CMS uses when a 200 response nevertheless carries an error body.
const INVALID_REPLY_CODE: u16 = 1;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("transport error: {message}")]
    Transport { message: String, connectivity: bool },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },
    #[error("collection {0:?} not present in feed")]
    FeedNotFound(String),
}

impl GatewayError {
    /// Text suitable for showing to a user; the detailed error goes to the log.
    pub fn user_message(&self) -> &'static str {
        match self {
            GatewayError::Transport {
                connectivity: true, ..
            } => "No Internet Connection",
            _ => "Something went wrong\nPlease try again later",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return GatewayError::Decode(err.to_string());
        }
        GatewayError::Transport {
            connectivity: err.is_connect() || err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// Remote side of a sync pass. Implemented over HTTP by [`SkylarkClient`] and
/// by recording doubles in tests.
#[async_trait]
pub trait ContentGateway: Send + Sync {
    /// Fetch the set listing and return the set whose slug matches.
    async fn fetch_feed(&self, slug: &str) -> Result<Group, GatewayError>;

    /// Fetch a single item's detail record from its content URL.
    async fn fetch_item_detail(&self, url: &str) -> Result<Group, GatewayError>;

    /// Resolve an image endpoint to the absolute image URL it points at.
    async fn fetch_image(&self, path: &str) -> Result<String, GatewayError>;
}

#[derive(Clone)]
pub struct SkylarkClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for SkylarkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkylarkClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SkylarkClient {
    pub fn new(base_url: Url, user_agent: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(cfg.api.base_url.trim()).context("invalid api.base_url")?;
        Self::new(base_url, &cfg.api.user_agent, cfg.request_timeout())
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|err| GatewayError::Decode(format!("invalid path {path:?}: {err}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = self.endpoint(path)?;
        debug!(%url, "GET");
        let res = self.http.get(url.clone()).send().await.map_err(|err| {
            warn!(%url, %err, "request failed");
            GatewayError::from(err)
        })?;
        let status = res.status();
        let body = res.bytes().await?;
        decode_body(status, &body).map_err(|err| {
            warn!(%url, %status, %err, "API error");
            err
        })
    }

    pub async fn fetch_feed(&self, slug: &str) -> Result<Group, GatewayError> {
        let listing: SetListResp = self.get_json(SETS_PATH).await?;
        listing
            .into_groups()
            .into_iter()
            .find(|group| group.slug == slug)
            .ok_or_else(|| GatewayError::FeedNotFound(slug.to_string()))
    }

    pub async fn fetch_item_detail(&self, url: &str) -> Result<Group, GatewayError> {
        let set: ApiSet = self.get_json(url).await?;
        Ok(set.into_group())
    }

    pub async fn fetch_image(&self, path: &str) -> Result<String, GatewayError> {
        let image: ImageResp = self.get_json(path).await?;
        image
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GatewayError::Decode(format!("image {path} has no url")))
    }
}

#[async_trait]
impl ContentGateway for SkylarkClient {
    async fn fetch_feed(&self, slug: &str) -> Result<Group, GatewayError> {
        SkylarkClient::fetch_feed(self, slug).await
    }

    async fn fetch_item_detail(&self, url: &str) -> Result<Group, GatewayError> {
        SkylarkClient::fetch_item_detail(self, url).await
    }

    async fn fetch_image(&self, path: &str) -> Result<String, GatewayError> {
        SkylarkClient::fetch_image(self, path).await
    }
}

/// Classify a response body. An `error`/`traceback` body is a remote error
/// regardless of status; otherwise non-2xx is a remote error and anything
/// that fails to parse as `T` is a decode error.
pub fn decode_body<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, GatewayError> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(err) if status.is_success() => return Err(GatewayError::Decode(err.to_string())),
        Err(_) => return Err(status_error(status)),
    };

    if let Some(reply) = ErrorReply::parse(&value) {
        let code = if status == StatusCode::OK {
            INVALID_REPLY_CODE
        } else {
            status.as_u16()
        };
        return Err(GatewayError::Remote {
            code,
            message: reply.message(),
        });
    }
    if !status.is_success() {
        return Err(status_error(status));
    }
    serde_json::from_value(value).map_err(|err| GatewayError::Decode(err.to_string()))
}

fn status_error(status: StatusCode) -> GatewayError {
    GatewayError::Remote {
        code: status.as_u16(),
        message: status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    }
}
