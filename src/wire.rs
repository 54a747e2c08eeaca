//! Wire shapes exchanged with the serving collaborator.
//!
//! Field names follow what the serving endpoint expects (`uid`, `ua`, `w`,
//! `h`, ...). Slot ids are plain strings on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::seen::{ItemId, SeenSnapshot};
use crate::slot::SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    /// Device pixel ratio, when the host knows it.
    #[serde(default)]
    pub pixel_ratio: Option<f64>,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_ratio: None,
        }
    }
}

/// Visitor and page context attached to every request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContext {
    pub visitor_id: String,
    pub user_agent: String,
    /// Unknown on most clients; sent as an empty string then.
    pub client_ip: Option<String>,
    pub page_url: String,
    pub viewport: Viewport,
    pub locale: Option<String>,
    pub category: Option<String>,
}

impl PageContext {
    pub fn new(page_url: impl Into<String>, viewport: Viewport) -> Self {
        let page_url = page_url.into();
        let category = category_from_url(&page_url);
        Self {
            visitor_id: String::new(),
            user_agent: String::new(),
            client_ip: None,
            page_url,
            viewport,
            locale: None,
            category,
        }
    }
}

/// Category code taken from the path segment after `category`
/// (`/category/sport/123` → `sport`).
pub fn category_from_url(page_url: &str) -> Option<String> {
    let path = match url::Url::parse(page_url) {
        Ok(u) => u.path().to_string(),
        Err(_) => page_url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let mut segs = path.split('/').filter(|s| !s.is_empty());
    while let Some(seg) = segs.next() {
        if seg.eq_ignore_ascii_case("category") {
            return segs.next().map(|c| c.to_ascii_lowercase());
        }
    }
    None
}

/// Body of one batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeaserRequest {
    pub uid: String,
    pub ip: String,
    pub ua: String,
    pub url: String,
    pub loc: String,
    pub w: u32,
    pub h: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub widgets: BTreeMap<SlotId, u32>,
    #[serde(default)]
    pub seen_ids_page: Vec<ItemId>,
    #[serde(default)]
    pub seen_ids_long_term: Vec<ItemId>,
}

impl TeaserRequest {
    pub fn build(
        ctx: &PageContext,
        default_locale: &str,
        widgets: BTreeMap<SlotId, u32>,
        seen: SeenSnapshot,
    ) -> Self {
        Self {
            uid: ctx.visitor_id.clone(),
            ip: ctx.client_ip.clone().unwrap_or_default(),
            ua: ctx.user_agent.clone(),
            url: ctx.page_url.clone(),
            loc: ctx
                .locale
                .clone()
                .unwrap_or_else(|| default_locale.to_string()),
            w: ctx.viewport.width,
            h: ctx.viewport.height,
            d: ctx.viewport.pixel_ratio,
            category: ctx.category.clone(),
            widgets,
            seen_ids_page: seen.page,
            seen_ids_long_term: seen.long_term,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A served item. Only `id` (dedup) and `url` (tracking) matter to the
/// engine; the rest is passed through to layouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teaser {
    pub id: ItemId,
    #[serde(default)]
    pub article_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub url: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Role-specific fields the engine does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeaserResponse {
    #[serde(default)]
    pub widgets: BTreeMap<String, Option<Teaser>>,
    #[serde(default)]
    pub newly_served_ids: Vec<ItemId>,
    /// `None` when the key is missing; `Some(vec![])` is a real replacement.
    #[serde(default)]
    pub seen_ids_long_term: Option<Vec<ItemId>>,
}
