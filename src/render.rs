//! # Widget rendering
//! Maps a served teaser (or its absence) onto the rendering target of a slot.
//!
//! The host page is reached through [`RenderSurface`]; the engine never
//! assumes a DOM. Layout is picked from the slot's role, and every
//! destination URL is stamped with viewport width and slot id.

use std::collections::BTreeMap;
use std::sync::Mutex;

use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use metrics::counter;
use url::Url;

use crate::config::TrackingConfig;
use crate::seen::ItemId;
use crate::slot::{SlotId, SlotRole};
use crate::wire::Teaser;

/// Role-specific item layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLayout {
    FeedCard,
    SidebarPreview,
    SidebarArticle,
    InlineInsert,
}

impl SlotLayout {
    pub fn for_role(role: SlotRole) -> Self {
        match role {
            SlotRole::Feed => SlotLayout::FeedCard,
            SlotRole::SidebarPreview => SlotLayout::SidebarPreview,
            SlotRole::SidebarArticle => SlotLayout::SidebarArticle,
            SlotRole::InArticle => SlotLayout::InlineInsert,
        }
    }

    pub fn build(self, teaser: &Teaser, href: &str) -> String {
        match self {
            SlotLayout::FeedCard => feed_card(teaser, href),
            SlotLayout::SidebarPreview => sidebar_preview(teaser, href),
            SlotLayout::SidebarArticle => sidebar_article(teaser, href),
            SlotLayout::InlineInsert => inline_insert(teaser, href),
        }
    }
}

fn title_of(t: &Teaser) -> &str {
    t.title.as_deref().unwrap_or_default()
}

fn image_tag(t: &Teaser) -> String {
    match t.image.as_deref() {
        Some(src) if !src.is_empty() => format!(
            r#"<img src="{}" alt="{}" loading="lazy">"#,
            attr(src),
            attr(title_of(t))
        ),
        _ => String::new(),
    }
}

fn feed_card(t: &Teaser, href: &str) -> String {
    let body = t
        .text
        .as_deref()
        .map(|s| format!("<p>{}</p>", text(s)))
        .unwrap_or_default();
    let date = t
        .publication_date
        .as_deref()
        .map(|d| format!("<time>{}</time>", text(d)))
        .unwrap_or_default();
    format!(
        r#"<a class="feed-card" href="{}">{}<h3>{}</h3>{}{}</a>"#,
        attr(href),
        image_tag(t),
        text(title_of(t)),
        body,
        date
    )
}

fn sidebar_preview(t: &Teaser, href: &str) -> String {
    format!(
        r#"<a class="sidebar-preview" href="{}">{}<span>{}</span></a>"#,
        attr(href),
        image_tag(t),
        text(title_of(t))
    )
}

fn sidebar_article(t: &Teaser, href: &str) -> String {
    format!(
        r#"<a class="sidebar-article" href="{}">{}</a>"#,
        attr(href),
        text(title_of(t))
    )
}

fn inline_insert(t: &Teaser, href: &str) -> String {
    let lead = t
        .text
        .as_deref()
        .map(|s| format!(" <span>{}</span>", text(s)))
        .unwrap_or_default();
    format!(
        r#"<aside class="inline-insert"><a href="{}"><strong>{}</strong>{}</a></aside>"#,
        attr(href),
        text(title_of(t)),
        lead
    )
}

/// Materialized item for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemView {
    pub slot: SlotId,
    pub item_id: ItemId,
    pub layout: SlotLayout,
    pub href: String,
    pub markup: String,
}

/// Host rendering surface. Implementations use interior mutability; the
/// engine calls them from a single logical thread of control.
pub trait RenderSurface: Send + Sync {
    fn has_target(&self, slot: &SlotId) -> bool;
    /// Create an empty placeholder if none exists yet.
    fn ensure_target(&self, slot: &SlotId);
    fn replace_target(&self, view: ItemView);
    /// Feed: the target disappears.
    fn remove_target(&self, slot: &SlotId);
    /// Non-feed roles: the target stays but takes no space.
    fn collapse_target(&self, slot: &SlotId);
    /// Remove every feed target; returns what was removed.
    fn clear_feed(&self) -> Vec<SlotId>;
    fn set_sentinel_enabled(&self, enabled: bool);
}

/// Resolve `dest` against the page and stamp the tracking parameters,
/// replacing earlier values of the same names.
pub fn stamp_url(
    page_url: &str,
    dest: &str,
    viewport_width: u32,
    slot: &SlotId,
    tracking: &TrackingConfig,
) -> Option<String> {
    let mut url = match Url::parse(dest) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(page_url).ok()?.join(dest).ok()?,
        Err(_) => return None,
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != tracking.width_param.as_str() && k != tracking.slot_param.as_str())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut q = url.query_pairs_mut();
        q.clear();
        for (k, v) in &kept {
            q.append_pair(k, v);
        }
        q.append_pair(&tracking.width_param, &viewport_width.to_string());
        q.append_pair(&tracking.slot_param, slot.as_str());
    }
    Some(url.into())
}

/// Target that was materialized and should now be observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTarget {
    pub slot: SlotId,
    pub item_id: ItemId,
}

pub struct WidgetRenderer {
    tracking: TrackingConfig,
}

impl WidgetRenderer {
    pub fn new(tracking: TrackingConfig) -> Self {
        Self { tracking }
    }

    pub fn render(
        &self,
        surface: &dyn RenderSurface,
        page_url: &str,
        viewport_width: u32,
        slot: &SlotId,
        teaser: Option<&Teaser>,
    ) -> Option<RenderedTarget> {
        if !surface.has_target(slot) {
            tracing::trace!(target: "render", slot = %slot, "no target; skipping");
            return None;
        }
        let role = slot.role();

        let Some(teaser) = teaser else {
            self.render_absent(surface, slot, role);
            return None;
        };

        let Some(href) = stamp_url(page_url, &teaser.url, viewport_width, slot, &self.tracking)
        else {
            tracing::warn!(target: "render", slot = %slot, url = %teaser.url, "unusable teaser url");
            self.render_absent(surface, slot, role);
            return None;
        };

        let layout = SlotLayout::for_role(role);
        let markup = layout.build(teaser, &href);
        surface.replace_target(ItemView {
            slot: slot.clone(),
            item_id: teaser.id,
            layout,
            href,
            markup,
        });
        counter!("slot_renders_total", "outcome" => "item").increment(1);
        Some(RenderedTarget {
            slot: slot.clone(),
            item_id: teaser.id,
        })
    }

    fn render_absent(&self, surface: &dyn RenderSurface, slot: &SlotId, role: SlotRole) {
        match role {
            SlotRole::Feed => surface.remove_target(slot),
            _ => surface.collapse_target(slot),
        }
        counter!("slot_renders_total", "outcome" => "empty").increment(1);
    }
}

/// State of one target on a [`MemorySurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum TargetState {
    Placeholder,
    Item(ItemView),
    Collapsed,
}

/// In-memory surface: keeps every target in a map. Used by the demo binary
/// and tests.
#[derive(Debug)]
pub struct MemorySurface {
    inner: Mutex<SurfaceInner>,
}

#[derive(Debug)]
struct SurfaceInner {
    targets: BTreeMap<SlotId, TargetState>,
    sentinel: bool,
    replaced: usize,
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self {
            inner: Mutex::new(SurfaceInner {
                targets: BTreeMap::new(),
                sentinel: true,
                replaced: 0,
            }),
        }
    }
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self, slot: &SlotId) -> Option<TargetState> {
        let g = self.inner.lock().expect("surface mutex poisoned");
        g.targets.get(slot).cloned()
    }

    pub fn item_at(&self, slot: &SlotId) -> Option<ItemId> {
        match self.target(slot) {
            Some(TargetState::Item(v)) => Some(v.item_id),
            _ => None,
        }
    }

    pub fn targets(&self) -> Vec<(SlotId, TargetState)> {
        let g = self.inner.lock().expect("surface mutex poisoned");
        g.targets
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn feed_slots(&self) -> Vec<SlotId> {
        let g = self.inner.lock().expect("surface mutex poisoned");
        g.targets
            .keys()
            .filter(|s| s.role() == SlotRole::Feed)
            .cloned()
            .collect()
    }

    pub fn sentinel_enabled(&self) -> bool {
        self.inner.lock().expect("surface mutex poisoned").sentinel
    }

    /// Total `replace_target` calls, to catch double renders.
    pub fn replace_count(&self) -> usize {
        self.inner.lock().expect("surface mutex poisoned").replaced
    }
}

impl RenderSurface for MemorySurface {
    fn has_target(&self, slot: &SlotId) -> bool {
        let g = self.inner.lock().expect("surface mutex poisoned");
        g.targets.contains_key(slot)
    }

    fn ensure_target(&self, slot: &SlotId) {
        let mut g = self.inner.lock().expect("surface mutex poisoned");
        g.targets
            .entry(slot.clone())
            .or_insert(TargetState::Placeholder);
    }

    fn replace_target(&self, view: ItemView) {
        let mut g = self.inner.lock().expect("surface mutex poisoned");
        g.replaced += 1;
        g.targets.insert(view.slot.clone(), TargetState::Item(view));
    }

    fn remove_target(&self, slot: &SlotId) {
        let mut g = self.inner.lock().expect("surface mutex poisoned");
        g.targets.remove(slot);
    }

    fn collapse_target(&self, slot: &SlotId) {
        let mut g = self.inner.lock().expect("surface mutex poisoned");
        if let Some(t) = g.targets.get_mut(slot) {
            *t = TargetState::Collapsed;
        }
    }

    fn clear_feed(&self) -> Vec<SlotId> {
        let mut g = self.inner.lock().expect("surface mutex poisoned");
        let feed: Vec<SlotId> = g
            .targets
            .keys()
            .filter(|s| s.role() == SlotRole::Feed)
            .cloned()
            .collect();
        for s in &feed {
            g.targets.remove(s);
        }
        feed
    }

    fn set_sentinel_enabled(&self, enabled: bool) {
        self.inner.lock().expect("surface mutex poisoned").sentinel = enabled;
    }
}
