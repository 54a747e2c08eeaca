//! # Page engine
//! One instance per page view. Owns every piece of per-page state (seen
//! memory, visibility tracker, feed pager, render surface handle) and wires
//! host events into the request queue.
//!
//! Host events (`start`, `on_scroll`, `on_resize`, `on_intersections`) never
//! wait on the network; they only enqueue.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::config::{EngineConfig, MemoryConfig};
use crate::pager::{FeedPager, ResizeOutcome, RowBatch, RowTrigger};
use crate::queue::{BatchOutcome, BatchSink, QueueItem, RequestQueue, RetryPolicy, Widgets};
use crate::render::{RenderSurface, WidgetRenderer};
use crate::seen::{ItemId, SeenMemory, SeenSnapshot};
use crate::slot::{SlotId, SlotIdError, SlotNamer, SlotRole};
use crate::store::{Cookie, CookieJar};
use crate::transport::Transport;
use crate::visibility::{IntersectionEntry, Target, VisibilityTracker};
use crate::wire::{PageContext, TeaserRequest, TeaserResponse, Viewport};

/// Slots the page markup declares up front.
#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    pub sidebar_previews: u8,
    pub sidebar_articles: u8,
    /// In-article insert names as found in the markup.
    pub in_article: Vec<String>,
    /// Whether the page carries the open-ended feed.
    pub feed: bool,
}

impl PageLayout {
    pub fn static_slots(&self) -> Result<Vec<SlotId>, SlotIdError> {
        let mut out = Vec::new();
        for rank in 0..self.sidebar_previews {
            out.push(SlotNamer::sidebar(SlotRole::SidebarPreview, rank)?);
        }
        for rank in 0..self.sidebar_articles {
            out.push(SlotNamer::sidebar(SlotRole::SidebarArticle, rank)?);
        }
        for name in &self.in_article {
            out.push(SlotId::in_article(name)?);
        }
        Ok(out)
    }
}

/// All per-page state. The request queue reaches it through [`BatchSink`].
pub struct PageShared {
    context: Mutex<PageContext>,
    seen: Mutex<SeenMemory>,
    tracker: Mutex<VisibilityTracker>,
    pager: Mutex<FeedPager>,
    renderer: WidgetRenderer,
    surface: Arc<dyn RenderSurface>,
    default_locale: String,
}

impl PageShared {
    fn current_generation(&self) -> u32 {
        self.pager.lock().expect("pager mutex poisoned").generation()
    }

    fn is_stale_feed(&self, slot: &SlotId, feed_generation: Option<u32>, current: u32) -> bool {
        slot.role() == SlotRole::Feed && feed_generation.is_some_and(|g| g != current)
    }

    fn render_slot(&self, slot: &SlotId, teaser: Option<&crate::wire::Teaser>) {
        let (page_url, width) = {
            let ctx = self.context.lock().expect("context mutex poisoned");
            (ctx.page_url.clone(), ctx.viewport.width)
        };
        if let Some(target) =
            self.renderer
                .render(self.surface.as_ref(), &page_url, width, slot, teaser)
        {
            let mut tracker = self.tracker.lock().expect("tracker mutex poisoned");
            tracker.observe(target.slot, target.item_id);
        }
    }
}

impl BatchSink for PageShared {
    fn prune_stale(&self, mut widgets: Widgets, feed_generation: Option<u32>) -> Widgets {
        let current = self.current_generation();
        widgets.retain(|slot, _| !self.is_stale_feed(slot, feed_generation, current));
        widgets
    }

    fn build_request(&self, widgets: &Widgets) -> TeaserRequest {
        let snapshot = self.seen.lock().expect("seen mutex poisoned").snapshot();
        let ctx = self.context.lock().expect("context mutex poisoned");
        TeaserRequest::build(&ctx, &self.default_locale, widgets.clone(), snapshot)
    }

    fn apply(&self, widgets: &Widgets, feed_generation: Option<u32>, response: TeaserResponse) {
        let current = self.current_generation();
        for slot in widgets.keys() {
            if self.is_stale_feed(slot, feed_generation, current) {
                continue;
            }
            let teaser = response.widgets.get(slot.as_str()).and_then(Option::as_ref);
            self.render_slot(slot, teaser);
        }
        let unknown = response
            .widgets
            .keys()
            .filter(|k| !widgets.keys().any(|s| s.as_str() == k.as_str()))
            .count();
        if unknown > 0 {
            tracing::debug!(target: "queue", unknown, "response carried unrequested slots");
        }

        let mut seen = self.seen.lock().expect("seen mutex poisoned");
        seen.record_short_term_all(&response.newly_served_ids);
        match response.seen_ids_long_term {
            Some(authoritative) => seen.merge_long_term(&authoritative),
            None => seen.remember_long_term_local(&response.newly_served_ids),
        }
    }

    fn fail(&self, widgets: &Widgets, feed_generation: Option<u32>) {
        let current = self.current_generation();
        for slot in widgets.keys() {
            if !self.is_stale_feed(slot, feed_generation, current) {
                self.render_slot(slot, None);
            }
        }
    }
}

pub struct Page {
    shared: Arc<PageShared>,
    queue: RequestQueue,
    layout: PageLayout,
}

impl Page {
    pub fn new(
        cfg: &EngineConfig,
        mut context: PageContext,
        layout: PageLayout,
        transport: Arc<dyn Transport>,
        surface: Arc<dyn RenderSurface>,
        jar: Arc<dyn CookieJar>,
    ) -> Self {
        if context.visitor_id.is_empty() {
            context.visitor_id = visitor_id(jar.as_ref(), &cfg.memory, &context.user_agent);
        }
        let pager = FeedPager::new(cfg.feed.clone(), context.viewport);
        let shared = Arc::new(PageShared {
            seen: Mutex::new(SeenMemory::new(jar, &cfg.memory)),
            tracker: Mutex::new(VisibilityTracker::new(cfg.visibility.threshold)),
            pager: Mutex::new(pager),
            renderer: WidgetRenderer::new(cfg.tracking.clone()),
            surface,
            default_locale: cfg.tracking.default_locale.clone(),
            context: Mutex::new(context),
        });
        let queue = RequestQueue::new(
            transport,
            shared.clone(),
            RetryPolicy::from_config(&cfg.serving),
        );
        Self {
            shared,
            queue,
            layout,
        }
    }

    /// Initial load: static slots from markup plus the first feed rows, in
    /// one batch. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), SlotIdError> {
        let static_slots = self.layout.static_slots()?;
        let mut slots = static_slots.clone();
        let mut generation = None;
        if self.layout.feed {
            let viewport = self.viewport();
            let batch = self.pager().initial_rows(viewport);
            generation = Some(batch.generation);
            slots.extend(batch.slots);
        }
        tracing::info!(
            target: "engine",
            static_slots = static_slots.len(), total = slots.len(),
            "page start"
        );
        self.submit(slots, generation);
        Ok(())
    }

    /// Scroll position changed. Requests one more row when near the bottom.
    pub fn on_scroll(&self, scroll_y: f64, document_height: f64) {
        if !self.layout.feed {
            return;
        }
        let height = f64::from(self.viewport().height);
        let row = {
            let mut pager = self.pager();
            if !pager.near_bottom(scroll_y, height, document_height) {
                return;
            }
            pager.next_row(RowTrigger::Scroll)
        };
        if let Some(row) = row {
            self.submit_rows(row);
        }
    }

    /// Viewport size changed. A layout-changing resize clears the feed and
    /// issues a fresh initial batch.
    pub fn on_resize(&self, viewport: Viewport) {
        {
            let mut ctx = self.shared.context.lock().expect("context mutex poisoned");
            ctx.viewport = viewport;
        }
        if !self.layout.feed {
            return;
        }
        let outcome = self.pager().on_resize(viewport);
        let ResizeOutcome::Reset { initial } = outcome else {
            return;
        };
        let removed = self.shared.surface.clear_feed();
        {
            let mut tracker = self.shared.tracker.lock().expect("tracker mutex poisoned");
            for slot in &removed {
                tracker.discard(slot);
            }
        }
        self.shared.surface.set_sentinel_enabled(true);
        tracing::debug!(target: "engine", removed = removed.len(), "feed cleared");
        self.submit_rows(initial);
    }

    /// Intersection observer callback. Slot entries confirm views; a visible
    /// sentinel asks for the next feed row.
    pub fn on_intersections(&self, entries: &[IntersectionEntry]) -> Vec<ItemId> {
        let confirmed = {
            let mut tracker = self.shared.tracker.lock().expect("tracker mutex poisoned");
            let mut seen = self.shared.seen.lock().expect("seen mutex poisoned");
            tracker.on_intersections(entries, &mut seen)
        };
        let sentinel_visible = entries
            .iter()
            .any(|e| e.target == Target::Sentinel && e.ratio > 0.0);
        if sentinel_visible && self.layout.feed {
            let row = self.pager().next_row(RowTrigger::Sentinel);
            if let Some(row) = row {
                self.submit_rows(row);
            }
        }
        confirmed
    }

    /// Resolves once every queued batch has settled.
    pub async fn settled(&self) {
        self.queue.wait_idle().await;
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn viewport(&self) -> Viewport {
        self.shared
            .context
            .lock()
            .expect("context mutex poisoned")
            .viewport
    }

    pub fn context(&self) -> PageContext {
        self.shared
            .context
            .lock()
            .expect("context mutex poisoned")
            .clone()
    }

    pub fn seen_snapshot(&self) -> SeenSnapshot {
        self.shared.seen.lock().expect("seen mutex poisoned").snapshot()
    }

    pub fn feed_columns(&self) -> u8 {
        self.pager().columns()
    }

    pub fn feed_rows(&self) -> u8 {
        self.pager().rows_generated()
    }

    pub fn feed_generation(&self) -> u32 {
        self.pager().generation()
    }

    pub fn feed_loading(&self) -> bool {
        self.pager().is_loading()
    }

    fn pager(&self) -> std::sync::MutexGuard<'_, FeedPager> {
        self.shared.pager.lock().expect("pager mutex poisoned")
    }

    fn submit_rows(&self, row: RowBatch) {
        self.submit(row.slots, Some(row.generation));
    }

    fn submit(&self, slots: Vec<SlotId>, feed_generation: Option<u32>) {
        for slot in &slots {
            self.shared.surface.ensure_target(slot);
        }
        let mut item = QueueItem::new(slots);
        if let Some(generation) = feed_generation {
            let shared = Arc::clone(&self.shared);
            item = item
                .feed_generation(generation)
                .on_complete(move |outcome| feed_settled(&shared, generation, outcome));
        }
        self.queue.enqueue(item);
    }
}

fn feed_settled(shared: &PageShared, generation: u32, outcome: BatchOutcome) {
    let mut pager = shared.pager.lock().expect("pager mutex poisoned");
    pager.finish_loading(generation);
    if pager.generation() == generation && pager.is_exhausted() {
        shared.surface.set_sentinel_enabled(false);
    }
    tracing::trace!(target: "engine", generation, ?outcome, "feed batch settled");
}

/// Anonymous visitor id from the jar, minted and persisted on first visit.
pub fn visitor_id(jar: &dyn CookieJar, cfg: &MemoryConfig, user_agent: &str) -> String {
    if let Some(id) = jar.get(&cfg.visitor_cookie) {
        let id = id.trim();
        if id.len() == 16 && id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return id.to_ascii_lowercase();
        }
    }
    let now = Utc::now();
    let seed = format!(
        "{}|{}|{}",
        user_agent,
        now.timestamp_nanos_opt().unwrap_or_default(),
        std::process::id()
    );
    let digest = Sha256::digest(seed.as_bytes());
    let id: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    jar.set(Cookie::site_wide(
        &cfg.visitor_cookie,
        id.clone(),
        cfg.cookie_max_age_days,
        now,
    ));
    id
}
