// tests/common/mod.rs
//
// Scripted serving collaborator shared by the integration tests.
// Each `fetch` pops the next step; an empty script auto-serves fresh items.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use teaser_slot_engine::config::EngineConfig;
use teaser_slot_engine::{
    MemoryJar, MemorySurface, Page, PageContext, PageLayout, QueueItem, RenderSurface, SlotId,
    Teaser, TeaserRequest, TeaserResponse, Transport, TransportError, Viewport,
};

pub const PAGE_URL: &str = "https://news.example/category/sport/42";

pub enum Step {
    /// Auto-serve after a delay.
    Serve(Duration),
    Respond(TeaserResponse),
    Fail(TransportError),
    /// Never answers; only a timeout gets past it.
    Hang,
}

pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<TeaserRequest>>,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    auto_delay: Duration,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            auto_delay: Duration::from_millis(20),
        })
    }

    pub fn auto() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn requests(&self) -> Vec<TeaserRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// One fresh teaser per requested slot; long-term list grows server-side.
    pub fn serve(&self, req: &TeaserRequest) -> TeaserResponse {
        let mut resp = TeaserResponse::default();
        let mut long_term = req.seen_ids_long_term.clone();
        for slot in req.widgets.keys() {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            resp.widgets
                .insert(slot.to_string(), Some(teaser(id, &format!("/preview/item-{id}"))));
            resp.newly_served_ids.push(id);
            long_term.push(id);
        }
        resp.seen_ids_long_term = Some(long_term);
        resp
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: &TeaserRequest) -> Result<TeaserResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Serve(self.auto_delay));
        match step {
            Step::Serve(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.serve(request))
            }
            Step::Respond(r) => Ok(r),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn teaser(id: u64, url: &str) -> Teaser {
    Teaser {
        id,
        article_id: None,
        title: Some(format!("Item {id}")),
        text: None,
        image: None,
        url: url.to_string(),
        slug: None,
        publication_date: None,
        is_active: true,
        extra: Default::default(),
    }
}

pub fn config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.serving.retry_backoff_ms = 0;
    cfg
}

pub struct Harness {
    pub page: Page,
    pub transport: Arc<ScriptedTransport>,
    pub surface: Arc<MemorySurface>,
    pub jar: Arc<MemoryJar>,
}

pub fn harness(
    cfg: &EngineConfig,
    layout: PageLayout,
    viewport: Viewport,
    transport: Arc<ScriptedTransport>,
) -> Harness {
    let surface = Arc::new(MemorySurface::new());
    let jar = Arc::new(MemoryJar::new());
    harness_with_jar(cfg, layout, viewport, transport, surface, jar)
}

pub fn harness_with_jar(
    cfg: &EngineConfig,
    layout: PageLayout,
    viewport: Viewport,
    transport: Arc<ScriptedTransport>,
    surface: Arc<MemorySurface>,
    jar: Arc<MemoryJar>,
) -> Harness {
    let mut ctx = PageContext::new(PAGE_URL, viewport);
    ctx.user_agent = "test-agent".into();
    let page = Page::new(
        cfg,
        ctx,
        layout,
        transport.clone(),
        surface.clone(),
        jar.clone(),
    );
    Harness {
        page,
        transport,
        surface,
        jar,
    }
}

pub fn sidebar_only(previews: u8) -> PageLayout {
    PageLayout {
        sidebar_previews: previews,
        ..PageLayout::default()
    }
}

pub fn feed_only() -> PageLayout {
    PageLayout {
        feed: true,
        ..PageLayout::default()
    }
}

/// Queue a standalone in-article insert, the way a late-discovered placement
/// would be loaded.
pub fn enqueue_insert(h: &Harness, name: &str) -> SlotId {
    let slot = SlotId::in_article(name).expect("valid insert name");
    h.surface.ensure_target(&slot);
    h.page.queue().enqueue(QueueItem::new([slot.clone()]));
    slot
}

/// Response filling every listed slot, without a long-term list.
pub fn response_for(items: &[(&SlotId, u64)]) -> TeaserResponse {
    let mut resp = TeaserResponse::default();
    for (slot, id) in items {
        resp.widgets
            .insert(slot.to_string(), Some(teaser(*id, &format!("/preview/item-{id}"))));
        resp.newly_served_ids.push(*id);
    }
    resp
}
