//! Page demo: binary entrypoint.
//! Drives one simulated page view against the configured serving endpoint:
//! initial load, a few scroll-triggered feed rows, all rendered items marked
//! visible. Useful for checking a serving deployment end to end.
//!
//! Env:
//!   PROBE_PAGE_URL   page being simulated (default https://localhost/)
//!   PROBE_VIEWPORT   WIDTHxHEIGHT (default 1280x800)
//!   PROBE_SCROLLS    scroll steps after initial load (default 3)
//!   PROBE_METRICS=1  print Prometheus exposition at the end

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use teaser_slot_engine::default_log_filter;
use teaser_slot_engine::metrics::Metrics;
use teaser_slot_engine::render::TargetState;
use teaser_slot_engine::{
    EngineConfig, FileJar, HttpTransport, IntersectionEntry, MemorySurface, Page, PageContext,
    PageLayout, Viewport,
};

const COOKIE_FILE: &str = "state/cookies.json";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn parse_viewport(raw: &str) -> Option<Viewport> {
    let (w, h) = raw.trim().split_once(['x', 'X'])?;
    Some(Viewport::new(w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op elsewhere.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = if env_or("PROBE_METRICS", "0") == "1" {
        Some(Metrics::init()?)
    } else {
        None
    };

    let cfg = EngineConfig::load_default().context("loading engine config")?;
    let viewport = parse_viewport(&env_or("PROBE_VIEWPORT", "1280x800"))
        .context("PROBE_VIEWPORT must look like 1280x800")?;
    let scrolls: u32 = env_or("PROBE_SCROLLS", "3").parse().unwrap_or(3);

    let mut ctx = PageContext::new(env_or("PROBE_PAGE_URL", "https://localhost/"), viewport);
    ctx.user_agent = cfg.serving.user_agent.clone();

    let transport = HttpTransport::new(&cfg.serving)?;
    tracing::info!(endpoint = transport.endpoint(), "probing serving endpoint");

    let surface = Arc::new(MemorySurface::new());
    let layout = PageLayout {
        sidebar_previews: 3,
        sidebar_articles: 2,
        in_article: Vec::new(),
        feed: true,
    };
    let page = Page::new(
        &cfg,
        ctx,
        layout,
        Arc::new(transport),
        surface.clone(),
        Arc::new(FileJar::open(COOKIE_FILE)),
    );

    page.start()?;
    page.settled().await;

    for step in 0..scrolls {
        let visible: Vec<IntersectionEntry> = surface
            .targets()
            .into_iter()
            .filter(|(_, t)| matches!(t, TargetState::Item(_)))
            .map(|(slot, _)| IntersectionEntry::slot(slot, 1.0))
            .collect();
        let confirmed = page.on_intersections(&visible);
        tracing::info!(step, confirmed = confirmed.len(), "views confirmed");

        // pretend the visitor reached the bottom of the document
        let doc_height = f64::from(viewport.height) * f64::from(page.feed_rows().max(1));
        page.on_scroll(doc_height - f64::from(viewport.height), doc_height);
        page.settled().await;
    }

    let targets = surface.targets();
    let filled = targets
        .iter()
        .filter(|(_, t)| matches!(t, TargetState::Item(_)))
        .count();
    let seen = page.seen_snapshot();
    tracing::info!(
        targets = targets.len(),
        filled,
        rows = page.feed_rows(),
        seen_page = seen.page.len(),
        seen_long_term = seen.long_term.len(),
        "demo finished"
    );
    for (slot, state) in targets {
        if let TargetState::Item(view) = state {
            println!("{slot}\t{}\t{}", view.item_id, view.href);
        }
    }

    if let Some(m) = metrics {
        println!("{}", m.render());
    }
    Ok(())
}
