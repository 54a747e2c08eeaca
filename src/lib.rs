// src/lib.rs
// Public library surface for hosts, the demo binary, and integration tests.

pub mod config;
pub mod engine;
pub mod metrics;
pub mod pager;
pub mod queue;
pub mod render;
pub mod seen;
pub mod slot;
pub mod store;
pub mod transport;
pub mod visibility;
pub mod wire;

// ---- Re-exports for stable public API ----
pub use crate::config::EngineConfig;
pub use crate::engine::{Page, PageLayout};
pub use crate::queue::{BatchOutcome, QueueItem, RequestQueue};
pub use crate::render::{MemorySurface, RenderSurface};
pub use crate::seen::{ItemId, SeenMemory};
pub use crate::slot::{SlotId, SlotNamer, SlotRole};
pub use crate::store::{CookieJar, FileJar, MemoryJar};
pub use crate::transport::{HttpTransport, Transport, TransportError};
pub use crate::visibility::IntersectionEntry;
pub use crate::wire::{PageContext, Teaser, TeaserRequest, TeaserResponse, Viewport};

/// Log targets the engine's modules emit under.
pub const LOG_TARGETS: &[&str] = &[
    "engine",
    "pager",
    "queue",
    "render",
    "seen",
    "store",
    "transport",
    "visibility",
];

/// `EnvFilter` directives used when `RUST_LOG` is unset: the crate and every
/// engine target at `info`, everything else at `warn`.
pub fn default_log_filter() -> String {
    let mut directives = vec!["teaser_slot_engine=info".to_string()];
    directives.extend(LOG_TARGETS.iter().map(|t| format!("{t}=info")));
    directives.push("warn".into());
    directives.join(",")
}
