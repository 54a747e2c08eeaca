// src/config/mod.rs
pub mod engine;

pub use engine::{
    Breakpoint, EngineConfig, FeedConfig, MemoryConfig, ServingConfig, TrackingConfig,
    VisibilityConfig,
};
