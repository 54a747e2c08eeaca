// src/config/engine.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

pub const ENV_CONFIG_PATH: &str = "SLOT_ENGINE_CONFIG_PATH";
pub const ENV_ENDPOINT: &str = "SLOT_ENGINE_ENDPOINT";
pub const DEFAULT_CONFIG_TOML: &str = "config/engine.toml";
pub const DEFAULT_CONFIG_JSON: &str = "config/engine.json";

fn default_endpoint() -> String {
    "http://127.0.0.1:8000/etc".to_string()
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_connect_timeout_ms() -> u64 {
    2_000
}
fn default_max_attempts() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    300
}
fn default_user_agent() -> String {
    concat!("teaser-slot-engine/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_capacity() -> usize {
    250
}
fn default_cookie_name() -> String {
    "ta_seen".to_string()
}
fn default_visitor_cookie() -> String {
    "ta_uid".to_string()
}
fn default_max_age_days() -> i64 {
    365
}
fn default_threshold() -> f32 {
    0.5
}
fn default_min_rows() -> u8 {
    1
}
fn default_max_initial_rows() -> u8 {
    5
}
fn default_max_rows() -> u8 {
    100
}
fn default_scroll_margin_px() -> f64 {
    600.0
}
fn default_card_aspect_ratio() -> f64 {
    0.8
}
fn default_breakpoints() -> Vec<Breakpoint> {
    vec![
        Breakpoint { min_width: 0, columns: 1 },
        Breakpoint { min_width: 576, columns: 2 },
        Breakpoint { min_width: 992, columns: 3 },
        Breakpoint { min_width: 1200, columns: 4 },
    ]
}
fn default_width_param() -> String {
    "w".to_string()
}
fn default_slot_param() -> String {
    "slot".to_string()
}
fn default_locale() -> String {
    "ru".to_string()
}

/// Serving collaborator endpoint and request policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-attempt budget, enforced by the request queue.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl ServingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_capacity")]
    pub long_term_capacity: usize,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_visitor_cookie")]
    pub visitor_cookie: String,
    #[serde(default = "default_max_age_days")]
    pub cookie_max_age_days: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            long_term_capacity: default_capacity(),
            cookie_name: default_cookie_name(),
            visitor_cookie: default_visitor_cookie(),
            cookie_max_age_days: default_max_age_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityConfig {
    /// Visible fraction (inclusive) at which a view is confirmed.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

/// Viewport widths at or above `min_width` get `columns` feed columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub min_width: u32,
    pub columns: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_min_rows")]
    pub min_rows: u8,
    #[serde(default = "default_max_initial_rows")]
    pub max_initial_rows: u8,
    /// Hard ceiling on generated rows per layout.
    #[serde(default = "default_max_rows")]
    pub max_rows: u8,
    #[serde(default = "default_scroll_margin_px")]
    pub scroll_margin_px: f64,
    /// Card width / card height.
    #[serde(default = "default_card_aspect_ratio")]
    pub card_aspect_ratio: f64,
    #[serde(default = "default_breakpoints")]
    pub breakpoints: Vec<Breakpoint>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            min_rows: default_min_rows(),
            max_initial_rows: default_max_initial_rows(),
            max_rows: default_max_rows(),
            scroll_margin_px: default_scroll_margin_px(),
            card_aspect_ratio: default_card_aspect_ratio(),
            breakpoints: default_breakpoints(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_width_param")]
    pub width_param: String,
    #[serde(default = "default_slot_param")]
    pub slot_param: String,
    #[serde(default = "default_locale")]
    pub default_locale: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            width_param: default_width_param(),
            slot_param: default_slot_param(),
            default_locale: default_locale(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub serving: ServingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub visibility: VisibilityConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

impl EngineConfig {
    /// Load from an explicit path. TOML or JSON, picked by extension and
    /// falling back to the other format.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = Self::parse(&data, &ext)
            .with_context(|| format!("parsing engine config {}", path.display()))?;
        Ok(cfg.sanitized().with_env_overrides())
    }

    /// 1) $SLOT_ENGINE_CONFIG_PATH
    /// 2) config/engine.toml
    /// 3) config/engine.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for p in [DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_JSON] {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
        }
        Ok(Self::default().with_env_overrides())
    }

    fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        if hint_ext == "json" {
            if let Ok(v) = serde_json::from_str(s) {
                return Ok(v);
            }
            return Ok(toml::from_str(s)?);
        }
        match toml::from_str(s) {
            Ok(v) => Ok(v),
            Err(toml_err) => serde_json::from_str(s).map_err(|_| anyhow!(toml_err)),
        }
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(ep) = env::var(ENV_ENDPOINT) {
            let ep = ep.trim();
            if !ep.is_empty() {
                self.serving.endpoint = ep.to_string();
            }
        }
        self
    }

    /// Clamp out-of-range values back to their defaults.
    pub fn sanitized(mut self) -> Self {
        let s = &mut self.serving;
        if s.timeout_ms == 0 {
            s.timeout_ms = default_timeout_ms();
        }
        if s.max_attempts == 0 {
            s.max_attempts = default_max_attempts();
        }
        s.max_attempts = s.max_attempts.min(5);

        let m = &mut self.memory;
        if m.long_term_capacity == 0 {
            m.long_term_capacity = default_capacity();
        }
        if m.cookie_name.trim().is_empty() {
            m.cookie_name = default_cookie_name();
        }
        if m.visitor_cookie.trim().is_empty() {
            m.visitor_cookie = default_visitor_cookie();
        }
        if m.cookie_max_age_days <= 0 {
            m.cookie_max_age_days = default_max_age_days();
        }

        if !(self.visibility.threshold > 0.0 && self.visibility.threshold <= 1.0) {
            self.visibility.threshold = default_threshold();
        }

        let f = &mut self.feed;
        if f.min_rows == 0 {
            f.min_rows = default_min_rows();
        }
        if f.max_initial_rows < f.min_rows {
            // swap to keep a valid interval
            std::mem::swap(&mut f.min_rows, &mut f.max_initial_rows);
        }
        if f.max_rows == 0 {
            f.max_rows = default_max_rows();
        }
        if !(f.card_aspect_ratio.is_finite() && f.card_aspect_ratio > 0.0) {
            f.card_aspect_ratio = default_card_aspect_ratio();
        }
        if !(f.scroll_margin_px.is_finite() && f.scroll_margin_px >= 0.0) {
            f.scroll_margin_px = default_scroll_margin_px();
        }
        f.breakpoints.retain(|b| b.columns > 0);
        if f.breakpoints.is_empty() {
            f.breakpoints = default_breakpoints();
        }
        f.breakpoints.sort_by_key(|b| b.min_width);
        f.breakpoints.dedup_by_key(|b| b.min_width);

        self
    }
}
