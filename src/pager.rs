//! # Feed pager
//! Keeps the open-ended feed supplied with rows.
//!
//! Rows are generated on initial load (enough to fill the viewport), then one
//! at a time when the sentinel shows up or the visitor scrolls near the
//! bottom. A layout-changing resize starts a new layout generation.

use crate::config::{Breakpoint, FeedConfig};
use crate::slot::{SlotId, SlotNamer};
use crate::wire::Viewport;

/// Why a row request was made; only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTrigger {
    Sentinel,
    Scroll,
}

/// Slots for one or more feed rows, tagged with their layout generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBatch {
    pub generation: u32,
    pub slots: Vec<SlotId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Same breakpoint band; nothing to do.
    Unchanged,
    /// Layout changed: old feed is gone, start over with `initial`.
    Reset { initial: RowBatch },
}

#[derive(Debug)]
pub struct FeedPager {
    cfg: FeedConfig,
    band: usize,
    columns: u8,
    next_row: u8,
    loading: bool,
    exhausted: bool,
    generation: u32,
}

impl FeedPager {
    pub fn new(cfg: FeedConfig, viewport: Viewport) -> Self {
        let (band, columns) = band_for(&cfg.breakpoints, viewport.width);
        Self {
            cfg,
            band,
            columns,
            next_row: 0,
            loading: false,
            exhausted: false,
            generation: 0,
        }
    }

    pub fn columns(&self) -> u8 {
        self.columns
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn rows_generated(&self) -> u8 {
        self.next_row
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn columns_for(&self, width: u32) -> u8 {
        band_for(&self.cfg.breakpoints, width).1
    }

    /// Rows needed to cover the viewport, clamped to the configured bounds.
    /// Inverted bounds resolve to `max_initial_rows`.
    pub fn rows_to_fill_viewport(&self, viewport: Viewport) -> u8 {
        let columns = f64::from(self.columns_for(viewport.width).max(1));
        let card_width = f64::from(viewport.width) / columns;
        let card_height = card_width / self.cfg.card_aspect_ratio;
        let raw = if card_height > 0.0 {
            (f64::from(viewport.height) / card_height).ceil()
        } else {
            f64::from(self.cfg.max_initial_rows)
        };
        let lo = f64::from(self.cfg.min_rows);
        let hi = f64::from(self.cfg.max_initial_rows);
        raw.max(lo).min(hi) as u8
    }

    /// First batch for the current layout. Sets the loading flag.
    pub fn initial_rows(&mut self, viewport: Viewport) -> RowBatch {
        let rows = self.rows_to_fill_viewport(viewport);
        let slots = self.take_rows(rows);
        self.loading = !slots.is_empty();
        tracing::debug!(
            target: "pager",
            rows, columns = self.columns, generation = self.generation,
            "initial feed rows"
        );
        RowBatch {
            generation: self.generation,
            slots,
        }
    }

    /// Exactly one more row, unless a row is still loading or the ceiling
    /// was reached.
    pub fn next_row(&mut self, trigger: RowTrigger) -> Option<RowBatch> {
        if self.loading || self.exhausted {
            return None;
        }
        let slots = self.take_rows(1);
        if slots.is_empty() {
            return None;
        }
        self.loading = true;
        tracing::debug!(target: "pager", row = self.next_row - 1, ?trigger, "feed row");
        Some(RowBatch {
            generation: self.generation,
            slots,
        })
    }

    /// Completion of a feed batch. Batches from an older generation do not
    /// touch the current layout's flag.
    pub fn finish_loading(&mut self, generation: u32) {
        if generation == self.generation {
            self.loading = false;
        }
    }

    /// Whether the viewport bottom is within the scroll margin of the end of
    /// the document.
    pub fn near_bottom(&self, scroll_y: f64, viewport_height: f64, document_height: f64) -> bool {
        document_height - (scroll_y + viewport_height) <= self.cfg.scroll_margin_px
    }

    /// Crossing into another breakpoint band resets the feed.
    pub fn on_resize(&mut self, viewport: Viewport) -> ResizeOutcome {
        let (band, columns) = band_for(&self.cfg.breakpoints, viewport.width);
        if band == self.band {
            return ResizeOutcome::Unchanged;
        }
        tracing::info!(
            target: "pager",
            from = self.columns, to = columns, width = viewport.width,
            "layout changed; resetting feed"
        );
        self.band = band;
        self.columns = columns;
        self.next_row = 0;
        self.loading = false;
        self.exhausted = false;
        self.generation = self.generation.wrapping_add(1);
        ResizeOutcome::Reset {
            initial: self.initial_rows(viewport),
        }
    }

    fn take_rows(&mut self, rows: u8) -> Vec<SlotId> {
        let mut slots = Vec::with_capacity(usize::from(rows) * usize::from(self.columns));
        for _ in 0..rows {
            if self.next_row >= self.cfg.max_rows {
                break;
            }
            let row = self.next_row;
            for column in 0..self.columns {
                slots.push(SlotNamer::feed(column, row));
            }
            self.next_row += 1;
        }
        if self.next_row >= self.cfg.max_rows && !self.exhausted {
            self.exhausted = true;
            tracing::info!(target: "pager", rows = self.next_row, "feed row ceiling reached");
        }
        slots
    }
}

/// (band index, columns) for a width. Breakpoints are sorted by `min_width`;
/// widths below the first one use the first band.
fn band_for(breakpoints: &[Breakpoint], width: u32) -> (usize, u8) {
    let mut found = (0, breakpoints.first().map(|b| b.columns).unwrap_or(1));
    for (i, b) in breakpoints.iter().enumerate() {
        if width >= b.min_width {
            found = (i, b.columns);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pager(width: u32) -> FeedPager {
        FeedPager::new(FeedConfig::default(), Viewport::new(width, 800))
    }

    #[test]
    fn columns_follow_breakpoints() {
        let p = pager(1280);
        assert_eq!(p.columns(), 4);
        assert_eq!(p.columns_for(320), 1);
        assert_eq!(p.columns_for(576), 2);
        assert_eq!(p.columns_for(991), 2);
        assert_eq!(p.columns_for(992), 3);
    }

    #[test]
    fn rows_to_fill_is_clamped() {
        let p = pager(1280);
        // 4 cols → 320px cards → 400px tall; 800 / 400 = 2 rows
        assert_eq!(p.rows_to_fill_viewport(Viewport::new(1280, 800)), 2);
        // very tall viewport clamps to 5
        assert_eq!(p.rows_to_fill_viewport(Viewport::new(1280, 20_000)), 5);
        // tiny height still yields one row
        assert_eq!(p.rows_to_fill_viewport(Viewport::new(1280, 1)), 1);
        // 1 col phone: 375 wide → ~469 tall; 700 / 469 → 2
        assert_eq!(p.rows_to_fill_viewport(Viewport::new(375, 700)), 2);
    }

    #[test]
    fn inverted_row_bounds_do_not_panic() {
        let cfg = FeedConfig {
            min_rows: 6,
            max_initial_rows: 2,
            ..FeedConfig::default()
        };
        let mut p = FeedPager::new(cfg, Viewport::new(1280, 800));
        assert_eq!(p.rows_to_fill_viewport(Viewport::new(1280, 1)), 2);
        assert_eq!(p.rows_to_fill_viewport(Viewport::new(1280, 20_000)), 2);
        assert_eq!(p.initial_rows(Viewport::new(1280, 800)).slots.len(), 2 * 4);
    }

    #[test]
    fn initial_rows_then_single_rows_guarded_by_loading() {
        let mut p = pager(1280);
        let first = p.initial_rows(Viewport::new(1280, 800));
        assert_eq!(first.slots.len(), 8);
        assert_eq!(first.slots[0].as_str(), "f0000");
        assert_eq!(first.slots[7].as_str(), "f0301");
        assert!(p.is_loading());

        assert!(p.next_row(RowTrigger::Scroll).is_none());
        p.finish_loading(first.generation);

        let row = p.next_row(RowTrigger::Sentinel).unwrap();
        assert_eq!(
            row.slots.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            vec!["f0002", "f0102", "f0202", "f0302"]
        );
        assert!(p.next_row(RowTrigger::Sentinel).is_none());
    }

    #[test]
    fn ceiling_stops_generation() {
        let cfg = FeedConfig {
            max_rows: 3,
            ..FeedConfig::default()
        };
        let mut p = FeedPager::new(cfg, Viewport::new(1280, 800));
        let first = p.initial_rows(Viewport::new(1280, 800));
        assert_eq!(p.rows_generated(), 2);
        p.finish_loading(first.generation);
        assert!(p.next_row(RowTrigger::Scroll).is_some());
        assert!(p.is_exhausted());
        p.finish_loading(0);
        assert!(p.next_row(RowTrigger::Scroll).is_none());
        assert_eq!(p.rows_generated(), 3);
    }

    #[test]
    fn resize_within_band_is_ignored() {
        let mut p = pager(1280);
        p.initial_rows(Viewport::new(1280, 800));
        assert_eq!(p.on_resize(Viewport::new(1366, 700)), ResizeOutcome::Unchanged);
        assert_eq!(p.generation(), 0);
    }

    #[test]
    fn resize_across_breakpoint_resets() {
        let mut p = pager(1280);
        let first = p.initial_rows(Viewport::new(1280, 800));
        p.finish_loading(first.generation);
        p.next_row(RowTrigger::Scroll);
        assert_eq!(p.rows_generated(), 3);

        let ResizeOutcome::Reset { initial } = p.on_resize(Viewport::new(600, 800)) else {
            panic!("expected reset");
        };
        assert_eq!(p.columns(), 2);
        assert_eq!(initial.generation, 1);
        // 2 cols at 600px → 300 wide, 375 tall → ceil(800/375) = 3 rows
        assert_eq!(initial.slots.len(), 6);
        assert_eq!(initial.slots[0].as_str(), "f0000");
        assert_eq!(p.rows_generated(), 3);

        // the stale completion from generation 0 does not unlock generation 1
        p.finish_loading(0);
        assert!(p.is_loading());
    }

    #[test]
    fn near_bottom_uses_margin() {
        let p = pager(1280);
        assert!(p.near_bottom(1_000.0, 800.0, 2_300.0));
        assert!(!p.near_bottom(0.0, 800.0, 2_300.0));
    }
}
