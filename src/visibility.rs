//! # Visibility tracking
//! Turns passive rendering into dedup state.
//!
//! Each rendered target goes Unobserved → Observing → Confirmed. The first
//! intersection at or above the threshold confirms the view, records the
//! item into short-term memory, and stops observation for good.

use std::collections::HashMap;

use metrics::counter;

use crate::seen::{ItemId, SeenMemory};
use crate::slot::SlotId;

/// What an intersection event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Slot(SlotId),
    /// Marker after the last feed row.
    Sentinel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionEntry {
    pub target: Target,
    /// Visible fraction of the target, 0.0..=1.0.
    pub ratio: f32,
}

impl IntersectionEntry {
    pub fn slot(slot: SlotId, ratio: f32) -> Self {
        Self {
            target: Target::Slot(slot),
            ratio,
        }
    }

    pub fn sentinel(ratio: f32) -> Self {
        Self {
            target: Target::Sentinel,
            ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Unobserved,
    Observing,
    Confirmed,
}

#[derive(Debug)]
pub struct VisibilityTracker {
    threshold: f32,
    /// Item currently rendered per slot, while it is being observed.
    observing: HashMap<SlotId, ItemId>,
    confirmed: HashMap<SlotId, Vec<ItemId>>,
}

impl VisibilityTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            observing: HashMap::new(),
            confirmed: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn state(&self, slot: &SlotId, item: ItemId) -> ViewState {
        if self
            .confirmed
            .get(slot)
            .is_some_and(|items| items.contains(&item))
        {
            ViewState::Confirmed
        } else if self.observing.get(slot) == Some(&item) {
            ViewState::Observing
        } else {
            ViewState::Unobserved
        }
    }

    /// Start observing a freshly rendered target. Returns `false` if the
    /// target is already observed or confirmed.
    pub fn observe(&mut self, slot: SlotId, item: ItemId) -> bool {
        if self.state(&slot, item) != ViewState::Unobserved {
            return false;
        }
        self.observing.insert(slot, item);
        true
    }

    /// Drop observation of a target removed from the page.
    pub fn discard(&mut self, slot: &SlotId) {
        self.observing.remove(slot);
    }

    pub fn observing_count(&self) -> usize {
        self.observing.len()
    }

    /// Process one batch of slot intersections. Sentinel entries are ignored
    /// here. Returns the items confirmed by this batch, in entry order.
    pub fn on_intersections(
        &mut self,
        entries: &[IntersectionEntry],
        seen: &mut SeenMemory,
    ) -> Vec<ItemId> {
        let mut out = Vec::new();
        for e in entries {
            let Target::Slot(slot) = &e.target else {
                continue;
            };
            if e.ratio < self.threshold {
                continue;
            }
            let Some(item) = self.observing.remove(slot) else {
                continue;
            };
            self.confirmed.entry(slot.clone()).or_default().push(item);
            seen.record_short_term(item);
            counter!("slot_views_confirmed_total").increment(1);
            tracing::debug!(target: "visibility", slot = %slot, item, ratio = e.ratio, "view confirmed");
            out.push(item);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::slot::SlotNamer;
    use crate::store::MemoryJar;
    use std::sync::Arc;

    fn seen() -> SeenMemory {
        SeenMemory::new(Arc::new(MemoryJar::new()), &MemoryConfig::default())
    }

    #[test]
    fn below_threshold_keeps_observing() {
        let mut t = VisibilityTracker::new(0.5);
        let mut s = seen();
        let slot = SlotNamer::feed(0, 0);
        assert!(t.observe(slot.clone(), 11));
        assert!(t
            .on_intersections(&[IntersectionEntry::slot(slot.clone(), 0.49)], &mut s)
            .is_empty());
        assert_eq!(t.state(&slot, 11), ViewState::Observing);
        assert!(s.short_term().is_empty());
    }

    #[test]
    fn confirmation_is_terminal_and_recorded_once() {
        let mut t = VisibilityTracker::new(0.5);
        let mut s = seen();
        let slot = SlotNamer::feed(1, 0);
        t.observe(slot.clone(), 42);

        let first = t.on_intersections(&[IntersectionEntry::slot(slot.clone(), 0.5)], &mut s);
        assert_eq!(first, vec![42]);
        assert_eq!(t.state(&slot, 42), ViewState::Confirmed);

        for ratio in [0.2, 0.9, 1.0] {
            let again = t.on_intersections(&[IntersectionEntry::slot(slot.clone(), ratio)], &mut s);
            assert!(again.is_empty());
        }
        assert!(!t.observe(slot.clone(), 42));
        assert_eq!(s.short_term(), &[42]);
    }

    #[test]
    fn simultaneous_entries_are_independent() {
        let mut t = VisibilityTracker::new(0.5);
        let mut s = seen();
        let a = SlotNamer::feed(0, 2);
        let b = SlotNamer::feed(1, 2);
        let c = SlotNamer::feed(2, 2);
        t.observe(a.clone(), 1);
        t.observe(b.clone(), 2);
        t.observe(c.clone(), 3);

        let got = t.on_intersections(
            &[
                IntersectionEntry::slot(a.clone(), 0.8),
                IntersectionEntry::slot(b.clone(), 0.1),
                IntersectionEntry::slot(c.clone(), 0.6),
                IntersectionEntry::slot(a.clone(), 1.0),
                IntersectionEntry::sentinel(1.0),
            ],
            &mut s,
        );
        assert_eq!(got, vec![1, 3]);
        assert_eq!(t.state(&b, 2), ViewState::Observing);
        assert_eq!(t.observing_count(), 1);
    }

    #[test]
    fn discarded_target_never_confirms() {
        let mut t = VisibilityTracker::new(0.5);
        let mut s = seen();
        let slot = SlotNamer::feed(0, 0);
        t.observe(slot.clone(), 9);
        t.discard(&slot);
        assert!(t
            .on_intersections(&[IntersectionEntry::slot(slot.clone(), 1.0)], &mut s)
            .is_empty());
        assert_eq!(t.state(&slot, 9), ViewState::Unobserved);
    }

    #[test]
    fn slot_reused_after_reset_tracks_new_item() {
        let mut t = VisibilityTracker::new(0.5);
        let mut s = seen();
        let slot = SlotNamer::feed(0, 0);
        t.observe(slot.clone(), 1);
        t.on_intersections(&[IntersectionEntry::slot(slot.clone(), 1.0)], &mut s);
        assert!(t.observe(slot.clone(), 2));
        let got = t.on_intersections(&[IntersectionEntry::slot(slot.clone(), 1.0)], &mut s);
        assert_eq!(got, vec![2]);
        assert_eq!(s.short_term(), &[1, 2]);
    }
}
