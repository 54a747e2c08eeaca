//! # Seen memory
//! Two-tier view dedup state.
//!
//! * short-term: ids seen on this page instance, never persisted.
//! * long-term: bounded, ordered id sequence persisted in a cookie
//!   (JSON array, percent-encoded, one year, `path=/`).
//!
//! The long-term tier is owned by the jar: it is read fresh for every request
//! and overwritten wholesale after every response. A companion entry
//! (`<cookie>_src`) records who wrote the sequence last; the local capacity
//! only bounds sequences the client wrote itself.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use metrics::gauge;
use url::form_urlencoded;

use crate::config::MemoryConfig;
use crate::store::{Cookie, CookieJar};

pub type ItemId = u64;

const ORIGIN_SERVER: &str = "server";
const ORIGIN_LOCAL: &str = "local";

/// What a request carries of the visitor's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSnapshot {
    pub page: Vec<ItemId>,
    pub long_term: Vec<ItemId>,
}

pub struct SeenMemory {
    short_order: Vec<ItemId>,
    short_set: HashSet<ItemId>,
    jar: Arc<dyn CookieJar>,
    cookie_name: String,
    origin_cookie: String,
    max_age_days: i64,
    capacity: usize,
}

impl SeenMemory {
    pub fn new(jar: Arc<dyn CookieJar>, cfg: &MemoryConfig) -> Self {
        Self {
            short_order: Vec::new(),
            short_set: HashSet::new(),
            jar,
            cookie_name: cfg.cookie_name.clone(),
            origin_cookie: format!("{}_src", cfg.cookie_name),
            max_age_days: cfg.cookie_max_age_days,
            capacity: cfg.long_term_capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if the id was not yet known on this page.
    pub fn record_short_term(&mut self, id: ItemId) -> bool {
        if !self.short_set.insert(id) {
            return false;
        }
        self.short_order.push(id);
        true
    }

    pub fn record_short_term_all(&mut self, ids: &[ItemId]) -> usize {
        ids.iter().filter(|id| self.record_short_term(**id)).count()
    }

    pub fn seen_on_page(&self, id: ItemId) -> bool {
        self.short_set.contains(&id)
    }

    /// Short-term ids in first-seen order.
    pub fn short_term(&self) -> &[ItemId] {
        &self.short_order
    }

    /// Decode the persisted sequence. Absent or malformed state reads as
    /// empty, and so does a client-written sequence over capacity. A
    /// sequence last written by the collaborator is returned as stored.
    pub fn read_long_term(&self) -> Vec<ItemId> {
        let Some(raw) = self.jar.get(&self.cookie_name) else {
            return Vec::new();
        };
        match decode_ids(&raw) {
            Some(ids) if ids.len() <= self.capacity || self.written_by_server() => ids,
            Some(ids) => {
                tracing::warn!(
                    target: "seen",
                    len = ids.len(),
                    capacity = self.capacity,
                    "persisted long-term memory exceeds capacity; ignoring"
                );
                Vec::new()
            }
            None => {
                tracing::warn!(target: "seen", cookie = %self.cookie_name, "malformed long-term memory; ignoring");
                Vec::new()
            }
        }
    }

    /// Replace the persisted sequence with the collaborator's list, verbatim.
    /// No local truncation or dedup happens on this path.
    pub fn merge_long_term(&mut self, authoritative: &[ItemId]) {
        self.write_long_term(authoritative, ORIGIN_SERVER);
    }

    /// Local-only path: append ids (a repeat moves to the most recent
    /// position), evict the oldest beyond capacity, persist.
    pub fn remember_long_term_local(&mut self, ids: &[ItemId]) {
        let mut seq = self.read_long_term();
        for id in ids {
            seq.retain(|x| x != id);
            seq.push(*id);
        }
        self.evict_if_over_capacity(&mut seq);
        self.write_long_term(&seq, ORIGIN_LOCAL);
    }

    /// Drop oldest entries until `seq` fits the capacity.
    pub fn evict_if_over_capacity(&self, seq: &mut Vec<ItemId>) {
        if seq.len() > self.capacity {
            let excess = seq.len() - self.capacity;
            seq.drain(0..excess);
        }
    }

    pub fn snapshot(&self) -> SeenSnapshot {
        SeenSnapshot {
            page: self.short_order.clone(),
            long_term: self.read_long_term(),
        }
    }

    fn written_by_server(&self) -> bool {
        self.jar.get(&self.origin_cookie).as_deref() == Some(ORIGIN_SERVER)
    }

    fn write_long_term(&mut self, seq: &[ItemId], origin: &str) {
        let now = Utc::now();
        self.jar.set(Cookie::site_wide(
            &self.cookie_name,
            encode_ids(seq),
            self.max_age_days,
            now,
        ));
        self.jar.set(Cookie::site_wide(
            &self.origin_cookie,
            origin.to_string(),
            self.max_age_days,
            now,
        ));
        gauge!("seen_long_term_len").set(seq.len() as f64);
    }
}

/// JSON array, then percent-encoded.
pub fn encode_ids(ids: &[ItemId]) -> String {
    let json = serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string());
    form_urlencoded::byte_serialize(json.as_bytes()).collect()
}

/// Inverse of [`encode_ids`]; `None` on anything that is not a JSON array of
/// non-negative integers.
pub fn decode_ids(raw: &str) -> Option<Vec<ItemId>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    // A single bare token decodes as one key with an empty value.
    let decoded: String = form_urlencoded::parse(raw.as_bytes())
        .map(|(k, _)| k.into_owned())
        .collect::<Vec<_>>()
        .join("&");
    serde_json::from_str::<Vec<ItemId>>(&decoded).ok()
}
