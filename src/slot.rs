//! # Slot naming
//! Compact, stable identifiers for rendering positions.
//!
//! An id is `<role-prefix><column:02x><row:02x>` for grid positions (feed
//! cells, in-article anchors), `<role-prefix><rank:02x>` for sidebar ranks,
//! and `i<name>` for free-form in-article inserts named by the page markup.
//! The same ids are the keys of the `widgets` map on the wire.

use std::fmt;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed set of slot roles. Each role owns a single prefix character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotRole {
    Feed,
    SidebarPreview,
    SidebarArticle,
    InArticle,
}

impl SlotRole {
    pub const ALL: [SlotRole; 4] = [
        SlotRole::Feed,
        SlotRole::SidebarPreview,
        SlotRole::SidebarArticle,
        SlotRole::InArticle,
    ];

    pub fn prefix(self) -> char {
        match self {
            SlotRole::Feed => 'f',
            SlotRole::SidebarPreview => 'p',
            SlotRole::SidebarArticle => 'a',
            SlotRole::InArticle => 'i',
        }
    }

    pub fn from_prefix(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.prefix() == c)
    }

    /// Sidebar roles carry a single rank instead of a column/row pair.
    pub fn is_ranked(self) -> bool {
        matches!(self, SlotRole::SidebarPreview | SlotRole::SidebarArticle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotIdError {
    #[error("slot id must not be empty")]
    Empty,
    #[error("unknown role prefix in slot id `{0}`")]
    UnknownRole(String),
    #[error("malformed slot id `{id}`: {reason}")]
    Malformed { id: String, reason: &'static str },
    #[error("sidebar slots have no column (got column {0})")]
    RankedColumn(u8),
    #[error("slot id `{0}` is a free-form insert and has no grid address")]
    NoAddress(String),
}

/// Logical position decoded from a [`SlotId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotAddress {
    pub role: SlotRole,
    pub column: u8,
    pub row: u8,
}

/// A validated slot identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotId(String);

const FREE_FORM_MAX: usize = 32;

fn free_form_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_-]+$").expect("static free-form slot regex"))
}

fn is_hex_lower(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl SlotId {
    /// Validate a raw id against the grammar of its role.
    pub fn parse(raw: &str) -> Result<Self, SlotIdError> {
        let mut chars = raw.chars();
        let prefix = chars.next().ok_or(SlotIdError::Empty)?;
        let role =
            SlotRole::from_prefix(prefix).ok_or_else(|| SlotIdError::UnknownRole(raw.into()))?;
        let rest = chars.as_str();

        let malformed = |reason| SlotIdError::Malformed {
            id: raw.to_string(),
            reason,
        };

        match role {
            SlotRole::Feed => {
                if rest.len() != 4 || !is_hex_lower(rest) {
                    return Err(malformed("feed ids need four lowercase hex digits"));
                }
            }
            SlotRole::SidebarPreview | SlotRole::SidebarArticle => {
                if rest.len() != 2 || !is_hex_lower(rest) {
                    return Err(malformed("sidebar ids need two lowercase hex digits"));
                }
            }
            SlotRole::InArticle => {
                if rest.is_empty() || rest.len() > FREE_FORM_MAX {
                    return Err(malformed("in-article name must be 1..=32 chars"));
                }
                if !free_form_re().is_match(rest) {
                    return Err(malformed("in-article name allows [a-z0-9_-] only"));
                }
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// Free-form in-article id from a name embedded in page markup.
    /// The `i` prefix is always added, so distinct names stay distinct.
    /// Names shaped like a grid address (four hex digits) are refused.
    pub fn in_article(name: &str) -> Result<Self, SlotIdError> {
        let name = name.trim().to_ascii_lowercase();
        if name.len() == 4 && is_hex_lower(&name) {
            return Err(SlotIdError::Malformed {
                id: format!("i{name}"),
                reason: "in-article name collides with a grid address",
            });
        }
        Self::parse(&format!("i{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn role(&self) -> SlotRole {
        // Validated on construction, so the prefix is always known.
        self.0
            .chars()
            .next()
            .and_then(SlotRole::from_prefix)
            .unwrap_or(SlotRole::InArticle)
    }

    /// Grid address, if this id has one.
    pub fn address(&self) -> Option<SlotAddress> {
        SlotNamer::parse(self).ok()
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SlotId {
    type Error = SlotIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SlotId> for String {
    fn from(value: SlotId) -> Self {
        value.0
    }
}

/// Pure naming functions. No counters: the same position always yields the
/// same id, so a retried or re-derived slot hits the same rendering target.
pub struct SlotNamer;

impl SlotNamer {
    pub fn name(role: SlotRole, column: u8, row: u8) -> Result<SlotId, SlotIdError> {
        let p = role.prefix();
        let raw = if role.is_ranked() {
            if column != 0 {
                return Err(SlotIdError::RankedColumn(column));
            }
            format!("{p}{row:02x}")
        } else {
            format!("{p}{column:02x}{row:02x}")
        };
        Ok(SlotId(raw))
    }

    pub fn feed(column: u8, row: u8) -> SlotId {
        SlotId(format!("{}{column:02x}{row:02x}", SlotRole::Feed.prefix()))
    }

    pub fn sidebar(role: SlotRole, rank: u8) -> Result<SlotId, SlotIdError> {
        Self::name(role, 0, rank)
    }

    pub fn parse(id: &SlotId) -> Result<SlotAddress, SlotIdError> {
        let role = id.role();
        let rest = &id.0[1..];
        let hex = |s: &str| {
            u8::from_str_radix(s, 16).map_err(|_| SlotIdError::NoAddress(id.0.clone()))
        };

        if role.is_ranked() {
            return Ok(SlotAddress {
                role,
                column: 0,
                row: hex(rest)?,
            });
        }
        if rest.len() != 4 || !is_hex_lower(rest) {
            return Err(SlotIdError::NoAddress(id.0.clone()));
        }
        Ok(SlotAddress {
            role,
            column: hex(&rest[..2])?,
            row: hex(&rest[2..])?,
        })
    }
}
