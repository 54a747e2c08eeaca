//! Client-side persisted store (cookie semantics: named entry, expiry, path).
//!
//! The engine only ever reads and overwrites whole entries, so the trait is a
//! plain get/set. `FileJar` keeps entries in a JSON file the same way the
//! demo binary keeps state between runs.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One persisted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires: DateTime<Utc>,
    #[serde(default = "root_path")]
    pub path: String,
}

fn root_path() -> String {
    "/".to_string()
}

impl Cookie {
    /// Site-wide cookie (`path=/`) expiring `max_age_days` from `now`.
    pub fn site_wide(name: &str, value: String, max_age_days: i64, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            value,
            expires: now + Duration::days(max_age_days.max(0)),
            path: root_path(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

pub trait CookieJar: Send + Sync {
    /// Value of a live entry; expired entries read as absent.
    fn get(&self, name: &str) -> Option<String>;
    /// Overwrite (or create) the entry wholesale.
    fn set(&self, cookie: Cookie);
}

/// In-memory jar for tests and hosts that manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryJar {
    inner: Mutex<HashMap<String, Cookie>>,
}

impl MemoryJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry, including expired ones (diagnostics and tests).
    pub fn entry(&self, name: &str) -> Option<Cookie> {
        let g = self.inner.lock().expect("cookie jar mutex poisoned");
        g.get(name).cloned()
    }

    /// Store a raw value that expires in a year; handy for seeding tests.
    pub fn put_raw(&self, name: &str, value: &str) {
        self.set(Cookie::site_wide(name, value.to_string(), 365, Utc::now()));
    }
}

impl CookieJar for MemoryJar {
    fn get(&self, name: &str) -> Option<String> {
        let g = self.inner.lock().expect("cookie jar mutex poisoned");
        g.get(name)
            .filter(|c| !c.is_expired(Utc::now()))
            .map(|c| c.value.clone())
    }

    fn set(&self, cookie: Cookie) {
        let mut g = self.inner.lock().expect("cookie jar mutex poisoned");
        g.insert(cookie.name.clone(), cookie);
    }
}

/// JSON-file backed jar. Reads are served from memory; every write rewrites
/// the file (tmp + rename). IO errors are logged and never surface.
#[derive(Debug)]
pub struct FileJar {
    path: PathBuf,
    mem: MemoryJar,
}

impl FileJar {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mem = MemoryJar::new();
        match fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<Vec<Cookie>>(&s) {
                Ok(entries) => {
                    let now = Utc::now();
                    for c in entries.into_iter().filter(|c| !c.is_expired(now)) {
                        mem.set(c);
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "store", path = %path.display(), "unreadable cookie file: {e}")
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(target: "store", path = %path.display(), "cookie file: {e}")
            }
        }
        Self { path, mem }
    }

    fn flush(&self) -> std::io::Result<()> {
        let entries: Vec<Cookie> = {
            let g = self.mem.inner.lock().expect("cookie jar mutex poisoned");
            let mut v: Vec<Cookie> = g.values().cloned().collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            v
        };
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&entries).unwrap_or_default();
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&json)?;
        fs::rename(tmp, &self.path)?;
        Ok(())
    }
}

impl CookieJar for FileJar {
    fn get(&self, name: &str) -> Option<String> {
        self.mem.get(name)
    }

    fn set(&self, cookie: Cookie) {
        self.mem.set(cookie);
        if let Err(e) = self.flush() {
            tracing::warn!(target: "store", path = %self.path.display(), "write cookie file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_read_as_absent() {
        let jar = MemoryJar::new();
        let past = Utc::now() - Duration::days(400);
        jar.set(Cookie::site_wide("old", "x".into(), 365, past));
        assert_eq!(jar.get("old"), None);
        assert!(jar.entry("old").is_some());

        jar.put_raw("fresh", "y");
        assert_eq!(jar.get("fresh").as_deref(), Some("y"));
        assert_eq!(jar.entry("fresh").unwrap().path, "/");
    }

    #[test]
    fn file_jar_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cookies.json");

        let jar = FileJar::open(&path);
        jar.set(Cookie::site_wide("ta_seen", "%5B1%5D".into(), 365, Utc::now()));
        drop(jar);

        let again = FileJar::open(&path);
        assert_eq!(again.get("ta_seen").as_deref(), Some("%5B1%5D"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        fs::write(&path, "{not json").unwrap();
        let jar = FileJar::open(&path);
        assert_eq!(jar.get("anything"), None);
    }
}
