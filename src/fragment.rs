use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Storage backend for cached template fragments
pub trait CacheStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    fn delete_many(&mut self, keys: &[String]) -> Result<()>;
}

/// How long a cached fragment stays valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTimeout {
    /// Cache the rendered fragment, optionally expiring after N seconds
    Ttl(Option<u64>),
    /// Invalidate the stored fragment and recompute it
    Refresh,
}

/// Get-or-render cache for rendered template fragments.
///
/// Keys are caller-supplied parts (template name, page number, locale, ...)
/// joined into one store key. A miss renders the fragment and stores it; a
/// hit returns the stored markup without rendering. [`CacheTimeout::Refresh`]
/// drops the stored fragment and returns a fresh render without re-caching.
/// Store and render failures propagate to the caller.
pub struct FragmentCache<S: CacheStore> {
    store: S,
}

impl<S: CacheStore> FragmentCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn cached<F>(&mut self, keys: &[String], timeout: CacheTimeout, render: F) -> Result<String>
    where
        F: FnOnce() -> Result<String>,
    {
        let key = cache_key(keys);

        let seconds = match timeout {
            CacheTimeout::Refresh => {
                self.store.delete_many(&[key])?;
                return render();
            }
            CacheTimeout::Ttl(seconds) => seconds,
        };

        if let Some(hit) = self.store.get(&key)? {
            return Ok(hit);
        }

        let rendered = render()?;
        self.store
            .set(&key, &rendered, seconds.map(Duration::from_secs))?;

        Ok(rendered)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

/// Join key parts into a single store key, hashing over-long keys so they
/// stay usable as file names.
pub fn cache_key(parts: &[String]) -> String {
    let joined = parts.join("_");

    const MAX_LEN: usize = 200;
    if joined.len() > MAX_LEN {
        let hash = blake3::hash(joined.as_bytes());
        // Key parts are arbitrary text; back up to a char boundary before
        // slicing.
        let mut cut = 180;
        while !joined.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}-{}", &joined[..cut], &hash.to_hex()[..16])
    } else {
        joined
    }
}

/// Default cache key for a fragment: the template name plus the line the
/// fragment starts on.
pub fn fragment_key(template_name: &str, line: u32) -> String {
    format!("{}{}", template_name, line)
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process store, dropped with the owning process
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entry = match self.entries.get(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if let Some(expires_at) = entry.expires_at {
            if Instant::now() >= expires_at {
                return Ok(None);
            }
        }

        Ok(Some(entry.value.clone()))
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    fn delete_many(&mut self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    stored_at: String,
    ttl_seconds: Option<u64>,
}

/// JSON-file-backed store that survives process restarts
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonFileStore {
    #[serde(skip)]
    path: PathBuf,
    entries: HashMap<String, FileEntry>,
}

impl JsonFileStore {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read fragment cache {:?}", path))?;
            let mut store: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse fragment cache {:?}", path))?;
            store.path = path.to_path_buf();
            Ok(store)
        } else {
            Ok(Self {
                path: path.to_path_buf(),
                entries: HashMap::new(),
            })
        }
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write fragment cache {:?}", self.path))?;
        Ok(())
    }

    fn is_expired(entry: &FileEntry) -> bool {
        let ttl = match entry.ttl_seconds {
            Some(ttl) => ttl,
            None => return false,
        };
        let stored_at = match chrono::DateTime::parse_from_rfc3339(&entry.stored_at) {
            Ok(stored_at) => stored_at,
            // Unreadable timestamp: treat the entry as stale.
            Err(_) => return true,
        };

        let age = chrono::Utc::now().signed_duration_since(stored_at);
        age.num_seconds() >= ttl as i64
    }
}

impl CacheStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entry = match self.entries.get(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if Self::is_expired(entry) {
            return Ok(None);
        }

        Ok(Some(entry.value.clone()))
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            FileEntry {
                value: value.to_string(),
                stored_at: chrono::Utc::now().to_rfc3339(),
                ttl_seconds: ttl.map(|ttl| ttl.as_secs()),
            },
        );
        self.save()
    }

    fn delete_many(&mut self, keys: &[String]) -> Result<()> {
        let mut changed = false;
        for key in keys {
            changed |= self.entries.remove(key).is_some();
        }
        if changed {
            self.save()?;
        }
        Ok(())
    }
}
