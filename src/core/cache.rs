// EN: src/core/cache.rs

use crate::{
    constants::{
        CACHE_KEY_DATA, CACHE_KEY_HISTORY, CACHE_KEY_LOCALS, CACHE_KEY_TIMESTAMP,
        DEFAULT_CACHE_TTL_SECS, ENVELOPE_KEY, INTERNAL_KEY_PREFIX,
    },
    core::{
        config_loader::value_to_string,
        crypto::{CacheCipher, CryptoError},
    },
    error::AliasError,
    models::Record,
};
use log::{debug, warn};
use serde_json::{Map, Value, json};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Could not replace cache file atomically: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Cached output of one dynamic source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub timestamp: u64,
    pub data: Vec<Record>,
}

impl CacheEntry {
    /// An entry stored at `t0` with ttl `T` is valid for reads at `t < t0 + T`.
    pub fn is_valid_at(&self, now: u64, ttl: u64) -> bool {
        now < self.timestamp.saturating_add(ttl)
    }
}

/// What a clear operation removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    /// Every source entry; history and locals are kept.
    Cache,
    History,
    Locals,
    /// Deletes the cache file.
    All,
}

/// The logical (decrypted) cache document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDocument {
    pub entries: BTreeMap<String, CacheEntry>,
    pub history: Vec<String>,
    pub locals: BTreeMap<String, String>,
    /// Keys kept verbatim: unknown internal keys, and entries without the
    /// `{timestamp, data: [object...]}` shape. Never read as source data.
    pub extra: BTreeMap<String, Value>,
}

impl CacheDocument {
    /// Reads the document shape. Record values are stored as strings;
    /// anything that does not fit the shape is kept in `extra`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut document = Self::default();

        for (key, value) in map {
            match key.as_str() {
                CACHE_KEY_HISTORY => {
                    document.history = value
                        .as_array()
                        .map(|lines| lines.iter().map(value_to_string).collect())
                        .unwrap_or_default();
                }
                CACHE_KEY_LOCALS => {
                    document.locals = value
                        .as_object()
                        .map(|locals| {
                            locals
                                .iter()
                                .map(|(k, v)| (k.clone(), value_to_string(v)))
                                .collect()
                        })
                        .unwrap_or_default();
                }
                name if name.starts_with(INTERNAL_KEY_PREFIX) => {
                    debug!("Keeping unknown internal cache key '{}'", name);
                    document.extra.insert(name.to_string(), value.clone());
                }
                name => match parse_entry(value) {
                    Some(entry) => {
                        document.entries.insert(name.to_string(), entry);
                    }
                    None => {
                        debug!("Keeping malformed cache entry '{}' verbatim", name);
                        document.extra.insert(name.to_string(), value.clone());
                    }
                },
            }
        }
        Some(document)
    }

    pub fn to_value(&self) -> Value {
        let mut map: Map<String, Value> = self
            .extra
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        map.insert(CACHE_KEY_HISTORY.to_string(), json!(self.history));
        map.insert(CACHE_KEY_LOCALS.to_string(), json!(self.locals));
        for (name, entry) in &self.entries {
            map.insert(
                name.clone(),
                json!({
                    CACHE_KEY_TIMESTAMP: entry.timestamp,
                    CACHE_KEY_DATA: entry.data,
                }),
            );
        }
        Value::Object(map)
    }
}

fn parse_entry(value: &Value) -> Option<CacheEntry> {
    let timestamp = value.get(CACHE_KEY_TIMESTAMP)?.as_u64()?;
    let data = value
        .get(CACHE_KEY_DATA)?
        .as_array()?
        .iter()
        .map(|item| {
            item.as_object().map(|record| {
                record
                    .iter()
                    .map(|(k, v)| (k.clone(), value_to_string(v)))
                    .collect()
            })
        })
        .collect::<Option<Vec<Record>>>()?;
    Some(CacheEntry { timestamp, data })
}

/// Encrypted, TTL-aware persistent store for source data, history and locals.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    cipher: CacheCipher,
    document: CacheDocument,
    /// Set on any mutation, or when the file on disk must be rewritten
    /// (plaintext legacy file, unreadable file).
    dirty: bool,
}

impl CacheStore {
    /// An empty store bound to `path`. Nothing is read from disk.
    pub fn empty(path: impl Into<PathBuf>, cipher: CacheCipher) -> Self {
        Self {
            path: path.into(),
            cipher,
            document: CacheDocument::default(),
            dirty: false,
        }
    }

    /// Loads the store from `path`.
    ///
    /// 1. A missing file yields an empty store.
    /// 2. A `_crypt` envelope is decrypted; anything else is treated as a
    ///    legacy plaintext document and flagged for re-encryption.
    /// 3. Entries already expired according to `ttls` (falling back to the
    ///    default ttl for sources no longer declared) are dropped.
    ///
    /// Unreadable content never fails the load: it is logged and the store
    /// starts empty, to be rewritten on the next save.
    pub fn load(
        path: impl Into<PathBuf>,
        cipher: CacheCipher,
        ttls: &HashMap<String, u64>,
        now: u64,
    ) -> Self {
        let mut store = Self::empty(path, cipher);
        if !store.path.exists() {
            debug!("No cache file at '{}'", store.path.display());
            return store;
        }

        match store.read_document() {
            Ok((document, was_plaintext)) => {
                store.document = document;
                store.dirty = was_plaintext && store.path_has_content();
            }
            Err(e) => {
                warn!("{} ('{}'); starting empty", e, store.path.display());
                store.dirty = true;
            }
        }

        let before = store.document.entries.len();
        store.document.entries.retain(|name, entry| {
            let ttl = ttls.get(name).copied().unwrap_or(DEFAULT_CACHE_TTL_SECS);
            entry.is_valid_at(now, ttl)
        });
        let dropped = before - store.document.entries.len();
        if dropped > 0 {
            debug!("Dropped {} expired cache entr(ies) at load", dropped);
            store.dirty = true;
        }
        store
    }

    fn path_has_content(&self) -> bool {
        self.document != CacheDocument::default()
    }

    /// Returns the decrypted document and whether it was stored in plaintext.
    /// Content that cannot be read back as a cache document is
    /// [`AliasError::CacheCorruption`].
    fn read_document(&self) -> Result<(CacheDocument, bool), AliasError> {
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok((CacheDocument::default(), false));
        }
        let outer: Value = serde_json::from_str(&raw).map_err(corruption)?;

        match outer.get(ENVELOPE_KEY) {
            Some(sealed) => {
                let sealed = sealed.as_str().ok_or_else(|| {
                    AliasError::CacheCorruption(format!("'{ENVELOPE_KEY}' is not a string"))
                })?;
                let plaintext = self.cipher.open(sealed).map_err(corruption)?;
                let inner: Value = serde_json::from_slice(&plaintext).map_err(corruption)?;
                let document = CacheDocument::from_value(&inner).ok_or_else(|| {
                    AliasError::CacheCorruption("decrypted cache is not a JSON object".to_string())
                })?;
                Ok((document, false))
            }
            None => {
                let document = CacheDocument::from_value(&outer).ok_or_else(|| {
                    AliasError::CacheCorruption("cache is not a JSON object".to_string())
                })?;
                debug!("Loaded legacy plaintext cache; it will be encrypted on save");
                Ok((document, true))
            }
        }
    }

    /// Encrypts the document and atomically replaces the cache file.
    pub fn save(&mut self) -> Result<(), CacheError> {
        let plaintext = serde_json::to_vec(&self.document.to_value())?;
        let sealed = self.cipher.seal(&plaintext)?;
        let envelope = serde_json::to_vec(&json!({ ENVELOPE_KEY: sealed }))?;
        write_atomic(&self.path, &envelope)?;
        self.dirty = false;
        debug!("Saved cache to '{}'", self.path.display());
        Ok(())
    }

    /// Whether a save would change anything on disk.
    pub fn needs_saving(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &CacheDocument {
        &self.document
    }

    /// The decrypted document, pretty-printed.
    pub fn dump(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string_pretty(&self.document.to_value())?)
    }

    // --- Source entries ---

    /// The cached data of `name` if it is still valid at `now`.
    pub fn fresh(&self, name: &str, ttl: u64, now: u64) -> Option<&[Record]> {
        self.document
            .entries
            .get(name)
            .filter(|entry| entry.is_valid_at(now, ttl))
            .map(|entry| entry.data.as_slice())
    }

    pub fn put(&mut self, name: &str, data: Vec<Record>, now: u64) {
        self.document.extra.remove(name);
        self.document.entries.insert(
            name.to_string(),
            CacheEntry {
                timestamp: now,
                data,
            },
        );
        self.dirty = true;
    }

    // --- History ---

    /// Appends a raw input line and keeps only the newest `limit` lines.
    pub fn push_history(&mut self, line: &str, limit: usize) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let history = &mut self.document.history;
        history.push(line.to_string());
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
        self.dirty = true;
    }

    pub fn history(&self) -> &[String] {
        &self.document.history
    }

    // --- Locals ---

    pub fn set_local(&mut self, key: &str, value: &str) {
        self.document
            .locals
            .insert(key.to_string(), value.to_string());
        self.dirty = true;
    }

    pub fn local(&self, key: &str) -> Option<&str> {
        self.document.locals.get(key).map(String::as_str)
    }

    pub fn locals(&self) -> &BTreeMap<String, String> {
        &self.document.locals
    }

    // --- Clearing ---

    /// Clears `scope` and returns how many items were removed. For
    /// [`ClearScope::All`] the file is deleted immediately and the return
    /// value is 1 if a file existed.
    pub fn clear(&mut self, scope: ClearScope) -> Result<usize, CacheError> {
        let removed = match scope {
            ClearScope::Cache => {
                let extra = &mut self.document.extra;
                let malformed = extra.len();
                extra.retain(|key, _| key.starts_with(INTERNAL_KEY_PREFIX));
                std::mem::take(&mut self.document.entries).len() + malformed - extra.len()
            }
            ClearScope::History => std::mem::take(&mut self.document.history).len(),
            ClearScope::Locals => std::mem::take(&mut self.document.locals).len(),
            ClearScope::All => {
                self.document = CacheDocument::default();
                self.dirty = false;
                return match fs::remove_file(&self.path) {
                    Ok(()) => Ok(1),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                    Err(e) => Err(e.into()),
                };
            }
        };
        if removed > 0 {
            self.dirty = true;
        }
        Ok(removed)
    }
}

fn corruption(err: impl std::fmt::Display) -> AliasError {
    AliasError::CacheCorruption(err.to_string())
}

/// Writes `bytes` to a temporary file next to `path` and renames it over
/// `path`, so a reader sees either the old or the new file, never a mix.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cipher() -> CacheCipher {
        CacheCipher::from_machine_id("test-machine")
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_save_then_load_round_trips_the_document() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = CacheStore::empty(&path, cipher());
        store.put("servers", vec![record(&[("name", "prod")])], 1_000);
        store.push_history("ssh prod", 20);
        store.set_local("token", "abc");

        // --- Execute ---
        store.save().unwrap();
        let loaded = CacheStore::load(&path, cipher(), &HashMap::new(), 1_010);

        // --- Assert ---
        assert_eq!(loaded.document(), store.document());
        assert!(!loaded.needs_saving());
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains(ENVELOPE_KEY));
        assert!(!raw.contains("prod"));
    }

    #[test]
    fn test_legacy_plaintext_is_reencrypted_on_save() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let legacy = json!({
            "_history": ["deploy api"],
            "_locals": {"env": "staging"},
            "_version": 2,
            "pods": {"timestamp": 100, "data": [{"name": "api-1", "restarts": "3"}]},
            "odd": {"timestamp": 100, "data": ["not a record"]}
        });
        fs::write(&path, legacy.to_string()).unwrap();
        let ttls = HashMap::from([("pods".to_string(), 300)]);

        // --- Execute ---
        let mut store = CacheStore::load(&path, cipher(), &ttls, 150);
        assert!(store.needs_saving());
        store.save().unwrap();

        // --- Assert ---
        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let sealed = raw[ENVELOPE_KEY].as_str().unwrap();
        let opened: Value = serde_json::from_slice(&cipher().open(sealed).unwrap()).unwrap();
        assert_eq!(opened, legacy);
    }

    #[test]
    fn test_non_string_record_values_are_stored_as_their_json_text() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let legacy = json!({
            "pods": {"timestamp": 100, "data": [{"name": "api-1", "restarts": 3, "ready": true}]}
        });
        fs::write(&path, legacy.to_string()).unwrap();

        // --- Execute ---
        let store = CacheStore::load(&path, cipher(), &HashMap::new(), 150);

        // --- Assert ---
        let data = store.fresh("pods", 300, 150).unwrap();
        assert_eq!(data[0]["restarts"], "3");
        assert_eq!(data[0]["ready"], "true");
    }

    #[test]
    fn test_clear_cache_drops_malformed_entries_but_keeps_internal_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let legacy = json!({
            "_version": 2,
            "pods": {"timestamp": 100, "data": [{"name": "api-1"}]},
            "odd": {"stamp": "yesterday"}
        });
        fs::write(&path, legacy.to_string()).unwrap();
        let mut store = CacheStore::load(&path, cipher(), &HashMap::new(), 150);

        assert_eq!(store.clear(ClearScope::Cache).unwrap(), 2);

        assert_eq!(store.document().to_value().get("_version"), Some(&json!(2)));
        assert!(store.document().to_value().get("odd").is_none());
    }

    #[test]
    fn test_expired_entries_are_dropped_at_load() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = CacheStore::empty(&path, cipher());
        store.put("fast", vec![record(&[("k", "v")])], 1_000);
        store.put("slow", vec![record(&[("k", "v")])], 1_000);
        store.save().unwrap();
        let ttls = HashMap::from([("fast".to_string(), 10), ("slow".to_string(), 100)]);

        // --- Execute ---
        let loaded = CacheStore::load(&path, cipher(), &ttls, 1_010);

        // --- Assert ---
        assert!(!loaded.document().entries.contains_key("fast"));
        assert!(loaded.document().entries.contains_key("slow"));
        assert!(loaded.needs_saving());
    }

    #[test]
    fn test_fresh_respects_the_ttl_boundary() {
        let mut store = CacheStore::empty("unused.json", cipher());
        store.put("s", vec![record(&[("k", "v")])], 1_000);

        assert!(store.fresh("s", 60, 1_059).is_some());
        assert!(store.fresh("s", 60, 1_060).is_none());
        assert!(store.fresh("missing", 60, 1_000).is_none());
    }

    #[test]
    fn test_corrupted_file_recovers_as_empty() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{\"_crypt\": \"00ff\"").unwrap();

        // --- Execute ---
        let store = CacheStore::load(&path, cipher(), &HashMap::new(), 0);

        // --- Assert ---
        assert_eq!(store.document(), &CacheDocument::default());
        assert!(store.needs_saving());
    }

    #[test]
    fn test_corrupted_envelope_is_reported_as_corruption() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{\"_crypt\": \"not-hex\"}").unwrap();
        let unloaded = CacheStore::empty(&path, cipher());

        // --- Execute ---
        let read = unloaded.read_document();
        let store = CacheStore::load(&path, cipher(), &HashMap::new(), 0);

        // --- Assert ---
        assert!(matches!(read, Err(AliasError::CacheCorruption(_))));
        assert_eq!(store.document(), &CacheDocument::default());
        assert!(store.needs_saving());
    }

    #[test]
    fn test_file_from_another_machine_recovers_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut foreign = CacheStore::empty(&path, CacheCipher::from_machine_id("elsewhere"));
        foreign.set_local("k", "v");
        foreign.save().unwrap();

        let store = CacheStore::load(&path, cipher(), &HashMap::new(), 0);
        assert!(store.locals().is_empty());
    }

    #[test]
    fn test_history_keeps_newest_lines() {
        let mut store = CacheStore::empty("unused.json", cipher());
        for i in 0..5 {
            store.push_history(&format!("cmd {i}"), 3);
        }
        assert_eq!(store.history(), ["cmd 2", "cmd 3", "cmd 4"]);
    }

    #[test]
    fn test_clear_scopes() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = CacheStore::empty(&path, cipher());
        store.put("a", vec![], 0);
        store.put("b", vec![], 0);
        store.push_history("x", 20);
        store.set_local("k", "v");
        store.save().unwrap();

        // --- Execute & Assert ---
        assert_eq!(store.clear(ClearScope::Cache).unwrap(), 2);
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.clear(ClearScope::History).unwrap(), 1);
        assert_eq!(store.local("k"), Some("v"));
        assert_eq!(store.clear(ClearScope::Locals).unwrap(), 1);
        assert_eq!(store.clear(ClearScope::All).unwrap(), 1);
        assert!(!path.exists());
        assert_eq!(store.clear(ClearScope::All).unwrap(), 0);
    }
}
