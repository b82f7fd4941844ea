use directories::ProjectDirs;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::*;

pub const GRAMMAR_KEY: &str = "lr1_grammar";
pub const BUILD_KEY: &str = "lr1_build_data";
pub const PARSE_KEY: &str = "lr1_parse_result";
pub const STATE_DIR_ENV: &str = "LR1VIEW_STATE_DIR";
const FALLBACK_STATE_DIR: &str = ".lr1view";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access session file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode session entry '{key}'")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Key/value persistence for the session, one opaque string per key.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl StoreConfig {
    /// `LR1VIEW_STATE_DIR`, else the platform data directory, else `.lr1view`.
    pub fn from_env() -> Self {
        let dir = std::env::var_os(STATE_DIR_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                ProjectDirs::from("", "", "lr1view").map(|dirs| dirs.data_dir().to_path_buf())
            })
            .unwrap_or_else(|| PathBuf::from(FALLBACK_STATE_DIR));
        Self { dir }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// One `<key>.json` file per entry under a directory created on first write.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { dir: config.dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&path)(err)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let path = self.path_for(key);
        fs::write(&path, value).map_err(io_error(&path))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&path)(err)),
        }
    }
}

/// Everything the viewer remembers between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Session {
    pub grammar: String,
    pub build: Option<BuildResponse>,
    pub parse: Option<ParseResponse>,
}

impl Session {
    /// Reads all three entries. An entry that no longer decodes or validates
    /// is logged and treated as absent.
    pub fn load(store: &dyn SessionStore) -> Result<Self, StoreError> {
        let grammar = read_entry::<String>(store, GRAMMAR_KEY)?.unwrap_or_default();

        let build = read_entry::<BuildResponse>(store, BUILD_KEY)?.filter(|build| {
            match build.validate() {
                Ok(()) => true,
                Err(err) => {
                    warn!(key = BUILD_KEY, error = %err, "dropping invalid cached build");
                    false
                }
            }
        });

        let parse = read_entry::<ParseResponse>(store, PARSE_KEY)?.filter(|parse| {
            match parse.validate() {
                Ok(()) => true,
                Err(err) => {
                    warn!(key = PARSE_KEY, error = %err, "dropping invalid cached parse");
                    false
                }
            }
        });

        Ok(Self {
            grammar,
            build,
            parse,
        })
    }

    pub fn save(&self, store: &dyn SessionStore) -> Result<(), StoreError> {
        write_entry(store, GRAMMAR_KEY, Some(&self.grammar))?;
        write_entry(store, BUILD_KEY, self.build.as_ref())?;
        write_entry(store, PARSE_KEY, self.parse.as_ref())?;
        debug!(
            has_build = self.build.is_some(),
            has_parse = self.parse.is_some(),
            "session saved"
        );
        Ok(())
    }

    pub fn record_build(&mut self, grammar: impl Into<String>, build: BuildResponse) {
        self.grammar = grammar.into();
        self.build = Some(build);
    }

    pub fn record_parse(&mut self, parse: ParseResponse) {
        self.parse = Some(parse);
    }

    pub fn has_grammar(&self) -> bool {
        !self.grammar.trim().is_empty()
    }

    /// Scene for the cached build, empty when nothing has been built yet.
    pub fn graph(&self) -> StateGraph {
        let states = self
            .build
            .as_ref()
            .map(|build| build.states.as_slice())
            .unwrap_or_default();
        StateGraph::from_states(states)
    }
}

fn read_entry<T: DeserializeOwned>(
    store: &dyn SessionStore,
    key: &'static str,
) -> Result<Option<T>, StoreError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(key, error = %err, "dropping cached entry that no longer decodes");
            Ok(None)
        }
    }
}

fn write_entry<T: Serialize + ?Sized>(
    store: &dyn SessionStore,
    key: &'static str,
    value: Option<&T>,
) -> Result<(), StoreError> {
    match value {
        Some(value) => {
            let encoded = serde_json::to_string(value)
                .map_err(|source| StoreError::Encode { key, source })?;
            store.set(key, &encoded)
        }
        None => store.remove(key),
    }
}
