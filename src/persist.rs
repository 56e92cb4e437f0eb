use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::case::CaseColumn;

/// Opaque key/value storage for UI state.
pub trait UiStateStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    /// Bumped on every `set`.
    fn version(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: HashMap<String, String>,
    version: u64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UiStateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.values.insert(key.to_owned(), value);
        self.version += 1;
        Ok(())
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    version: u64,
    values: BTreeMap<String, String>,
}

/// Whole-file JSON store, rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    file: StateFile,
}

impl JsonFileStateStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read UI state: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid UI state file: {}", path.display()))?
        } else {
            StateFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn flush(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.file)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write UI state: {}", self.path.display()))
    }
}

impl UiStateStore for JsonFileStateStore {
    fn get(&self, key: &str) -> Option<String> {
        self.file.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.file.values.insert(key.to_owned(), value);
        self.file.version += 1;
        self.flush()
    }

    fn version(&self) -> u64 {
        self.file.version
    }
}

/// Storage key for `slot` under the current column layout. Any change to
/// the column ids or their order yields a different key.
pub fn layout_key(columns: &[CaseColumn], slot: &str) -> String {
    let ids: Vec<&str> = columns.iter().map(|column| column.id.as_str()).collect();
    let canonical = serde_json::json!({ "columns": ids }).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    // 64 bits are plenty to tell layouts apart
    format!("{}:{slot}", hex::encode(&digest[..8]))
}

/// Payload kinds that can be persisted, each with its own schema version.
pub trait Persisted: Serialize + DeserializeOwned {
    const SLOT: &'static str;
    const SCHEMA_VERSION: u32;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableState {
    pub column_widths: BTreeMap<String, f32>,
    pub column_order: Vec<String>,
}

impl Persisted for TableState {
    const SLOT: &'static str = "table";
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeViewState {
    pub zoom_target: Option<String>,
    pub show_distances: bool,
}

impl Persisted for TreeViewState {
    const SLOT: &'static str = "tree";
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    schema: u32,
    payload: T,
}

pub fn save<T: Persisted>(store: &mut dyn UiStateStore, columns: &[CaseColumn], state: &T) -> Result<()> {
    let raw = serde_json::to_string(&Envelope {
        schema: T::SCHEMA_VERSION,
        payload: state,
    })?;
    store.set(&layout_key(columns, T::SLOT), raw)
}

/// Stored state for this layout. Payloads of another schema version or that
/// fail to parse read as absent.
pub fn load<T: Persisted>(store: &dyn UiStateStore, columns: &[CaseColumn]) -> Option<T> {
    let key = layout_key(columns, T::SLOT);
    let raw = store.get(&key)?;
    let envelope: Envelope<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!("Ignoring unreadable UI state {key}: {err}");
            return None;
        }
    };
    if envelope.schema != T::SCHEMA_VERSION {
        debug!(
            "Ignoring UI state {key} with schema {} (expected {})",
            envelope.schema,
            T::SCHEMA_VERSION
        );
        return None;
    }
    serde_json::from_value(envelope.payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::case::ColumnKind;

    fn columns(ids: &[&str]) -> Vec<CaseColumn> {
        ids.iter()
            .map(|id| CaseColumn::new(*id, ColumnKind::Text))
            .collect()
    }

    #[test]
    fn layout_key_is_sha256_prefix() {
        // sha256("{\"columns\":[]}") starts with these 8 bytes
        let mut hasher = Sha256::new();
        hasher.update(br#"{"columns":[]}"#);
        let expected = hex::encode(&hasher.finalize()[..8]);
        assert_eq!(layout_key(&[], "tree"), format!("{expected}:tree"));
    }

    #[test]
    fn layout_key_depends_on_column_order() {
        let key = layout_key(&columns(&["a", "b"]), "table");
        assert!(key.ends_with(":table"));
        assert_eq!(key.len(), 16 + ":table".len());
        assert_eq!(key, layout_key(&columns(&["a", "b"]), "table"));
        assert_ne!(key, layout_key(&columns(&["b", "a"]), "table"));
    }

    #[test]
    fn round_trips_through_memory_store() {
        let mut store = MemoryStateStore::new();
        let layout = columns(&["age"]);
        let state = TreeViewState {
            zoom_target: Some("#4".into()),
            show_distances: true,
        };
        save(&mut store, &layout, &state).unwrap();
        assert_eq!(store.version(), 1);
        assert_eq!(load::<TreeViewState>(&store, &layout), Some(state));
        assert_eq!(load::<TreeViewState>(&store, &columns(&["other"])), None);
        assert_eq!(load::<TableState>(&store, &layout), None);
    }

    #[test]
    fn other_schema_versions_are_ignored() {
        let mut store = MemoryStateStore::new();
        let layout = columns(&["age"]);
        let key = layout_key(&layout, TableState::SLOT);
        store
            .set(&key, r#"{"schema":0,"payload":{"column_widths":{},"column_order":[]}}"#.into())
            .unwrap();
        assert_eq!(load::<TableState>(&store, &layout), None);
        store.set(&key, "not json".into()).unwrap();
        assert_eq!(load::<TableState>(&store, &layout), None);
    }

    #[test]
    fn json_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ui-state.json");
        let layout = columns(&["region", "age"]);
        let table = TableState {
            column_widths: [("age".to_string(), 80.0)].into_iter().collect(),
            column_order: vec!["age".into(), "region".into()],
        };

        let mut store = JsonFileStateStore::open(&path).unwrap();
        save(&mut store, &layout, &table).unwrap();

        let reopened = JsonFileStateStore::open(&path).unwrap();
        assert_eq!(reopened.version(), 1);
        assert_eq!(load::<TableState>(&reopened, &layout), Some(table));
    }
}
