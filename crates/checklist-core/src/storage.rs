use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument};

use crate::model::{CatalogTask, TasksByDate};
use crate::state::{ChecklistState, Dirty};

pub const TITLE_SLOT: &str = "checklistTitle";
pub const CATALOG_SLOT: &str = "globalTasks";
pub const TASKS_BY_DATE_SLOT: &str = "tasksByDate";

const SLOT_EXTENSION: &str = "data";

/// Named string slots. Implementations only move opaque text around.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn clear(&mut self) -> anyhow::Result<()>;
}

/// What to do when a slot holds text that does not parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorruptPolicy {
    #[default]
    Fail,
    Reset,
}

impl std::str::FromStr for CorruptPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" | "strict" => Ok(Self::Fail),
            "reset" | "empty" => Ok(Self::Reset),
            other => Err(anyhow!("invalid storage.on_corrupt value: {other}")),
        }
    }
}

/// A persisted slot that could not be parsed. Recoverable by resetting.
#[derive(Debug)]
pub struct CorruptSlot {
    pub slot: &'static str,
    pub source: serde_json::Error,
}

impl fmt::Display for CorruptSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stored slot '{}' is corrupt; run `reset --yes` or set storage.on_corrupt=reset",
            self.slot
        )
    }
}

impl std::error::Error for CorruptSlot {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// One file per slot inside a data directory, replaced atomically on write.
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened file store");
        Ok(Self { data_dir })
    }

    pub fn slot_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.{SLOT_EXTENSION}"))
    }
}

impl KeyValueStore for FileStore {
    #[instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.slot_path(key);
        if !path.exists() {
            debug!(file = %path.display(), "slot file absent");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[instrument(skip(self, value), fields(bytes = value.len()))]
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.slot_path(key);
        debug!(file = %path.display(), "writing slot atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn clear(&mut self) -> anyhow::Result<()> {
        let entries = fs::read_dir(&self.data_dir)
            .with_context(|| format!("failed listing {}", self.data_dir.display()))?;

        let mut removed = 0_usize;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == SLOT_EXTENSION) {
                fs::remove_file(&path)
                    .with_context(|| format!("failed removing {}", path.display()))?;
                removed += 1;
            }
        }
        info!(removed, "cleared file store");
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.slots.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        self.slots.clear();
        Ok(())
    }
}

/// Reads the three slots, using empty defaults for absent ones.
#[instrument(skip(store))]
pub fn load_state<S: KeyValueStore + ?Sized>(
    store: &S,
    policy: CorruptPolicy,
) -> anyhow::Result<ChecklistState> {
    let title = store
        .get(TITLE_SLOT)
        .context("failed to load title")?
        .unwrap_or_default();
    let catalog: Vec<CatalogTask> = load_json_slot(store, CATALOG_SLOT, policy)?;
    let tasks_by_date: TasksByDate = load_json_slot(store, TASKS_BY_DATE_SLOT, policy)?;

    debug!(
        catalog = catalog.len(),
        dates = tasks_by_date.len(),
        "loaded checklist state"
    );
    Ok(ChecklistState {
        title,
        catalog,
        tasks_by_date,
    })
}

fn load_json_slot<S, T>(store: &S, slot: &'static str, policy: CorruptPolicy) -> anyhow::Result<T>
where
    S: KeyValueStore + ?Sized,
    T: DeserializeOwned + Default,
{
    let Some(raw) = store
        .get(slot)
        .with_context(|| format!("failed to load {slot}"))?
    else {
        return Ok(T::default());
    };

    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Ok(value),
        Err(source) => match policy {
            CorruptPolicy::Fail => Err(CorruptSlot { slot, source }.into()),
            CorruptPolicy::Reset => {
                error!(slot, error = %source, "failed parsing stored slot; using empty default");
                Ok(T::default())
            }
        },
    }
}

/// Writes only the slots named by `dirty`.
#[instrument(skip(store, state))]
pub fn save_dirty<S: KeyValueStore + ?Sized>(
    store: &mut S,
    state: &ChecklistState,
    dirty: Dirty,
) -> anyhow::Result<()> {
    if dirty.title {
        store
            .set(TITLE_SLOT, &state.title)
            .context("failed to save title")?;
    }
    if dirty.catalog {
        let json = serde_json::to_string(&state.catalog)?;
        store
            .set(CATALOG_SLOT, &json)
            .context("failed to save task catalog")?;
    }
    if dirty.tasks_by_date {
        let json = serde_json::to_string(&state.tasks_by_date)?;
        store
            .set(TASKS_BY_DATE_SLOT, &json)
            .context("failed to save tasks by date")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        CATALOG_SLOT, CorruptPolicy, CorruptSlot, KeyValueStore, MemoryStore, TASKS_BY_DATE_SLOT,
        TITLE_SLOT, load_state,
    };

    #[test]
    fn absent_slots_load_as_empty() {
        let store = MemoryStore::new();
        let state = load_state(&store, CorruptPolicy::Fail).expect("load");
        assert!(state.title.is_empty());
        assert!(state.catalog.is_empty());
        assert!(state.tasks_by_date.is_empty());
    }

    #[test]
    fn reads_reference_shapes() {
        let mut store = MemoryStore::new();
        store.set(TITLE_SLOT, "Morning").expect("set");
        store
            .set(CATALOG_SLOT, r#"[{"name":"Exercise"}]"#)
            .expect("set");
        store
            .set(
                TASKS_BY_DATE_SLOT,
                r#"{"2024-01-01":[{"name":"Exercise","done":true}]}"#,
            )
            .expect("set");

        let state = load_state(&store, CorruptPolicy::Fail).expect("load");
        assert_eq!(state.title, "Morning");
        assert_eq!(state.catalog[0].name, "Exercise");
        let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        assert!(state.tasks_by_date[&day][0].done);
    }

    #[test]
    fn corrupt_slot_fails_under_strict_policy() {
        let mut store = MemoryStore::new();
        store.set(CATALOG_SLOT, "{not json").expect("set");

        let err = load_state(&store, CorruptPolicy::Fail).expect_err("should fail");
        let corrupt = err.downcast_ref::<CorruptSlot>().expect("typed error");
        assert_eq!(corrupt.slot, CATALOG_SLOT);
    }

    #[test]
    fn corrupt_slot_defaults_under_reset_policy() {
        let mut store = MemoryStore::new();
        store.set(TASKS_BY_DATE_SLOT, r#"{"yesterday":[]}"#).expect("set");
        store
            .set(CATALOG_SLOT, r#"[{"name":"Read"}]"#)
            .expect("set");

        let state = load_state(&store, CorruptPolicy::Reset).expect("load");
        assert!(state.tasks_by_date.is_empty());
        assert_eq!(state.catalog.len(), 1);
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!(
            "reset".parse::<CorruptPolicy>().expect("parse"),
            CorruptPolicy::Reset
        );
        assert!("maybe".parse::<CorruptPolicy>().is_err());
    }
}
