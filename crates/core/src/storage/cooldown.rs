use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Alert key -> time of the last successful notification.
pub type CooldownState = BTreeMap<String, DateTime<Utc>>;

pub trait CooldownStore: Send + Sync {
    fn load(&self) -> Result<CooldownState>;
    fn save(&self, state: &CooldownState) -> Result<()>;
}

/// JSON object on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCooldownStore {
    path: PathBuf,
}

impl FileCooldownStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CooldownStore for FileCooldownStore {
    fn load(&self) -> Result<CooldownState> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CooldownState::new())
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read cooldown state {}", self.path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(CooldownState::new());
        }
        serde_json::from_str::<CooldownState>(&raw)
            .with_context(|| format!("parse cooldown state {}", self.path.display()))
    }

    fn save(&self, state: &CooldownState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("create cooldown state dir")?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(state).context("serialize cooldown state")?;
        {
            let mut file = File::create(&tmp).context("create cooldown state tmp")?;
            file.write_all(&payload).context("write cooldown state tmp")?;
            file.sync_all().context("sync cooldown state tmp")?;
        }

        if let Err(err) = fs::rename(&tmp, &self.path) {
            if self.path.exists() {
                let _ = fs::remove_file(&self.path);
                fs::rename(&tmp, &self.path).context("replace cooldown state file")?;
            } else {
                return Err(err).context("rename cooldown state tmp");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCooldownStore {
    state: Mutex<CooldownState>,
}

impl CooldownStore for MemoryCooldownStore {
    fn load(&self) -> Result<CooldownState> {
        let guard = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("cooldown state lock poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, state: &CooldownState) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("cooldown state lock poisoned"))?;
        *guard = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCooldownStore::new(dir.path().join("cooldown.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn saved_state_survives_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cooldown.json");

        let mut state = CooldownState::new();
        let sent_at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 20, 0).unwrap();
        state.insert("gold_7day".to_string(), sent_at);
        FileCooldownStore::new(&path).save(&state).unwrap();

        let reopened = FileCooldownStore::new(&path);
        assert_eq!(reopened.load().unwrap().get("gold_7day"), Some(&sent_at));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cooldown.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(FileCooldownStore::new(&path).load().is_err());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryCooldownStore::default();
        let mut state = CooldownState::new();
        state.insert("silver_30day".to_string(), Utc::now());
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }
}
