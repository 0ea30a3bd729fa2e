use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};

use crate::tuner::params::TunerConfig;

/// Persistence for tuned parameters, keyed by symbol.
pub trait TunerConfigStore: Send + Sync {
    fn load(&self, symbol: &str) -> Result<Option<TunerConfig>>;
    fn save(&self, symbol: &str, cfg: &TunerConfig) -> Result<()>;
}

/// One pretty-printed JSON file per symbol under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileTunerStore {
    dir: PathBuf,
}

impl JsonFileTunerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        let name = symbol
            .trim()
            .to_ascii_uppercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>();
        self.dir.join(format!("{}.json", name))
    }
}

impl TunerConfigStore for JsonFileTunerStore {
    fn load(&self, symbol: &str) -> Result<Option<TunerConfig>> {
        let path = self.path_for(symbol);
        load_from_path(&path)
    }

    fn save(&self, symbol: &str, cfg: &TunerConfig) -> Result<()> {
        let path = self.path_for(symbol);
        persist_to_path(&path, cfg)
    }
}

fn load_from_path(path: &Path) -> Result<Option<TunerConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let payload = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let cfg: TunerConfig = serde_json::from_str(&payload)
        .with_context(|| format!("failed to parse tuner config {}", path.display()))?;
    Ok(Some(cfg.clamped()))
}

fn persist_to_path(path: &Path, cfg: &TunerConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(cfg).context("failed to serialize tuner config")?;
    // Readers never see a partially written file.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", tmp.display()))?;
    Ok(())
}

/// Process-local store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryTunerStore {
    data: Mutex<HashMap<String, TunerConfig>>,
}

impl MemoryTunerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TunerConfigStore for MemoryTunerStore {
    fn load(&self, symbol: &str) -> Result<Option<TunerConfig>> {
        let guard = self
            .data
            .lock()
            .map_err(|_| anyhow!("tuner store lock poisoned"))?;
        Ok(guard.get(&symbol.trim().to_ascii_uppercase()).copied())
    }

    fn save(&self, symbol: &str, cfg: &TunerConfig) -> Result<()> {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| anyhow!("tuner store lock poisoned"))?;
        guard.insert(symbol.trim().to_ascii_uppercase(), *cfg);
        Ok(())
    }
}
