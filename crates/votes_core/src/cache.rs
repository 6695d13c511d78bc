use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    // Attempted before: Some(remote_id) or a confirmed "unresolvable".
    Hit(Option<String>),
    // Never attempted, the remote directory must be asked.
    Absent,
}

// Persistent (name, group) -> remote id memo plus the resume checkpoint.
// Entries are never invalidated here; a wrong mapping stays until an operator
// deletes the file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReconCache {
    #[serde(default)]
    groups: BTreeMap<String, BTreeMap<String, Option<String>>>,
    #[serde(default)]
    checkpoint: usize,
}

impl ReconCache {
    // A missing file is a fresh cache, anything unreadable is not.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no cache file at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read cache file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to decode cache file {}", path.display()))
    }

    pub fn flush(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)
            .with_context(|| format!("failed to write cache file {}", path.display()))
    }

    pub fn lookup(&self, name: &str, group: &str) -> CacheLookup {
        match self.groups.get(group).and_then(|names| names.get(name)) {
            Some(remote_id) => CacheLookup::Hit(remote_id.clone()),
            None => CacheLookup::Absent,
        }
    }

    // One write per (name, group) pair, on the first remote attempt.
    pub fn store(&mut self, name: &str, group: &str, remote_id: Option<String>) {
        let previous = self
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(name.to_string(), remote_id);
        if previous.is_some() {
            warn!(name, group, "overwrote an existing cache entry");
        }
    }

    // Index of the last fully-processed dump record.
    pub fn checkpoint(&self) -> usize {
        self.checkpoint
    }

    pub fn set_checkpoint(&mut self, index: usize) {
        self.checkpoint = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_distinguishes_absent_from_unresolvable() {
        let mut cache = ReconCache::default();
        assert_eq!(cache.lookup("Zzyzx", "ALDE"), CacheLookup::Absent);

        cache.store("Zzyzx", "ALDE", None);
        assert_eq!(cache.lookup("Zzyzx", "ALDE"), CacheLookup::Hit(None));

        cache.store("VRIES", "ALDE", Some("4242".into()));
        assert_eq!(
            cache.lookup("VRIES", "ALDE"),
            CacheLookup::Hit(Some("4242".into()))
        );
        // Same name under another group is a separate key.
        assert_eq!(cache.lookup("VRIES", "PPE"), CacheLookup::Absent);
    }

    #[test]
    fn survives_a_flush_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("representative_finder.json");

        let mut cache = ReconCache::default();
        cache.store("VRIES", "ALDE", Some("4242".into()));
        cache.store("Zzyzx", "ALDE", None);
        cache.set_checkpoint(17);
        cache.flush(&path).unwrap();

        let reloaded = ReconCache::load(&path).unwrap();
        assert_eq!(
            reloaded.lookup("VRIES", "ALDE"),
            CacheLookup::Hit(Some("4242".into()))
        );
        assert_eq!(reloaded.lookup("Zzyzx", "ALDE"), CacheLookup::Hit(None));
        assert_eq!(reloaded.checkpoint(), 17);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReconCache::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cache.checkpoint(), 0);
        assert_eq!(cache.lookup("anyone", "anywhere"), CacheLookup::Absent);
    }

    #[test]
    fn flush_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        ReconCache::default().flush(&path).unwrap();
        assert!(path.exists());
    }
}
