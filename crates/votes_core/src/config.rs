use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

// Run configuration. Every field has a default so a config file only needs
// the values it wants to override.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub dump_url: String,
    pub directory_base: String,
    pub cache_file: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            db_path: PathBuf::from("data/epvotes.sqlite3"),
            dump_url: "http://parltrack.euwiki.org/dumps/ep_votes.json.xz".into(),
            directory_base: "http://parltrack.euwiki.org".into(),
            cache_file: "representative_finder.json".into(),
        }
    }
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_file)
    }

    pub fn dump_destination(&self) -> PathBuf {
        self.data_dir.join("ep_votes.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: ImportConfig = toml::from_str(r#"data_dir = "/var/lib/epvotes""#).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/epvotes"));
        assert_eq!(config.cache_file, "representative_finder.json");
        assert!(config.dump_url.ends_with("ep_votes.json.xz"));
        assert_eq!(
            config.cache_path(),
            PathBuf::from("/var/lib/epvotes/representative_finder.json")
        );
    }

    #[test]
    fn load_reports_the_offending_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "data_dir = 3").unwrap();
        let err = ImportConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }
}
