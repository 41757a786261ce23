use crate::confdoc::ConfigDocument;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "etcd.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Fatal: a member cannot safely guess its prior identity from a damaged
    /// document.
    #[error("persisted config document is corrupt: {0}")]
    Corrupt(String),

    #[error("config io failure")]
    Io(#[from] io::Error),
}

/// Persists and loads the engine's static configuration document at a fixed
/// path alongside the data directory.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(data_dir: &Path) -> ConfigStore {
        ConfigStore {
            path: data_dir.join(CONFIG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<ConfigDocument, ConfigError> {
        let raw = std::fs::read_to_string(&self.path)?;
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Corrupt(e.to_string()))
    }

    /// Atomic write: serialize to a sibling temp file, fsync, then rename
    /// over the final path. A partially written document is never observable
    /// as present.
    pub fn persist(&self, doc: &ConfigDocument) -> Result<(), ConfigError> {
        let serialized =
            serde_yaml::to_string(doc).map_err(|e| ConfigError::Corrupt(e.to_string()))?;

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(serialized.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| ConfigError::Io(e.error))?;

        Ok(())
    }
}
