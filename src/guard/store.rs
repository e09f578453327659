//! Registry persistence
//!
//! The registry is imported once at start-up and exported at shutdown (and
//! on the auto-save timer). The on-disk format is plain JSON.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::registry::Website;
use crate::error::{GuardError, RegistryError};

/// Import/export contract for registry records
pub trait RegistryStore {
    fn load(&self) -> Result<Vec<Website>, GuardError>;
    fn save(&self, websites: &[Website]) -> Result<(), GuardError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    /// Version for format compatibility
    version: u32,
    websites: Vec<Website>,
}

/// Registry stored as a JSON file
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for JsonFileStore {
    /// A missing file loads as an empty registry
    fn load(&self) -> Result<Vec<Website>, GuardError> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "No registry file, starting empty");
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let data: RegistryFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| RegistryError::LoadError {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            path = %self.path.display(),
            count = data.websites.len(),
            "Loaded registry"
        );
        Ok(data.websites)
    }

    fn save(&self, websites: &[Website]) -> Result<(), GuardError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = RegistryFile {
            version: 1,
            websites: websites.to_vec(),
        };

        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &data).map_err(|e| {
            RegistryError::SaveError {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        tracing::info!(path = %self.path.display(), count = websites.len(), "Saved registry");
        Ok(())
    }
}
