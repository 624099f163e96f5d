//! Image privacy classification records.
//!
//! `ClassificationCache` holds one run's classifications and is shared by
//! reference between pipeline stages. `InstallationRecord` is the persisted
//! form the surrounding application keeps between runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RelayError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Classification of one image string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub is_private: bool,
}

/// Mutex-guarded classification map for a single run.
///
/// Entries are never evicted. Writes are last-write-wins per key.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    entries: Mutex<HashMap<String, ImageInfo>>,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache seeded from prior classifications.
    pub fn seeded(entries: HashMap<String, ImageInfo>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, image: &str) -> Option<ImageInfo> {
        self.entries.lock().get(image).copied()
    }

    pub fn contains(&self, image: &str) -> bool {
        self.entries.lock().contains_key(image)
    }

    pub fn insert(&self, image: impl Into<String>, info: ImageInfo) {
        self.entries.lock().insert(image.into(), info);
    }

    /// Merge entries, overwriting existing keys.
    pub fn seed(&self, entries: impl IntoIterator<Item = (String, ImageInfo)>) {
        self.entries.lock().extend(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the current entries.
    pub fn snapshot(&self) -> HashMap<String, ImageInfo> {
        self.entries.lock().clone()
    }

    /// Images currently classified private, sorted.
    pub fn private_images(&self) -> Vec<String> {
        let mut images: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, info)| info.is_private)
            .map(|(image, _)| image.clone())
            .collect();
        images.sort();
        images
    }
}

/// Persisted `image -> {isPrivate}` mapping.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InstallationRecord {
    #[serde(default)]
    pub images: HashMap<String, ImageInfo>,
}

impl InstallationRecord {
    /// Load a record from disk. Returns an empty record if not found.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Other(format!(
                "Failed to read installation record {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            RelayError::Serialization(format!(
                "Failed to parse installation record {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Save the record atomically (write tmp, rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp_path: PathBuf = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, path).map_err(|e| {
            RelayError::Other(format!(
                "Failed to rename {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Build a run cache seeded from this record.
    pub fn to_cache(&self) -> ClassificationCache {
        ClassificationCache::seeded(self.images.clone())
    }

    /// Take every classification from a run cache.
    pub fn absorb(&mut self, cache: &ClassificationCache) {
        self.images.extend(cache.snapshot());
    }
}
