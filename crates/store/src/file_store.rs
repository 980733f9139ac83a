use keepsake_common::{SaveConfig, SlotId};
use std::path::{Path, PathBuf};

/// Errors from file store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Maps (key, slot) pairs to files under the save directory.
///
/// Cloneable handle; clones share nothing but the configured paths, so one
/// can live on the I/O worker while another serves administrative tooling.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    extension: String,
}

impl FileStore {
    pub fn new(config: &SaveConfig) -> Self {
        Self {
            root: config.save_path.clone(),
            extension: config.file_extension.clone(),
        }
    }

    /// The save directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for one (key, slot) pair: `{root}/{key}_{slot}{extension}`.
    pub fn path_for(&self, key: &str, slot: SlotId) -> PathBuf {
        self.root
            .join(format!("{key}_{slot}{ext}", ext = self.extension))
    }

    /// Whether a save file exists for this (key, slot).
    pub fn exists(&self, key: &str, slot: SlotId) -> bool {
        self.path_for(key, slot).exists()
    }

    /// Read the full contents of one save file.
    pub fn read(&self, key: &str, slot: SlotId) -> Result<Vec<u8>, StoreError> {
        Ok(std::fs::read(self.path_for(key, slot))?)
    }

    /// Write the full contents of one save file, creating the save
    /// directory first if it does not exist yet.
    pub fn write(&self, key: &str, slot: SlotId, bytes: &[u8]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.path_for(key, slot), bytes)?;
        Ok(())
    }

    /// Remove every save file for `key`, across all slots.
    /// Returns the number of files removed.
    pub fn delete_by_key(&self, key: &str) -> Result<usize, StoreError> {
        let prefix = format!("{key}_");
        self.delete_matching(|stem| stem.starts_with(&prefix))
    }

    /// Remove the one file for `(key, slot)`. Returns whether it existed.
    pub fn delete_exact(&self, key: &str, slot: SlotId) -> Result<bool, StoreError> {
        let path = self.path_for(key, slot);
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Remove every file in the save directory carrying the configured
    /// extension. Returns the number of files removed.
    pub fn delete_all(&self) -> Result<usize, StoreError> {
        self.delete_matching(|_| true)
    }

    fn delete_matching(&self, matches: impl Fn(&str) -> bool) -> Result<usize, StoreError> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !self.has_save_extension(&path) {
                continue;
            }
            let stem_matches = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(&matches);
            if stem_matches {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn has_save_extension(&self, path: &Path) -> bool {
        let want = self.extension.trim_start_matches('.');
        path.extension().and_then(|ext| ext.to_str()) == Some(want)
    }
}
