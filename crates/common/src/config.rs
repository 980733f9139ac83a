use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Host-provided configuration for the save system.
///
/// Created and owned by the embedding application; the engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfig {
    /// Directory that receives save files. Created on first write.
    pub save_path: PathBuf,
    /// Extension for save files, including the leading dot.
    pub file_extension: String,
    /// When false, success and progress logging is suppressed.
    /// Failures are always logged.
    pub show_debug_logs: bool,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("saves"),
            file_extension: ".sav".to_string(),
            show_debug_logs: true,
        }
    }
}
