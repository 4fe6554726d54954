//! Data directory resolution and on-disk layout.
//!
//! ```text
//! <data_dir>/
//!   config.toml
//!   flowgate.db
//!   inbox/        watch root (default)
//!   output/       transform artifacts (default)
//!   workflows/    *.yaml workflow files (default)
//! ```

use std::path::{Path, PathBuf};

use flowgate_types::config::GlobalConfig;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `FLOWGATE_DATA_DIR` environment variable
/// 2. `~/.flowgate`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLOWGATE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".flowgate");
    }

    // Last resort: current directory
    PathBuf::from(".flowgate")
}

/// Create the data directory and its default sub-directories.
///
/// An explicitly configured watch root is left alone, so a missing one
/// surfaces as a setup error when watching starts.
pub async fn ensure_layout(config: &GlobalConfig, data_dir: &Path) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(data_dir).await?;
    if config.watch_root.is_none() {
        tokio::fs::create_dir_all(config.watch_root(data_dir)).await?;
    }
    tokio::fs::create_dir_all(config.output_dir(data_dir)).await?;
    tokio::fs::create_dir_all(config.workflows_dir(data_dir)).await?;
    Ok(())
}
