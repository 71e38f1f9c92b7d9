use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dir::mounts::Mounts;
use crate::error::{FsError, Result};

/// Tunables consumed by the filesystem layer. All fields have serde defaults
/// so a partial (or absent) config file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    /// Mode applied when creating files.
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Mode applied when creating directories.
    #[serde(default = "default_directory_mode")]
    pub directory_mode: u32,

    /// Length of generated temporary directory names.
    #[serde(default = "default_target_name_size")]
    pub target_name_size: usize,

    /// Attempt a one-shot mount when an expected path is missing.
    #[serde(default = "default_auto_mount")]
    pub auto_mount: bool,

    /// Category prefixes (css, js, img, font, video) resolved by
    /// `resolve::absolute` to these directories.
    #[serde(default)]
    pub category_roots: HashMap<String, PathBuf>,

    /// Prefix prepended to relative paths when no explicit prefix is given.
    #[serde(default = "default_root")]
    pub default_root: PathBuf,
}

fn default_file_mode() -> u32 {
    0o640
}

fn default_directory_mode() -> u32 {
    0o750
}

fn default_target_name_size() -> usize {
    8
}

fn default_auto_mount() -> bool {
    true
}

fn default_root() -> PathBuf {
    PathBuf::from("/")
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            file_mode: default_file_mode(),
            directory_mode: default_directory_mode(),
            target_name_size: default_target_name_size(),
            auto_mount: default_auto_mount(),
            category_roots: HashMap::new(),
            default_root: default_root(),
        }
    }
}

impl FsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FsError::filesystem_io(format!("failed to read config {}", path.display()), e)
        })?;
        toml::from_str(&contents)
            .map_err(|e| FsError::filesystem(format!("invalid config {}: {e}", path.display())))
    }

    pub fn category_root(&self, category: &str) -> Option<&Path> {
        self.category_roots.get(category).map(PathBuf::as_path)
    }
}

/// Process-wide filesystem policy. Entries are constructed against a shared
/// `Arc<FsContext>`; independent contexts let tests run in parallel with
/// different switches.
pub struct FsContext {
    /// Master switch: when false every readability check fails.
    pub read_enabled: bool,
    /// Master switch: when false every writability check fails.
    pub write_enabled: bool,
    pub config: FsConfig,
    /// Registry consulted for auto-mount and the explicit mount operations.
    pub mounts: Option<Arc<dyn Mounts>>,
}

impl FsContext {
    pub fn new(config: FsConfig) -> Arc<Self> {
        Arc::new(Self {
            read_enabled: true,
            write_enabled: true,
            config,
            mounts: None,
        })
    }

    pub fn with_mounts(config: FsConfig, mounts: Arc<dyn Mounts>) -> Arc<Self> {
        Arc::new(Self {
            read_enabled: true,
            write_enabled: true,
            config,
            mounts: Some(mounts),
        })
    }

    /// A context with writes disabled, reads untouched.
    pub fn read_only(config: FsConfig) -> Arc<Self> {
        Arc::new(Self {
            read_enabled: true,
            write_enabled: false,
            config,
            mounts: None,
        })
    }
}

impl std::fmt::Debug for FsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsContext")
            .field("read_enabled", &self.read_enabled)
            .field("write_enabled", &self.write_enabled)
            .field("config", &self.config)
            .field("mounts", &self.mounts.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FsConfig::default();
        assert_eq!(config.file_mode, 0o640);
        assert_eq!(config.directory_mode, 0o750);
        assert_eq!(config.target_name_size, 8);
        assert!(config.auto_mount);
        assert_eq!(config.default_root, PathBuf::from("/"));
    }

    #[test]
    fn test_partial_toml() {
        let config: FsConfig = toml::from_str("auto_mount = false\n").unwrap();
        assert!(!config.auto_mount);
        assert_eq!(config.file_mode, 0o640);
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("fsbound.toml");
        std::fs::write(
            &path,
            "target_name_size = 12\n[category_roots]\ncss = \"/srv/www/css\"\n",
        )
        .unwrap();

        let config = FsConfig::load(&path).unwrap();
        assert_eq!(config.target_name_size, 12);
        assert_eq!(
            config.category_root("css"),
            Some(Path::new("/srv/www/css"))
        );
        assert_eq!(config.category_root("js"), None);
    }

    #[test]
    fn test_load_missing_file() {
        let err = FsConfig::load(Path::new("/nonexistent/fsbound.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
