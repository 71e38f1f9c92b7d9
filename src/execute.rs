use std::path::{Path, PathBuf};

use crate::error::{Access, FsError, Result};
use crate::restrict::Restrictions;

/// Directory-traversal engine applying a callback to files (or to the
/// configured paths themselves). Independent of the Directory capability
/// but composes with it. Configuration is plain builder state; traversal
/// inherits the full configuration into subdirectories.
#[derive(Debug, Clone)]
pub struct Execute {
    paths: Vec<PathBuf>,
    restrictions: Restrictions,
    recurse: bool,
    /// Mode applied to each directory while it is being processed, with the
    /// original put back afterwards.
    mode: Option<u32>,
    whitelist_extensions: Vec<String>,
    blacklist_extensions: Vec<String>,
    skip_paths: Vec<PathBuf>,
    follow_symlinks: bool,
    follow_hidden: bool,
    ignore_errors: bool,
}

impl Execute {
    pub fn new(restrictions: Restrictions) -> Self {
        Self {
            paths: Vec::new(),
            restrictions,
            recurse: false,
            mode: None,
            whitelist_extensions: Vec::new(),
            blacklist_extensions: Vec::new(),
            skip_paths: Vec::new(),
            follow_symlinks: false,
            follow_hidden: false,
            ignore_errors: false,
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = recurse;
        self
    }

    /// Temporarily apply `mode` to each directory during its processing.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Only files with these extensions reach the callback. Empty means no
    /// whitelist.
    pub fn whitelist(mut self, extensions: &[&str]) -> Self {
        self.whitelist_extensions = extensions.iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Files with these extensions never reach the callback.
    pub fn blacklist(mut self, extensions: &[&str]) -> Self {
        self.blacklist_extensions = extensions.iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Skip everything under this prefix. A skipped parent skips all of its
    /// descendants.
    pub fn skip(mut self, path: impl Into<PathBuf>) -> Self {
        self.skip_paths.push(path.into());
        self
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn follow_hidden(mut self, follow: bool) -> Self {
        self.follow_hidden = follow;
        self
    }

    /// Log callback errors and keep traversing instead of propagating.
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    /// Apply the callback to every file under the configured paths. Returns
    /// how many files the callback accepted.
    pub fn on_files<F>(&self, callback: &mut F) -> Result<usize>
    where
        F: FnMut(&Path) -> Result<()>,
    {
        let mut count = 0;
        for path in &self.paths {
            if self.skipped(path) {
                tracing::debug!("skipping {}", path.display());
                continue;
            }
            self.restrictions.check(path, Access::Read)?;
            self.process_directory(path, callback, &mut count)?;
        }
        Ok(count)
    }

    /// Apply the callback once to each configured path itself, with the
    /// same temporary-mode semantics as `on_files`.
    pub fn on_path_only<F>(&self, callback: &mut F) -> Result<usize>
    where
        F: FnMut(&Path) -> Result<()>,
    {
        let mut count = 0;
        for path in &self.paths {
            if self.skipped(path) {
                tracing::debug!("skipping {}", path.display());
                continue;
            }
            self.restrictions.check(path, Access::Read)?;

            let saved = self.apply_mode(path)?;
            let result = self.invoke(callback, path, &mut count);
            self.restore_mode(path, saved);
            result?;
        }
        Ok(count)
    }

    fn process_directory<F>(
        &self,
        directory: &Path,
        callback: &mut F,
        count: &mut usize,
    ) -> Result<()>
    where
        F: FnMut(&Path) -> Result<()>,
    {
        let saved = self.apply_mode(directory)?;
        let result = self.process_entries(directory, callback, count);
        self.restore_mode(directory, saved);
        result
    }

    fn process_entries<F>(
        &self,
        directory: &Path,
        callback: &mut F,
        count: &mut usize,
    ) -> Result<()>
    where
        F: FnMut(&Path) -> Result<()>,
    {
        let mut entries: Vec<std::fs::DirEntry> = std::fs::read_dir(directory)
            .map_err(|io| {
                FsError::filesystem_io(format!("cannot list {}", directory.display()), io)
            })?
            .filter_map(|entry| entry.ok())
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            if self.skipped(&path) {
                tracing::debug!("skipping {}", path.display());
                continue;
            }

            let name = entry.file_name();
            let hidden = name.to_string_lossy().starts_with('.');
            if hidden && !self.follow_hidden {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(error) => {
                    tracing::warn!("cannot stat {}: {error}", path.display());
                    continue;
                }
            };
            if file_type.is_symlink() && !self.follow_symlinks {
                continue;
            }

            let is_dir = if file_type.is_symlink() {
                path.is_dir()
            } else {
                file_type.is_dir()
            };
            if is_dir {
                if self.recurse {
                    self.process_directory(&path, callback, count)?;
                }
                continue;
            }

            if !self.extension_allowed(&path) {
                continue;
            }
            self.invoke(callback, &path, count)?;
        }
        Ok(())
    }

    fn invoke<F>(&self, callback: &mut F, path: &Path, count: &mut usize) -> Result<()>
    where
        F: FnMut(&Path) -> Result<()>,
    {
        match callback(path) {
            Ok(()) => {
                *count += 1;
                Ok(())
            }
            Err(error) if self.ignore_errors => {
                tracing::warn!("callback failed on {}: {error}", path.display());
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if !self.whitelist_extensions.is_empty() && !self.whitelist_extensions.contains(&extension)
        {
            tracing::warn!(
                "skipping {}, extension '{extension}' is not whitelisted",
                path.display()
            );
            return false;
        }
        if self.blacklist_extensions.contains(&extension) {
            tracing::warn!(
                "skipping {}, extension '{extension}' is blacklisted",
                path.display()
            );
            return false;
        }
        true
    }

    fn skipped(&self, path: &Path) -> bool {
        self.skip_paths.iter().any(|prefix| path.starts_with(prefix))
    }

    fn apply_mode(&self, path: &Path) -> Result<Option<u32>> {
        use std::os::unix::fs::PermissionsExt;

        let Some(mode) = self.mode else {
            return Ok(None);
        };
        self.restrictions.check(path, Access::Write)?;

        let saved = std::fs::metadata(path)
            .map(|metadata| metadata.permissions().mode() & 0o7777)
            .map_err(|io| {
                FsError::filesystem_io(format!("cannot stat {}", path.display()), io)
            })?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|io| {
            FsError::filesystem_io(format!("cannot set mode on {}", path.display()), io)
        })?;
        Ok(Some(saved))
    }

    fn restore_mode(&self, path: &Path, saved: Option<u32>) {
        use std::os::unix::fs::PermissionsExt;

        let Some(saved) = saved else {
            return;
        };
        if let Err(io) =
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(saved))
        {
            tracing::warn!("could not restore mode on {}: {io}", path.display());
        }
    }
}
