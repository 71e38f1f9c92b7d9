use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::FsContext;
use crate::error::Result;
use crate::path::{DeleteOptions, Entry};
use crate::restrict::Restrictions;

/// An insertion-ordered mapping of absolute path to Entry, as produced by
/// directory listings and the duplicate scanner. Bulk operations drain
/// entries as they are processed, so a failed batch leaves exactly the
/// unprocessed remainder behind.
#[derive(Debug, Default)]
pub struct Files {
    /// Used only to resolve relative inserts, never for ownership.
    parent: Option<PathBuf>,
    entries: Vec<(PathBuf, Entry)>,
}

impl Files {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: Some(parent.into()),
            entries: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<&Path> {
        self.parent.as_deref()
    }

    /// Insert an entry under its source path, replacing a previous entry at
    /// the same path. `.` and `..` never enter the collection.
    pub fn insert(&mut self, entry: Entry) {
        if matches!(
            entry.source().file_name().and_then(|n| n.to_str()),
            Some(".") | Some("..")
        ) {
            return;
        }
        let key = entry.source().to_path_buf();
        if let Some(slot) = self.entries.iter_mut().find(|(path, _)| *path == key) {
            slot.1 = entry;
        } else {
            self.entries.push((key, entry));
        }
    }

    /// Resolve `path` (relative paths resolve against the collection
    /// parent) into an Entry and insert it.
    pub fn insert_path(
        &mut self,
        path: impl AsRef<Path>,
        restrictions: Restrictions,
        context: Arc<FsContext>,
    ) -> Result<()> {
        let path = path.as_ref();
        let resolved = if path.is_relative() {
            match &self.parent {
                Some(parent) => parent.join(path),
                None => path.to_path_buf(),
            }
        } else {
            path.to_path_buf()
        };
        self.insert(Entry::new(resolved, restrictions, context)?);
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(key, _)| key == path)
            .map(|(_, entry)| entry)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Entry)> {
        self.entries
            .iter()
            .map(|(path, entry)| (path.as_path(), entry))
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.entries.iter().map(|(path, _)| path.as_path()).collect()
    }

    fn take_first(&mut self) -> Option<(PathBuf, Entry)> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Delete every entry, dropping each from the collection as it goes.
    /// Returns the number deleted.
    pub async fn delete_all(&mut self, options: &DeleteOptions) -> Result<usize> {
        let mut deleted = 0;
        while let Some((_, entry)) = self.take_first() {
            entry.delete(options).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Securely erase every entry, draining the collection.
    pub async fn secure_delete_all(&mut self, options: &DeleteOptions) -> Result<usize> {
        let mut deleted = 0;
        while let Some((_, entry)) = self.take_first() {
            entry.secure_delete(options).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Move every entry into `target`, draining this collection and
    /// returning the moved entries as a new one.
    pub async fn move_into(
        &mut self,
        target: &Path,
        restrictions: Option<&Restrictions>,
    ) -> Result<Files> {
        let mut moved = Files::with_parent(target);
        while let Some((_, entry)) = self.take_first() {
            let relocated = entry.move_to(target, restrictions.cloned()).await?;
            moved.insert(relocated);
        }
        Ok(moved)
    }

    /// Copy every file entry into `target`. Directory entries are copied
    /// recursively. The collection keeps its entries.
    pub async fn copy_into(
        &mut self,
        target: &Path,
        restrictions: Option<&Restrictions>,
    ) -> Result<Files> {
        let mut copied = Files::with_parent(target);
        for (path, entry) in &self.entries {
            let restrictions = restrictions.unwrap_or(entry.restrictions()).clone();
            if let Ok(directory) = entry.as_directory() {
                let copy = directory
                    .copy_to(
                        &target.join(path.file_name().unwrap_or_default()),
                        Some(restrictions),
                        None::<fn(&Path)>,
                        true,
                    )
                    .await?;
                copied.insert(copy);
            } else {
                let destination = target.join(path.file_name().unwrap_or_default());
                tokio::fs::copy(path, &destination).await.map_err(|io| {
                    crate::error::FsError::filesystem_io(
                        format!("cannot copy {} to {}", path.display(), destination.display()),
                        io,
                    )
                })?;
                copied.insert(Entry::new(
                    destination,
                    restrictions,
                    entry.context().clone(),
                )?);
            }
        }
        Ok(copied)
    }
}
