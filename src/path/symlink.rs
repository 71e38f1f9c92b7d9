use std::path::{Component, Path, PathBuf};

use crate::error::{Access, FsError, Result};
use crate::path::{Entry, EntryKind};

/// Longest symlink chain `follow_link(all)` will chase before giving up.
const MAX_LINK_DEPTH: usize = 40;

impl Entry {
    /// Make this entry's path a symlink pointing at `target`. An existing
    /// link already pointing at the same resolved target is a no-op; a link
    /// pointing elsewhere, or a non-link occupant, is an error.
    pub async fn symlink_to_target(&self, target: &Path, relative: bool) -> Result<()> {
        self.create_link(&self.source, target, relative).await
    }

    /// Create a symlink at `link` pointing at this entry. Returns the link
    /// as a new entry.
    pub async fn symlink_from(&self, link: &Path, relative: bool) -> Result<Entry> {
        let link = super::resolve::lexical_absolute(link)?;
        self.create_link(&link, &self.source, relative).await?;
        self.sibling_entry(&link)
    }

    async fn create_link(&self, link: &Path, target: &Path, relative: bool) -> Result<()> {
        self.restrictions.check(link, Access::Write)?;

        let content = if relative {
            relative_link(link, target)
        } else {
            target.to_path_buf()
        };

        match tokio::fs::symlink_metadata(link).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                let existing = tokio::fs::read_link(link).await.map_err(|io| {
                    FsError::filesystem_io(
                        format!("cannot read existing symlink {}", link.display()),
                        io,
                    )
                })?;
                if existing == content || resolves_same(link, target) {
                    return Ok(());
                }
                return Err(FsError::FileExists {
                    path: link.to_path_buf(),
                    reason: format!(
                        "an existing symlink points to {} instead of {}",
                        existing.display(),
                        content.display()
                    ),
                });
            }
            Ok(_) => {
                return Err(FsError::FileExists {
                    path: link.to_path_buf(),
                    reason: "exists and is not a symlink".to_string(),
                });
            }
            Err(_) => {}
        }

        if let Some(parent) = link.parent() {
            if tokio::fs::metadata(parent).await.is_err() {
                tokio::fs::create_dir_all(parent).await.map_err(|io| {
                    FsError::filesystem_io(
                        format!("cannot create symlink parent {}", parent.display()),
                        io,
                    )
                })?;
            }
        }

        tokio::fs::symlink(&content, link).await.map_err(|io| {
            FsError::filesystem_io(
                format!(
                    "cannot create symlink {} -> {}",
                    link.display(),
                    content.display()
                ),
                io,
            )
        })
    }

    /// Resolve the symlink and return the target as a new entry. `all`
    /// chases chained links to their end; `force` passes non-links through
    /// unchanged instead of failing.
    pub async fn follow_link(self, force: bool, all: bool) -> Result<Entry> {
        if self.kind() != EntryKind::Symlink {
            if force {
                return Ok(self);
            }
            return Err(FsError::NotASymlink {
                path: self.source.clone(),
            });
        }

        let mut current = self.source.clone();
        for _ in 0..MAX_LINK_DEPTH {
            let raw = tokio::fs::read_link(&current).await.map_err(|io| {
                FsError::filesystem_io(format!("cannot read symlink {}", current.display()), io)
            })?;
            let resolved = if raw.is_absolute() {
                raw
            } else {
                current
                    .parent()
                    .map(|parent| parent.join(&raw))
                    .unwrap_or(raw)
            };

            if tokio::fs::symlink_metadata(&resolved).await.is_err() {
                return Err(FsError::SymlinkBroken {
                    path: current,
                    target: resolved,
                });
            }

            let is_link = tokio::fs::symlink_metadata(&resolved)
                .await
                .map(|metadata| metadata.file_type().is_symlink())
                .unwrap_or(false);
            if all && is_link {
                current = resolved;
                continue;
            }
            return self.sibling_entry(&resolved);
        }

        Err(FsError::filesystem(format!(
            "symlink chain at {} exceeds {MAX_LINK_DEPTH} levels",
            self.source.display()
        )))
    }
}

fn resolves_same(link: &Path, target: &Path) -> bool {
    match (std::fs::canonicalize(link), std::fs::canonicalize(target)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Relative path from the directory containing `link` to `target`: walk off
/// the shared prefix, then `..` out of the link's remaining directories and
/// down into the target's.
pub(crate) fn relative_link(link: &Path, target: &Path) -> PathBuf {
    let link_dir: Vec<Component> = match link.parent() {
        Some(parent) => parent.components().collect(),
        None => Vec::new(),
    };
    let target_parts: Vec<Component> = target.components().collect();

    let mut common = 0;
    while common < link_dir.len()
        && common < target_parts.len()
        && link_dir[common] == target_parts[common]
    {
        common += 1;
    }

    let mut relative = PathBuf::new();
    for _ in common..link_dir.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part);
    }
    relative
}
