pub mod duplicates;
pub mod mounts;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use rand::{distributions::Alphanumeric, Rng};
use regex::{Regex, RegexBuilder};
use walkdir::WalkDir;

use crate::cmd::{self, RunOptions};
use crate::config::FsContext;
use crate::error::{Access, FsError, Result};
use crate::files::Files;
use crate::path::{resolve, Entry};
use crate::restrict::Restrictions;

/// How far `parent()` derivation is pushed when authorizing creation of a
/// restricted path's ancestors.
const MAX_PARENT_LEVELS: i32 = 32;

/// Directory-only operations, reachable through `Entry::as_directory()`.
#[derive(Debug)]
pub struct Directory<'a> {
    pub(crate) entry: &'a Entry,
}

impl Directory<'_> {
    pub fn path(&self) -> &Path {
        self.entry.source()
    }

    fn restrictions(&self) -> &Restrictions {
        self.entry.restrictions()
    }

    fn context(&self) -> &Arc<FsContext> {
        self.entry.context()
    }

    /// Idempotent recursive mkdir, one segment at a time. A non-directory
    /// blocking a segment is deleted and the walk restarts from scratch; a
    /// segment appearing concurrently is tolerated.
    pub async fn ensure(&self, mode: Option<u32>, clear: bool, sudo: bool) -> Result<()> {
        let path = self.path().to_path_buf();
        if self.entry.is_domain() {
            return Err(FsError::filesystem(format!(
                "cannot create domain path {}",
                path.display()
            )));
        }
        self.authorize_creation(&path)?;

        let mut attempts = 0;
        'restart: loop {
            attempts += 1;
            if attempts > 8 {
                return Err(FsError::filesystem(format!(
                    "cannot establish directory {}, segments keep changing underneath",
                    path.display()
                )));
            }

            let mut current = PathBuf::from("/");
            for component in path.components() {
                let Component::Normal(name) = component else {
                    continue;
                };
                current.push(name);

                match tokio::fs::symlink_metadata(&current).await {
                    Ok(metadata) if metadata.is_dir() => continue,
                    Ok(_) => {
                        // a file or dead symlink occupies the segment
                        self.authorize_creation(&current)?;
                        tracing::warn!(
                            "removing {} to make way for a directory",
                            current.display()
                        );
                        tokio::fs::remove_file(&current).await.map_err(|io| {
                            FsError::filesystem_io(
                                format!("cannot remove blocking entry {}", current.display()),
                                io,
                            )
                        })?;
                        continue 'restart;
                    }
                    Err(_) => {
                        self.authorize_creation(&current)?;
                        let bits = if current == path {
                            mode.unwrap_or(self.context().config.directory_mode)
                        } else {
                            self.context().config.directory_mode
                        };
                        self.create_segment(&current, bits, sudo).await?;
                    }
                }
            }
            break;
        }

        if clear {
            self.remove_children().await?;
        }
        Ok(())
    }

    /// Segments created on the way down to an authorized target may sit
    /// above the restriction boundary; walking the ruleset upward makes
    /// those ancestors legal without widening anything else the caller
    /// does.
    fn authorize_creation(&self, segment: &Path) -> Result<()> {
        let restrictions = self.restrictions();
        let original = match restrictions.check(segment, Access::Write) {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        for levels in 1..=MAX_PARENT_LEVELS {
            let derived = restrictions.parent(levels);
            if derived
                .rules()
                .iter()
                .all(|rule| rule.directory == Path::new("/"))
            {
                break;
            }
            if derived.check(segment, Access::Write).is_ok() {
                return Ok(());
            }
        }
        Err(original)
    }

    async fn create_segment(&self, segment: &Path, bits: u32, sudo: bool) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        match tokio::fs::create_dir(segment).await {
            Ok(()) => {}
            Err(io) if io.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::warn!(
                    "directory {} appeared while ensuring it, continuing",
                    segment.display()
                );
                return Ok(());
            }
            Err(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                self.create_segment_forced(segment, bits, sudo).await?;
                return Ok(());
            }
            Err(io) => {
                return Err(FsError::filesystem_io(
                    format!("cannot create directory {}", segment.display()),
                    io,
                ));
            }
        }

        let permissions = std::fs::Permissions::from_mode(bits);
        tokio::fs::set_permissions(segment, permissions)
            .await
            .map_err(|io| {
                FsError::filesystem_io(
                    format!("cannot set mode on new directory {}", segment.display()),
                    io,
                )
            })
    }

    /// Spawned mkdir with the parent temporarily forced writable, its mode
    /// put back afterwards.
    async fn create_segment_forced(&self, segment: &Path, bits: u32, sudo: bool) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let parent = segment.parent().ok_or_else(|| {
            FsError::filesystem(format!("cannot create {}", segment.display()))
        })?;
        let parent_text = parent.to_string_lossy().to_string();
        let segment_text = segment.to_string_lossy().to_string();
        let saved = std::fs::metadata(parent)
            .ok()
            .map(|metadata| metadata.permissions().mode() & 0o7777);

        let options = RunOptions {
            sudo,
            ..RunOptions::default()
        };
        cmd::run("chmod", &["u+w", "--", parent_text.as_str()], None, &options).await?;
        let mode_text = format!("{bits:o}");
        let created = cmd::run(
            "mkdir",
            &["-m", mode_text.as_str(), "--", segment_text.as_str()],
            None,
            &options,
        )
        .await;
        if let Some(saved) = saved {
            let restore = format!("{saved:o}");
            if let Err(error) = cmd::run(
                "chmod",
                &[restore.as_str(), "--", parent_text.as_str()],
                None,
                &options,
            )
            .await
            {
                tracing::warn!("could not restore mode on {parent_text}: {error}");
            }
        }
        created.map(|_| ())
    }

    async fn remove_children(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(self.path()).await.map_err(|io| {
            FsError::filesystem_io(format!("cannot list {}", self.path().display()), io)
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|io| {
            FsError::filesystem_io(format!("cannot list {}", self.path().display()), io)
        })? {
            let child = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            let removal = if is_dir {
                tokio::fs::remove_dir_all(&child).await
            } else {
                tokio::fs::remove_file(&child).await
            };
            if let Err(io) = removal {
                // already gone is fine, someone else cleared it
                if io.kind() != std::io::ErrorKind::NotFound {
                    return Err(FsError::filesystem_io(
                        format!("cannot clear {}", child.display()),
                        io,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Walk upward from this directory deleting empty levels. Stops at
    /// `until`, at a non-directory, at a non-empty level, or where the
    /// restrictions say ascending is not allowed. Returns how many levels
    /// were removed.
    pub async fn clear_upward(&self, until: Option<&Path>, sudo: bool) -> Result<usize> {
        let restrictions = self.restrictions();
        let mut current = self.path().to_path_buf();
        let mut removed = 0;

        loop {
            if Some(current.as_path()) == until {
                break;
            }
            let Ok(metadata) = tokio::fs::symlink_metadata(&current).await else {
                break;
            };
            if !metadata.is_dir() {
                break;
            }
            if restrictions.check(&current, Access::Write).is_err() {
                break;
            }
            match read_dir_is_empty(&current) {
                Ok(true) => {}
                _ => break,
            }

            let removal = if sudo {
                let text = current.to_string_lossy().to_string();
                cmd::run("rmdir", &["--", text.as_str()], None, &RunOptions::sudo())
                    .await
                    .map(|_| ())
            } else {
                tokio::fs::remove_dir(&current).await.map_err(|io| {
                    FsError::filesystem_io(format!("cannot remove {}", current.display()), io)
                })
            };
            match removal {
                Ok(()) => removed += 1,
                Err(error) => {
                    // a concurrent writer beat us to the directory
                    tracing::warn!(
                        "stopped pruning at {}: {error}",
                        current.display()
                    );
                    break;
                }
            }

            if !restrictions.can_ascend(&current) {
                break;
            }
            let Some(parent) = current.parent() else {
                break;
            };
            current = parent.to_path_buf();
        }

        Ok(removed)
    }

    /// Short-circuits on the first entry instead of loading a listing.
    pub fn is_empty(&self) -> Result<bool> {
        self.restrictions().check(self.path(), Access::Read)?;
        read_dir_is_empty(self.path())
    }

    /// Depth-first listing of files (never directories). A file is included
    /// only when every filter regex matches its name.
    pub fn list_tree(&self, filters: &[Regex], recursive: bool) -> Result<Files> {
        self.restrictions().check(self.path(), Access::Read)?;

        let mut files = Files::with_parent(self.path());
        let mut walker = WalkDir::new(self.path()).min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(
                        "skipping unreadable entry under {}: {error}",
                        self.path().display()
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if filters.iter().all(|filter| filter.is_match(&name)) {
                files.insert(Entry::new(
                    entry.path(),
                    self.restrictions().clone(),
                    self.context().clone(),
                )?);
            }
        }
        Ok(files)
    }

    /// List direct children matching a glob pattern with single-group
    /// alternation (`name[alt1,alt2].ext`). Matching is case-insensitive;
    /// no pattern lists everything.
    pub fn scan(&self, pattern: Option<&str>) -> Result<Files> {
        self.restrictions().check(self.path(), Access::Read)?;

        let matchers = match pattern {
            Some(pattern) => Some(expand_pattern(pattern)?),
            None => None,
        };

        let mut names: Vec<std::ffi::OsString> = std::fs::read_dir(self.path())
            .map_err(|io| {
                FsError::filesystem_io(format!("cannot list {}", self.path().display()), io)
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name())
            .collect();
        names.sort();

        let mut files = Files::with_parent(self.path());
        for name in names {
            let text = name.to_string_lossy();
            let matched = match &matchers {
                Some(matchers) => matchers.iter().any(|matcher| matcher.is_match(&text)),
                None => true,
            };
            if matched {
                files.insert(Entry::new(
                    self.path().join(&name),
                    self.restrictions().clone(),
                    self.context().clone(),
                )?);
            }
        }
        Ok(files)
    }

    /// Apply a callback to every entry from `scan()`. Not recursive;
    /// composes with `Execute` for tree-wide callbacks.
    pub fn each<F>(&self, mut callback: F) -> Result<usize>
    where
        F: FnMut(&Path) -> Result<()>,
    {
        let files = self.scan(None)?;
        let mut count = 0;
        for (path, _) in files.iter() {
            callback(path)?;
            count += 1;
        }
        Ok(count)
    }

    /// Total size of all files in the tree. Dead symlinks are logged and
    /// skipped rather than failing the traversal.
    pub fn tree_file_size(&self) -> Result<u64> {
        self.restrictions().check(self.path(), Access::Read)?;

        let mut total = 0;
        self.walk_files(|metadata| total += metadata.len())?;
        Ok(total)
    }

    /// Number of files in the tree, with the same dead-symlink tolerance.
    pub fn tree_file_count(&self) -> Result<usize> {
        self.restrictions().check(self.path(), Access::Read)?;

        let mut count = 0;
        self.walk_files(|_| count += 1)?;
        Ok(count)
    }

    fn walk_files<F: FnMut(&std::fs::Metadata)>(&self, mut visit: F) -> Result<()> {
        for result in WalkDir::new(self.path()).min_depth(1) {
            let entry = match result {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(
                        "skipping unreadable entry under {}: {error}",
                        self.path().display()
                    );
                    continue;
                }
            };
            if entry.file_type().is_symlink() {
                match std::fs::metadata(entry.path()) {
                    Ok(metadata) if metadata.is_file() => visit(&metadata),
                    Ok(_) => {}
                    Err(_) => {
                        tracing::warn!(
                            "skipping dead symlink {}",
                            entry.path().display()
                        );
                    }
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => visit(&metadata),
                Err(error) => {
                    tracing::warn!("skipping {}: {error}", entry.path().display());
                }
            }
        }
        Ok(())
    }

    pub fn single_file(&self) -> Result<Entry> {
        self.single(None, false, false)
    }

    pub fn single_directory(&self) -> Result<Entry> {
        self.single(None, true, false)
    }

    /// Exactly-one-match semantics over the direct children: zero matches
    /// is an error, several matches is an error unless `allow_multiple`, in
    /// which case the first (by name) is returned.
    pub fn single(
        &self,
        filter: Option<&Regex>,
        want_directory: bool,
        allow_multiple: bool,
    ) -> Result<Entry> {
        self.restrictions().check(self.path(), Access::Read)?;

        let mut matches: Vec<PathBuf> = std::fs::read_dir(self.path())
            .map_err(|io| {
                FsError::filesystem_io(format!("cannot list {}", self.path().display()), io)
            })?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let is_dir = entry
                    .file_type()
                    .map(|file_type| file_type.is_dir())
                    .unwrap_or(false);
                if is_dir != want_directory {
                    return false;
                }
                match filter {
                    Some(filter) => filter.is_match(&entry.file_name().to_string_lossy()),
                    None => true,
                }
            })
            .map(|entry| entry.path())
            .collect();
        matches.sort();

        let kind_name = if want_directory { "directory" } else { "file" };
        match matches.len() {
            0 => Err(FsError::filesystem(format!(
                "no {kind_name} found in {}",
                self.path().display()
            ))),
            1 => Entry::new(&matches[0], self.restrictions().clone(), self.context().clone()),
            _ if allow_multiple => {
                Entry::new(&matches[0], self.restrictions().clone(), self.context().clone())
            }
            n => Err(FsError::filesystem(format!(
                "{n} {kind_name} matches found in {}, expected exactly one",
                self.path().display()
            ))),
        }
    }

    /// Copy the tree to `target`: directories are recreated (even when not
    /// recursing), files are OS-copied, `progress` hears about every copied
    /// file.
    pub async fn copy_to<F: FnMut(&Path)>(
        &self,
        target: &Path,
        restrictions: Option<Restrictions>,
        mut progress: Option<F>,
        recursive: bool,
    ) -> Result<Entry> {
        self.restrictions().check(self.path(), Access::Read)?;
        let restrictions = restrictions.unwrap_or_else(|| self.restrictions().clone());
        let target = resolve::lexical_absolute(target)?;
        restrictions.check(&target, Access::Write)?;

        tokio::fs::create_dir_all(&target).await.map_err(|io| {
            FsError::filesystem_io(format!("cannot create {}", target.display()), io)
        })?;

        let mut stack = vec![(self.path().to_path_buf(), target.clone())];
        while let Some((from_dir, to_dir)) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&from_dir).await.map_err(|io| {
                FsError::filesystem_io(format!("cannot list {}", from_dir.display()), io)
            })?;
            while let Some(entry) = entries.next_entry().await.map_err(|io| {
                FsError::filesystem_io(format!("cannot list {}", from_dir.display()), io)
            })? {
                let from = entry.path();
                let to = to_dir.join(entry.file_name());
                let file_type = entry.file_type().await.map_err(|io| {
                    FsError::filesystem_io(format!("cannot stat {}", from.display()), io)
                })?;

                if file_type.is_dir() {
                    tokio::fs::create_dir_all(&to).await.map_err(|io| {
                        FsError::filesystem_io(format!("cannot create {}", to.display()), io)
                    })?;
                    if recursive {
                        stack.push((from, to));
                    }
                } else if file_type.is_file() {
                    tokio::fs::copy(&from, &to).await.map_err(|io| {
                        FsError::filesystem_io(
                            format!("cannot copy {} to {}", from.display(), to.display()),
                            io,
                        )
                    })?;
                    if let Some(callback) = progress.as_mut() {
                        callback(&from);
                    }
                } else {
                    tracing::warn!("skipping special entry {}", from.display());
                }
            }
        }

        Entry::new(target, restrictions, self.context().clone())
    }
}

fn read_dir_is_empty(path: &Path) -> Result<bool> {
    let mut entries = std::fs::read_dir(path)
        .map_err(|io| FsError::filesystem_io(format!("cannot list {}", path.display()), io))?;
    Ok(entries.next().is_none())
}

/// Create a uniquely named temporary directory holding a `.lock` sentinel
/// that protects it from unrelated cleanup sweeps. The returned entry
/// carries restrictions scoped to the new directory.
pub async fn temporary(context: Arc<FsContext>) -> Result<Entry> {
    let base = std::env::temp_dir().join("fsbound");
    tokio::fs::create_dir_all(&base).await.map_err(|io| {
        FsError::filesystem_io(format!("cannot create {}", base.display()), io)
    })?;

    let size = context.config.target_name_size;
    for _ in 0..16 {
        let name: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(size)
            .map(char::from)
            .collect();
        let path = base.join(name);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                tokio::fs::write(path.join(".lock"), b"").await.map_err(|io| {
                    FsError::filesystem_io(
                        format!("cannot write lock sentinel in {}", path.display()),
                        io,
                    )
                })?;
                let restrictions = Restrictions::new("temporary").allow(&path, true);
                return Entry::new(path, restrictions, context);
            }
            Err(io) if io.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(io) => {
                return Err(FsError::filesystem_io(
                    format!("cannot create temporary directory under {}", base.display()),
                    io,
                ))
            }
        }
    }
    Err(FsError::filesystem(
        "could not find a free temporary directory name",
    ))
}

/// Expand a glob pattern with at most one `[alt1,alt2]` alternation group
/// into case-insensitive matchers. `*` and `?` carry their usual glob
/// meaning.
fn expand_pattern(pattern: &str) -> Result<Vec<Regex>> {
    if pattern.matches('[').count() > 1 || pattern.matches(']').count() > 1 {
        return Err(FsError::filesystem(format!(
            "invalid pattern '{pattern}': multiple bracket groups are not supported"
        )));
    }

    let expansions: Vec<String> = match (pattern.find('['), pattern.find(']')) {
        (Some(open), Some(close)) if open < close => {
            let prefix = &pattern[..open];
            let suffix = &pattern[close + 1..];
            pattern[open + 1..close]
                .split(',')
                .map(|alternative| format!("{prefix}{alternative}{suffix}"))
                .collect()
        }
        (None, None) => vec![pattern.to_string()],
        _ => {
            return Err(FsError::filesystem(format!(
                "invalid pattern '{pattern}': unbalanced bracket group"
            )))
        }
    };

    expansions
        .iter()
        .map(|glob| {
            let mut regex = String::from("^");
            for c in glob.chars() {
                match c {
                    '*' => regex.push_str(".*"),
                    '?' => regex.push('.'),
                    c => regex.push_str(&regex::escape(&c.to_string())),
                }
            }
            regex.push('$');
            RegexBuilder::new(&regex)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    FsError::filesystem(format!("invalid pattern '{glob}': {e}"))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;
    use crate::path::DeleteOptions;

    fn context() -> Arc<FsContext> {
        FsContext::new(FsConfig::default())
    }

    fn writable(dir: &Path) -> Restrictions {
        Restrictions::new("dir-test").allow(dir, true)
    }

    fn entry_for(path: &Path, root: &Path) -> Entry {
        Entry::new(path, writable(root), context()).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_then_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("a/b/c");

        let entry = entry_for(&target, temp.path());
        entry.as_directory().unwrap().ensure(None, false, false).await.unwrap();

        assert!(target.is_dir());
        assert!(entry.as_directory().unwrap().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_ensure_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("moded");

        let entry = entry_for(&target, temp.path());
        entry
            .as_directory()
            .unwrap()
            .ensure(Some(0o700), false, false)
            .await
            .unwrap();
        let mode = std::fs::metadata(&target).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o700);
    }

    #[tokio::test]
    async fn test_ensure_replaces_blocking_file() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("spot");
        std::fs::write(&blocker, "in the way").unwrap();
        let target = blocker.join("below");

        let entry = entry_for(&target, temp.path());
        entry.as_directory().unwrap().ensure(None, false, false).await.unwrap();
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn test_ensure_replaces_dead_symlink() {
        let temp = tempfile::tempdir().unwrap();
        let link = temp.path().join("dangling");
        std::os::unix::fs::symlink(temp.path().join("missing"), &link).unwrap();

        let entry = entry_for(&link, temp.path());
        entry.as_directory().unwrap().ensure(None, false, false).await.unwrap();
        assert!(link.is_dir());
    }

    #[tokio::test]
    async fn test_ensure_clear_empties_existing() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("full");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("junk"), "x").unwrap();
        std::fs::create_dir(target.join("subdir")).unwrap();

        let entry = entry_for(&target, temp.path());
        entry.as_directory().unwrap().ensure(None, true, false).await.unwrap();
        assert!(entry.as_directory().unwrap().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_clear_upward_prunes_empty_ancestors() {
        let temp = tempfile::tempdir().unwrap();
        let deep = temp.path().join("a/b/c");
        std::fs::create_dir_all(&deep).unwrap();

        let entry = entry_for(&deep, temp.path());
        let removed = entry
            .as_directory()
            .unwrap()
            .clear_upward(Some(temp.path()), false)
            .await
            .unwrap();

        assert_eq!(removed, 3);
        assert!(!temp.path().join("a").exists());
        assert!(temp.path().exists());
    }

    #[tokio::test]
    async fn test_clear_upward_stops_at_non_empty() {
        let temp = tempfile::tempdir().unwrap();
        let deep = temp.path().join("a/b/c");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(temp.path().join("a/keep.txt"), "x").unwrap();

        let entry = entry_for(&deep, temp.path());
        let removed = entry
            .as_directory()
            .unwrap()
            .clear_upward(None, false)
            .await
            .unwrap();

        assert_eq!(removed, 2); // c and b, a still has keep.txt
        assert!(temp.path().join("a").exists());
        assert!(!temp.path().join("a/b").exists());
    }

    #[tokio::test]
    async fn test_clear_upward_stops_at_restriction_boundary() {
        let temp = tempfile::tempdir().unwrap();
        let deep = temp.path().join("a/b/c");
        std::fs::create_dir_all(&deep).unwrap();

        // only the subtree under a/b is writable
        let restrictions = Restrictions::new("narrow").allow(temp.path().join("a/b"), true);
        let entry = Entry::new(&deep, restrictions, context()).unwrap();
        let removed = entry
            .as_directory()
            .unwrap()
            .clear_upward(None, false)
            .await
            .unwrap();

        assert_eq!(removed, 2); // c, then b; a is outside the ruleset
        assert!(temp.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_delete_with_clean_path_prunes() {
        let temp = tempfile::tempdir().unwrap();
        let deep = temp.path().join("x/y/z");
        std::fs::create_dir_all(&deep).unwrap();
        let file = deep.join("only.txt");
        std::fs::write(&file, "x").unwrap();

        // restrictions cover the nested tree but not the tempdir itself
        let restrictions = Restrictions::new("prune").allow(temp.path().join("x"), true);
        let entry = Entry::new(&file, restrictions, context()).unwrap();
        entry.delete(&DeleteOptions::default()).await.unwrap();

        assert!(!temp.path().join("x").exists());
        assert!(temp.path().exists());
    }

    #[test]
    fn test_list_tree_files_only_all_filters_must_match() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("report_a.txt"), "x").unwrap();
        std::fs::write(temp.path().join("report_b.log"), "x").unwrap();
        std::fs::write(temp.path().join("sub/report_c.txt"), "x").unwrap();
        std::fs::write(temp.path().join("other.txt"), "x").unwrap();

        let entry = entry_for(temp.path(), temp.path());
        let filters = vec![
            Regex::new("^report").unwrap(),
            Regex::new("\\.txt$").unwrap(),
        ];
        let files = entry.as_directory().unwrap().list_tree(&filters, true).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.contains(&temp.path().join("report_a.txt")));
        assert!(files.contains(&temp.path().join("sub/report_c.txt")));
    }

    #[test]
    fn test_list_tree_non_recursive() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("top.txt"), "x").unwrap();
        std::fs::write(temp.path().join("sub/nested.txt"), "x").unwrap();

        let entry = entry_for(temp.path(), temp.path());
        let files = entry.as_directory().unwrap().list_tree(&[], false).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains(&temp.path().join("top.txt")));
    }

    #[test]
    fn test_scan_bracket_alternation() {
        let temp = tempfile::tempdir().unwrap();
        for name in ["photo_small.png", "photo_large.png", "photo_medium.png", "note.txt"] {
            std::fs::write(temp.path().join(name), "x").unwrap();
        }

        let entry = entry_for(temp.path(), temp.path());
        let files = entry
            .as_directory()
            .unwrap()
            .scan(Some("photo_[small,large].png"))
            .unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.contains(&temp.path().join("photo_large.png")));
        assert!(files.contains(&temp.path().join("photo_small.png")));
    }

    #[test]
    fn test_scan_case_insensitive_wildcard() {
        let temp = tempfile::tempdir().unwrap();
        for name in ["Readme.MD", "readme.md", "other.txt"] {
            std::fs::write(temp.path().join(name), "x").unwrap();
        }

        let entry = entry_for(temp.path(), temp.path());
        let files = entry.as_directory().unwrap().scan(Some("readme.*")).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_scan_rejects_multiple_bracket_groups() {
        let temp = tempfile::tempdir().unwrap();
        let entry = entry_for(temp.path(), temp.path());
        let err = entry
            .as_directory()
            .unwrap()
            .scan(Some("a[b,c]d[e,f]"))
            .unwrap_err();
        assert!(err.to_string().contains("multiple bracket groups"));
    }

    #[test]
    fn test_single_file_semantics() {
        let temp = tempfile::tempdir().unwrap();
        let entry = entry_for(temp.path(), temp.path());

        // zero entries
        let err = entry.as_directory().unwrap().single_file().unwrap_err();
        assert!(err.to_string().contains("no file found"));

        // exactly one
        std::fs::write(temp.path().join("only.txt"), "x").unwrap();
        let single = entry.as_directory().unwrap().single_file().unwrap();
        assert_eq!(single.source(), temp.path().join("only.txt"));

        // two entries
        std::fs::write(temp.path().join("second.txt"), "x").unwrap();
        let err = entry.as_directory().unwrap().single_file().unwrap_err();
        assert!(err.to_string().contains("expected exactly one"));

        // allowed multiple returns the first by name
        let first = entry
            .as_directory()
            .unwrap()
            .single(None, false, true)
            .unwrap();
        assert_eq!(first.source(), temp.path().join("only.txt"));
    }

    #[test]
    fn test_single_with_filter_ignores_directories() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("a_dir")).unwrap();
        std::fs::write(temp.path().join("match_me.txt"), "x").unwrap();
        std::fs::write(temp.path().join("skip.log"), "x").unwrap();

        let entry = entry_for(temp.path(), temp.path());
        let filter = Regex::new("\\.txt$").unwrap();
        let found = entry
            .as_directory()
            .unwrap()
            .single(Some(&filter), false, false)
            .unwrap();
        assert_eq!(found.source(), temp.path().join("match_me.txt"));

        let dir = entry.as_directory().unwrap().single_directory().unwrap();
        assert_eq!(dir.source(), temp.path().join("a_dir"));
    }

    #[test]
    fn test_tree_size_and_count() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("a"), vec![0u8; 100]).unwrap();
        std::fs::write(temp.path().join("sub/b"), vec![0u8; 50]).unwrap();
        // dead symlink must be skipped, not fail the walk
        std::os::unix::fs::symlink(
            temp.path().join("missing"),
            temp.path().join("dangling"),
        )
        .unwrap();

        let entry = entry_for(temp.path(), temp.path());
        assert_eq!(entry.as_directory().unwrap().tree_file_size().unwrap(), 150);
        assert_eq!(entry.as_directory().unwrap().tree_file_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_copy_to_recursive_with_progress() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.txt"), "a").unwrap();
        std::fs::write(src.join("nested/b.txt"), "b").unwrap();
        let dst = temp.path().join("dst");

        let entry = entry_for(&src, temp.path());
        let mut seen = Vec::new();
        let copy = entry
            .as_directory()
            .unwrap()
            .copy_to(&dst, None, Some(|path: &Path| seen.push(path.to_path_buf())), true)
            .await
            .unwrap();

        assert_eq!(copy.source(), dst);
        assert_eq!(std::fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
        assert_eq!(
            std::fs::read_to_string(dst.join("nested/b.txt")).unwrap(),
            "b"
        );
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_copy_to_non_recursive_recreates_directories() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.txt"), "a").unwrap();
        std::fs::write(src.join("nested/b.txt"), "b").unwrap();
        let dst = temp.path().join("dst");

        let entry = entry_for(&src, temp.path());
        entry
            .as_directory()
            .unwrap()
            .copy_to(&dst, None, None::<fn(&Path)>, false)
            .await
            .unwrap();

        assert!(dst.join("a.txt").exists());
        assert!(dst.join("nested").is_dir());
        assert!(!dst.join("nested/b.txt").exists());
    }

    #[test]
    fn test_each_visits_scan_results() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a"), "x").unwrap();
        std::fs::write(temp.path().join("b"), "x").unwrap();

        let entry = entry_for(temp.path(), temp.path());
        let mut visited = Vec::new();
        let count = entry
            .as_directory()
            .unwrap()
            .each(|path| {
                visited.push(path.to_path_buf());
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(visited.len(), 2);
    }

    #[tokio::test]
    async fn test_temporary_has_lock_sentinel() {
        let entry = temporary(context()).await.unwrap();
        assert!(entry.source().join(".lock").exists());
        assert!(entry
            .restrictions()
            .check(entry.source(), Access::Write)
            .is_ok());
        std::fs::remove_dir_all(entry.source()).unwrap();
    }

    #[test]
    fn test_expand_pattern_plain() {
        let matchers = expand_pattern("*.txt").unwrap();
        assert_eq!(matchers.len(), 1);
        assert!(matchers[0].is_match("NOTES.TXT"));
        assert!(!matchers[0].is_match("notes.txt.bak"));
    }
}
