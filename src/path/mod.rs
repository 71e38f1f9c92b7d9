pub mod resolve;
pub mod stream;
pub mod symlink;
pub mod wipe;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cmd::{self, RunOptions};
use crate::config::FsContext;
use crate::dir::Directory;
use crate::error::{Access, FsError, Result};
use crate::restrict::Restrictions;

/// Longest accepted source path, in bytes.
pub const MAX_SOURCE_BYTES: usize = 4096;

/// Runtime kind tag for an entry. Directory-only operations are reachable
/// only through `Entry::as_directory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// Permission mode for `chmod`. Symbolic deltas cannot be expressed as a
/// direct mode-bit syscall and always shell out.
#[derive(Debug, Clone)]
pub enum Mode {
    Numeric(u32),
    Symbolic(String),
}

#[derive(Debug, Clone)]
pub struct DeleteOptions {
    /// Prune now-empty parent directories upward after deletion.
    pub clean_path: bool,
    pub sudo: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            clean_path: true,
            sudo: false,
        }
    }
}

/// The single concrete path entity: a path bound to a restriction set and a
/// policy context, with optional open-stream state. Operations that change
/// what the path refers to (`move_to`, `rename_to`, `follow_link`) consume
/// the entry and return a new one.
#[derive(Debug)]
pub struct Entry {
    pub(crate) source: PathBuf,
    pub(crate) restrictions: Restrictions,
    pub(crate) context: Arc<FsContext>,
    pub(crate) stream: Option<stream::Stream>,
}

impl Entry {
    pub fn new(
        source: impl AsRef<Path>,
        restrictions: Restrictions,
        context: Arc<FsContext>,
    ) -> Result<Self> {
        let raw = source.as_ref();
        let bytes = raw.as_os_str().len();
        if bytes == 0 {
            return Err(FsError::filesystem("entry source path is empty"));
        }
        if bytes > MAX_SOURCE_BYTES {
            return Err(FsError::filesystem(format!(
                "entry source path is {bytes} bytes, the maximum is {MAX_SOURCE_BYTES}"
            )));
        }

        let source = resolve::lexical_absolute(raw)?;
        Ok(Self {
            source,
            restrictions,
            context,
            stream: None,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn restrictions(&self) -> &Restrictions {
        &self.restrictions
    }

    pub fn context(&self) -> &Arc<FsContext> {
        &self.context
    }

    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.source.file_name()
    }

    /// Whether the source is a `host:/path` domain path, exempt from local
    /// filesystem resolution.
    pub fn is_domain(&self) -> bool {
        self.source
            .to_str()
            .map(resolve::is_domain_path)
            .unwrap_or(false)
    }

    pub fn domain(&self) -> Option<&str> {
        self.source
            .to_str()
            .and_then(resolve::split_domain)
            .map(|(domain, _)| domain)
    }

    pub fn kind(&self) -> EntryKind {
        match std::fs::symlink_metadata(&self.source) {
            Ok(metadata) if metadata.file_type().is_symlink() => EntryKind::Symlink,
            Ok(metadata) if metadata.is_dir() => EntryKind::Directory,
            Ok(_) => EntryKind::File,
            Err(_) => EntryKind::Unknown,
        }
    }

    /// The directory operation surface. Succeeds for directories and for
    /// paths that do not exist yet (so `ensure` can create them); fails with
    /// `WrongKind` when something else occupies the path.
    pub fn as_directory(&self) -> Result<Directory<'_>> {
        match self.kind() {
            EntryKind::Directory | EntryKind::Unknown => Ok(Directory { entry: self }),
            actual => Err(FsError::WrongKind {
                path: self.source.clone(),
                expected: EntryKind::Directory,
                actual,
            }),
        }
    }

    fn parent(&self) -> Option<&Path> {
        match self.source.parent() {
            Some(parent) if parent != Path::new("") => Some(parent),
            _ => None,
        }
    }

    pub(crate) fn sibling_entry(&self, path: &Path) -> Result<Entry> {
        Entry::new(path, self.restrictions.clone(), self.context.clone())
    }

    /// Whether the path exists. A dangling symlink counts when
    /// `check_dead_symlink` is set; otherwise a missing path triggers at
    /// most one auto-mount attempt through the context's registry.
    pub async fn exists(&self, check_dead_symlink: bool, auto_mount: bool) -> bool {
        if tokio::fs::metadata(&self.source).await.is_ok() {
            return true;
        }
        if check_dead_symlink && tokio::fs::symlink_metadata(&self.source).await.is_ok() {
            return true;
        }
        if auto_mount && self.try_auto_mount().await {
            return tokio::fs::metadata(&self.source).await.is_ok();
        }
        false
    }

    /// One-shot mount attempt; true when a mount was performed.
    pub(crate) async fn try_auto_mount(&self) -> bool {
        if !self.context.config.auto_mount {
            return false;
        }
        let Some(mounts) = &self.context.mounts else {
            return false;
        };
        tracing::info!("auto-mounting {}", self.source.display());
        match mounts.mount(&self.source).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("auto-mount of {} failed: {e}", self.source.display());
                false
            }
        }
    }

    pub fn is_dead_symlink(&self) -> bool {
        self.kind() == EntryKind::Symlink && std::fs::metadata(&self.source).is_err()
    }

    /// Verify the path exists and can be read, producing an error that
    /// distinguishes a missing leaf from a missing branch from a permission
    /// problem. When `previous` is supplied the caller is diagnosing an
    /// already-failed operation: if the path looks fine, `previous` is
    /// returned unchanged instead of being suppressed.
    pub fn check_readable(&self, previous: Option<FsError>) -> Result<()> {
        if !self.context.read_enabled {
            return Err(FsError::FileNotReadable {
                path: self.source.clone(),
                reason: "read access is globally disabled".to_string(),
                source: None,
            });
        }
        self.restrictions.check(&self.source, Access::Read)?;

        match std::fs::metadata(&self.source) {
            Ok(metadata) => {
                let probe = if metadata.is_dir() {
                    std::fs::read_dir(&self.source).map(|_| ())
                } else {
                    std::fs::File::open(&self.source).map(|_| ())
                };
                if let Err(io) = probe {
                    return Err(FsError::FileNotReadable {
                        path: self.source.clone(),
                        reason: "exists but cannot be read".to_string(),
                        source: Some(io),
                    });
                }
            }
            Err(_) => return Err(self.not_exist_error()),
        }

        match previous {
            // The path looks fine, so the original failure had some other
            // cause; surface it unchanged.
            Some(original) => Err(original),
            None => Ok(()),
        }
    }

    /// Writable counterpart of `check_readable`, with the same labeling and
    /// `previous` semantics.
    pub fn check_writable(&self, previous: Option<FsError>) -> Result<()> {
        if !self.context.write_enabled {
            return Err(FsError::FileNotWritable {
                path: self.source.clone(),
                reason: "write access is globally disabled".to_string(),
                source: None,
            });
        }
        self.restrictions.check(&self.source, Access::Write)?;

        match std::fs::metadata(&self.source) {
            Ok(metadata) => {
                if metadata.permissions().readonly() {
                    return Err(FsError::FileNotWritable {
                        path: self.source.clone(),
                        reason: "exists but is read-only".to_string(),
                        source: None,
                    });
                }
            }
            Err(_) => return Err(self.not_exist_error()),
        }

        match previous {
            Some(original) => Err(original),
            None => Ok(()),
        }
    }

    fn not_exist_error(&self) -> FsError {
        if let Some(parent) = self.parent() {
            if std::fs::metadata(parent).is_err() {
                return FsError::ParentNotExist {
                    path: self.source.clone(),
                    parent: parent.to_path_buf(),
                };
            }
        }
        FsError::FileNotExist {
            path: self.source.clone(),
        }
    }

    /// Idempotent "make this file writable": chmod an existing read-only
    /// file, create missing parent directories otherwise. Returns `false`
    /// when the file itself still has to be created by the caller.
    pub async fn ensure_file_writable(&self) -> Result<bool> {
        self.restrictions.check(&self.source, Access::Write)?;

        match tokio::fs::metadata(&self.source).await {
            Ok(metadata) => {
                if metadata.permissions().readonly() {
                    self.chmod(Mode::Numeric(self.context.config.file_mode), false, false)
                        .await?;
                }
                Ok(true)
            }
            Err(_) => {
                if let Some(parent) = self.parent() {
                    let parent_entry =
                        Entry::new(parent, self.restrictions.parent(1), self.context.clone())?;
                    parent_entry.as_directory()?.ensure(None, false, false).await?;
                }
                Ok(false)
            }
        }
    }

    /// Readable counterpart of `ensure_file_writable`.
    pub async fn ensure_file_readable(&self) -> Result<bool> {
        self.restrictions.check(&self.source, Access::Read)?;

        match tokio::fs::metadata(&self.source).await {
            Ok(_) => {
                if self.check_readable(None).is_err() {
                    self.chmod(Mode::Numeric(self.context.config.file_mode), false, false)
                        .await?;
                }
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Delete the path (recursively for directories) and, when
    /// `clean_path`, prune now-empty parents upward. The removal and the
    /// prune are separate steps; a crash in between leaves ancestors
    /// unpruned, which is acceptable.
    pub async fn delete(self, options: &DeleteOptions) -> Result<()> {
        self.check_closed()?;
        self.restrictions.check(&self.source, Access::Write)?;
        if !self.context.write_enabled {
            return Err(FsError::FileNotWritable {
                path: self.source.clone(),
                reason: "write access is globally disabled".to_string(),
                source: None,
            });
        }

        let path = self.source.to_string_lossy().to_string();
        let run_options = RunOptions {
            sudo: options.sudo,
            ..RunOptions::default()
        };
        cmd::run("rm", &["-rf", "--", path.as_str()], None, &run_options).await?;
        tracing::info!("deleted {path}");

        if options.clean_path {
            self.prune_upward(options.sudo).await?;
        }
        Ok(())
    }

    /// Overwrite file contents through an external multi-pass secure erase
    /// before unlinking, then remove leftovers and prune like `delete`.
    pub async fn secure_delete(self, options: &DeleteOptions) -> Result<()> {
        self.check_closed()?;
        self.restrictions.check(&self.source, Access::Write)?;

        let path = self.source.to_string_lossy().to_string();
        let run_options = RunOptions {
            sudo: options.sudo,
            ..RunOptions::default()
        };
        cmd::run(
            "find",
            &[
                path.as_str(),
                "-type",
                "f",
                "-exec",
                "shred",
                "--remove=wipe",
                "-f",
                "-n",
                "3",
                "-z",
                "{}",
                ";",
            ],
            None,
            &run_options,
        )
        .await?;
        // shred removed the files, the directory skeleton remains
        cmd::run("rm", &["-rf", "--", path.as_str()], None, &run_options).await?;
        tracing::info!("securely deleted {path}");

        if options.clean_path {
            self.prune_upward(options.sudo).await?;
        }
        Ok(())
    }

    async fn prune_upward(&self, sudo: bool) -> Result<()> {
        let Some(parent) = self.parent() else {
            return Ok(());
        };
        let parent_entry = self.sibling_entry(parent)?;
        let Ok(directory) = parent_entry.as_directory() else {
            return Ok(());
        };
        directory.clear_upward(None, sudo).await?;
        Ok(())
    }

    /// Move the entry to `target`. An existing directory target receives
    /// the entry inside it under the same basename; an existing
    /// non-directory target is an error; a missing target gets its parent
    /// created. Returns the entry at its new location.
    pub async fn move_to(
        self,
        target: &Path,
        restrictions: Option<Restrictions>,
    ) -> Result<Entry> {
        self.check_closed()?;
        let restrictions = restrictions.unwrap_or_else(|| self.restrictions.clone());
        self.restrictions.check(&self.source, Access::Write)?;

        let target = resolve::lexical_absolute(target)?;
        let destination = match std::fs::metadata(&target) {
            Ok(metadata) if metadata.is_dir() => {
                let name = self.source.file_name().ok_or_else(|| {
                    FsError::filesystem(format!(
                        "cannot move {}, it has no file name",
                        self.source.display()
                    ))
                })?;
                target.join(name)
            }
            Ok(_) => {
                return Err(FsError::FileExists {
                    path: target,
                    reason: "move target exists and is not a directory".to_string(),
                })
            }
            Err(_) => {
                if let Some(parent) = target.parent() {
                    let parent_entry =
                        Entry::new(parent, restrictions.parent(1), self.context.clone())?;
                    parent_entry.as_directory()?.ensure(None, false, false).await?;
                }
                target
            }
        };
        restrictions.check(&destination, Access::Write)?;

        tokio::fs::rename(&self.source, &destination)
            .await
            .map_err(|e| {
                FsError::filesystem_io(
                    format!(
                        "cannot move {} to {}",
                        self.source.display(),
                        destination.display()
                    ),
                    e,
                )
            })?;

        Entry::new(destination, restrictions, self.context.clone())
    }

    /// Rename within the parent directory. Returns the renamed entry.
    pub async fn rename_to(self, name: &str) -> Result<Entry> {
        self.check_closed()?;
        let parent = self.parent().ok_or_else(|| {
            FsError::filesystem(format!("cannot rename {}", self.source.display()))
        })?;
        let destination = parent.join(name);
        self.restrictions.check(&self.source, Access::Write)?;
        self.restrictions.check(&destination, Access::Write)?;

        tokio::fs::rename(&self.source, &destination)
            .await
            .map_err(|e| {
                FsError::filesystem_io(
                    format!(
                        "cannot rename {} to {}",
                        self.source.display(),
                        destination.display()
                    ),
                    e,
                )
            })?;

        Entry::new(destination, self.restrictions, self.context.clone())
    }

    /// Numeric, non-recursive modes use a direct syscall; symbolic modes
    /// and recursion shell out, since mode-bit syscalls cannot express
    /// symbolic deltas.
    pub async fn chmod(&self, mode: Mode, recursive: bool, sudo: bool) -> Result<()> {
        self.restrictions.check(&self.source, Access::Write)?;

        if let (Mode::Numeric(bits), false) = (&mode, recursive) {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(*bits);
            return match tokio::fs::set_permissions(&self.source, permissions).await {
                Ok(()) => Ok(()),
                Err(io) => {
                    let wrapped = FsError::filesystem_io(
                        format!("cannot chmod {}", self.source.display()),
                        io,
                    );
                    // the check always errors when handed a previous failure
                    match self.check_writable(Some(wrapped)) {
                        Err(labeled) => Err(labeled),
                        Ok(()) => Ok(()),
                    }
                }
            };
        }

        let mode_text = match &mode {
            Mode::Numeric(bits) => format!("{bits:o}"),
            Mode::Symbolic(text) => text.clone(),
        };
        let path = self.source.to_string_lossy().to_string();
        let mut args: Vec<&str> = Vec::new();
        if recursive {
            args.push("-R");
        }
        args.push(mode_text.as_str());
        args.push("--");
        args.push(path.as_str());

        let run_options = RunOptions {
            sudo,
            ..RunOptions::default()
        };
        cmd::run("chmod", &args, None, &run_options).await?;
        Ok(())
    }

    /// Ownership changes always require elevation and always shell out.
    pub async fn chown(
        &self,
        owner: Option<&str>,
        group: Option<&str>,
        recursive: bool,
    ) -> Result<()> {
        self.restrictions.check(&self.source, Access::Write)?;

        let spec = match (owner, group) {
            (Some(owner), Some(group)) => format!("{owner}:{group}"),
            (Some(owner), None) => owner.to_string(),
            (None, Some(group)) => format!(":{group}"),
            (None, None) => {
                return Err(FsError::filesystem("chown requires an owner or a group"))
            }
        };

        let path = self.source.to_string_lossy().to_string();
        let mut args: Vec<&str> = Vec::new();
        if recursive {
            args.push("-R");
        }
        args.push(spec.as_str());
        args.push("--");
        args.push(path.as_str());

        cmd::run("chown", &args, None, &RunOptions::sudo()).await?;
        Ok(())
    }

    /// Permission bits of the path.
    pub fn mode(&self) -> Result<u32> {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::symlink_metadata(&self.source)
            .map_err(|_| self.not_exist_error())?;
        Ok(metadata.permissions().mode() & 0o7777)
    }

    /// Mime type, looked up through `file(1)`.
    pub async fn mime_type(&self) -> Result<String> {
        self.check_readable(None)?;
        let path = self.source.to_string_lossy().to_string();
        let result = cmd::run(
            "file",
            &["--brief", "--mime-type", "--", path.as_str()],
            None,
            &RunOptions::default(),
        )
        .await
        .map_err(|e| FsError::filesystem(format!("mimetype lookup failed: {e}")))?;

        match result.out_lines().first() {
            Some(line) if !line.is_empty() => Ok(line.to_string()),
            _ => Err(FsError::filesystem(format!(
                "mimetype lookup for {} produced no output",
                self.source.display()
            ))),
        }
    }
}
