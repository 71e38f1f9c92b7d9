use std::path::{Path, PathBuf};

use crate::cmd::{self, RunOptions};
use crate::dir::Directory;
use crate::error::{FsError, Result};

/// Sentinel marker meaning "this directory has its mount attached".
pub const MOUNTED_MARKER: &str = ".ismounted";
/// Sentinel marker meaning "this directory is a mount point without its
/// mount".
pub const NOT_MOUNTED_MARKER: &str = ".isnotmounted";

/// External mount registry. The filesystem layer only ever asks it to
/// attach, detach, or describe mounts; how it does that is its business.
#[async_trait::async_trait]
pub trait Mounts: Send + Sync {
    async fn mount(&self, target: &Path) -> Result<()>;
    async fn unmount(&self, target: &Path) -> Result<()>;
    async fn bind(&self, source: &Path, target: &Path) -> Result<()>;
    /// The device or directory mounted on `target`, if any.
    async fn source_of(&self, target: &Path) -> Result<Option<PathBuf>>;
}

/// Registry backed by the system mount tooling.
pub struct CommandMounts {
    pub sudo: bool,
}

#[async_trait::async_trait]
impl Mounts for CommandMounts {
    async fn mount(&self, target: &Path) -> Result<()> {
        let text = target.to_string_lossy().to_string();
        let options = RunOptions {
            sudo: self.sudo,
            ..RunOptions::default()
        };
        cmd::run("mount", &["--", text.as_str()], None, &options).await?;
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let text = target.to_string_lossy().to_string();
        let options = RunOptions {
            sudo: self.sudo,
            ..RunOptions::default()
        };
        cmd::run("umount", &["--", text.as_str()], None, &options).await?;
        Ok(())
    }

    async fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        let source_text = source.to_string_lossy().to_string();
        let target_text = target.to_string_lossy().to_string();
        let options = RunOptions {
            sudo: self.sudo,
            ..RunOptions::default()
        };
        cmd::run(
            "mount",
            &["--bind", source_text.as_str(), target_text.as_str()],
            None,
            &options,
        )
        .await?;
        Ok(())
    }

    async fn source_of(&self, target: &Path) -> Result<Option<PathBuf>> {
        let text = target.to_string_lossy().to_string();
        let options = RunOptions::default().accept_codes(&[1]);
        let result = cmd::run(
            "findmnt",
            &["-n", "-o", "SOURCE", "--", text.as_str()],
            None,
            &options,
        )
        .await?;
        Ok(result
            .out_lines()
            .first()
            .copied()
            .filter(|line| !line.is_empty())
            .map(PathBuf::from))
    }
}

/// One line of `df -Pk` output for a directory's filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemInfo {
    pub filesystem: String,
    pub size_kib: u64,
    pub used_kib: u64,
    pub available_kib: u64,
    pub use_percent: u8,
    pub mounted_on: PathBuf,
}

impl Directory<'_> {
    /// Mount state from the sentinel marker files: `Some(true)` when the
    /// mounted marker is present (and, when `source` is given, records the
    /// same source), `Some(false)` when the not-mounted marker is present
    /// or the source does not match, `None` when neither marker exists.
    pub async fn is_mounted(&self, source: Option<&Path>) -> Result<Option<bool>> {
        let mounted_marker = self.path().join(MOUNTED_MARKER);
        let not_mounted_marker = self.path().join(NOT_MOUNTED_MARKER);

        if tokio::fs::metadata(&mounted_marker).await.is_ok() {
            if let Some(expected) = source {
                let recorded = tokio::fs::read_to_string(&mounted_marker)
                    .await
                    .unwrap_or_default();
                let recorded = recorded.trim();
                if !recorded.is_empty() && Path::new(recorded) != expected {
                    return Ok(Some(false));
                }
            }
            return Ok(Some(true));
        }
        if tokio::fs::metadata(&not_mounted_marker).await.is_ok() {
            return Ok(Some(false));
        }
        Ok(None)
    }

    /// Mount unless the markers already say mounted.
    pub async fn ensure_mounted(&self, source: Option<&Path>) -> Result<()> {
        if self.is_mounted(source).await? == Some(true) {
            return Ok(());
        }
        self.mount(source).await
    }

    /// Attach through the context's mount registry: a plain mount, or a
    /// bind mount when `source` is given.
    pub async fn mount(&self, source: Option<&Path>) -> Result<()> {
        let registry = self.registry()?;
        match source {
            Some(source) => registry.bind(source, self.path()).await?,
            None => registry.mount(self.path()).await?,
        }
        tracing::info!("mounted {}", self.path().display());
        Ok(())
    }

    pub async fn bind(&self, source: &Path) -> Result<()> {
        self.mount(Some(source)).await
    }

    pub async fn unmount(&self) -> Result<()> {
        let registry = self.registry()?;
        registry.unmount(self.path()).await?;
        tracing::info!("unmounted {}", self.path().display());
        Ok(())
    }

    fn registry(&self) -> Result<&dyn Mounts> {
        self.entry
            .context()
            .mounts
            .as_deref()
            .ok_or_else(|| {
                FsError::filesystem(format!(
                    "no mount registry configured, cannot mount {}",
                    self.path().display()
                ))
            })
    }

    /// Filesystem statistics for this directory, from `df -Pk`.
    pub async fn filesystem_info(&self) -> Result<FilesystemInfo> {
        let text = self.path().to_string_lossy().to_string();
        let result = cmd::run(
            "df",
            &["-Pk", "--", text.as_str()],
            None,
            &RunOptions::default(),
        )
        .await?;

        let line = result.out_lines().get(1).copied().ok_or_else(|| {
            FsError::filesystem(format!(
                "df produced no output for {}",
                self.path().display()
            ))
        })?;
        parse_df_line(line).ok_or_else(|| {
            FsError::filesystem(format!("cannot parse df output line '{line}'"))
        })
    }
}

fn parse_df_line(line: &str) -> Option<FilesystemInfo> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }
    Some(FilesystemInfo {
        filesystem: fields[0].to_string(),
        size_kib: fields[1].parse().ok()?,
        used_kib: fields[2].parse().ok()?,
        available_kib: fields[3].parse().ok()?,
        use_percent: fields[4].trim_end_matches('%').parse().ok()?,
        // a mount point containing spaces arrives as several fields
        mounted_on: PathBuf::from(fields[5..].join(" ")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FsConfig, FsContext};
    use crate::path::Entry;
    use crate::restrict::Restrictions;
    use std::sync::Arc;

    fn entry_for(root: &Path) -> Entry {
        Entry::new(
            root,
            Restrictions::new("mount-test").allow(root, true),
            FsContext::new(FsConfig::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_is_mounted_tri_state() {
        let temp = tempfile::tempdir().unwrap();
        let entry = entry_for(temp.path());

        // no markers: unknown
        assert_eq!(entry.as_directory().unwrap().is_mounted(None).await.unwrap(), None);

        std::fs::write(temp.path().join(NOT_MOUNTED_MARKER), "").unwrap();
        assert_eq!(
            entry.as_directory().unwrap().is_mounted(None).await.unwrap(),
            Some(false)
        );

        std::fs::remove_file(temp.path().join(NOT_MOUNTED_MARKER)).unwrap();
        std::fs::write(temp.path().join(MOUNTED_MARKER), "/dev/sdb1\n").unwrap();
        assert_eq!(
            entry.as_directory().unwrap().is_mounted(None).await.unwrap(),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_is_mounted_cross_checks_source() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(MOUNTED_MARKER), "/dev/sdb1\n").unwrap();

        let entry = entry_for(temp.path());
        let directory = entry.as_directory().unwrap();
        assert_eq!(
            directory.is_mounted(Some(Path::new("/dev/sdb1"))).await.unwrap(),
            Some(true)
        );
        assert_eq!(
            directory.is_mounted(Some(Path::new("/dev/sdc1"))).await.unwrap(),
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_mount_without_registry_fails() {
        let temp = tempfile::tempdir().unwrap();
        let entry = entry_for(temp.path());
        let err = entry.as_directory().unwrap().mount(None).await.unwrap_err();
        assert!(err.to_string().contains("no mount registry"));
    }

    #[tokio::test]
    async fn test_mount_delegates_to_registry() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recording {
            calls: Mutex<Vec<String>>,
        }

        #[async_trait::async_trait]
        impl Mounts for Recording {
            async fn mount(&self, target: &Path) -> Result<()> {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("mount {}", target.display()));
                Ok(())
            }
            async fn unmount(&self, target: &Path) -> Result<()> {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("umount {}", target.display()));
                Ok(())
            }
            async fn bind(&self, source: &Path, target: &Path) -> Result<()> {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("bind {} {}", source.display(), target.display()));
                Ok(())
            }
            async fn source_of(&self, _target: &Path) -> Result<Option<PathBuf>> {
                Ok(None)
            }
        }

        let temp = tempfile::tempdir().unwrap();
        let registry = Arc::new(Recording::default());
        let context = FsContext::with_mounts(FsConfig::default(), registry.clone());
        let entry = Entry::new(
            temp.path(),
            Restrictions::new("mount-test").allow(temp.path(), true),
            context,
        )
        .unwrap();

        let directory = entry.as_directory().unwrap();
        directory.mount(None).await.unwrap();
        directory.bind(Path::new("/srv/data")).await.unwrap();
        directory.unmount().await.unwrap();

        let calls = registry.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("mount "));
        assert!(calls[1].starts_with("bind /srv/data"));
        assert!(calls[2].starts_with("umount "));
    }

    #[test]
    fn test_parse_df_line() {
        let info = parse_df_line("/dev/sda1 102400 51200 46080 53% /srv/data").unwrap();
        assert_eq!(info.filesystem, "/dev/sda1");
        assert_eq!(info.size_kib, 102400);
        assert_eq!(info.used_kib, 51200);
        assert_eq!(info.available_kib, 46080);
        assert_eq!(info.use_percent, 53);
        assert_eq!(info.mounted_on, PathBuf::from("/srv/data"));
    }

    #[test]
    fn test_parse_df_line_rejects_garbage() {
        assert!(parse_df_line("nonsense").is_none());
    }

    #[tokio::test]
    async fn test_filesystem_info_for_tempdir() {
        let temp = tempfile::tempdir().unwrap();
        let entry = entry_for(temp.path());
        let info = entry.as_directory().unwrap().filesystem_info().await.unwrap();
        assert!(info.size_kib > 0);
        assert!(!info.filesystem.is_empty());
    }
}
