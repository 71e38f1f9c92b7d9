use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::path::EntryKind;

pub type Result<T> = std::result::Result<T, FsError>;

/// Access direction requested from a restriction check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("{access} access to '{}' denied by restrictions '{label}'", .path.display())]
    Restrictions {
        label: String,
        path: PathBuf,
        access: Access,
    },

    #[error("restrictions '{label}' contain no rules, all access is denied")]
    NoRestrictionsSet { label: String },

    #[error("path '{}' does not exist", .path.display())]
    FileNotExist { path: PathBuf },

    #[error("parent directory '{}' of path '{}' does not exist", .parent.display(), .path.display())]
    ParentNotExist { path: PathBuf, parent: PathBuf },

    #[error("path '{}' is not readable: {reason}", .path.display())]
    FileNotReadable {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("path '{}' is not writable: {reason}", .path.display())]
    FileNotWritable {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("path '{}' already exists: {reason}", .path.display())]
    FileExists { path: PathBuf, reason: String },

    #[error("file '{}': {state}", .path.display())]
    FileOpen { path: PathBuf, state: String },

    #[error("file '{}' is open read-only, write operations are not available", .path.display())]
    ReadOnlyMode { path: PathBuf },

    #[error("failed to {action} file '{}'", .path.display())]
    FileActionFailed {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read from file '{}': {reason}", .path.display())]
    FileRead { path: PathBuf, reason: String },

    #[error("symlink '{}' points to '{}' which does not exist", .path.display(), .target.display())]
    SymlinkBroken { path: PathBuf, target: PathBuf },

    #[error("path '{}' is not a symlink", .path.display())]
    NotASymlink { path: PathBuf },

    #[error("path '{path}' has more '..' segments than real segments, cannot resolve past the filesystem root")]
    OutOfBounds { path: String },

    #[error("path '{}' is a {actual:?}, expected a {expected:?}", .path.display())]
    WrongKind {
        path: PathBuf,
        expected: EntryKind,
        actual: EntryKind,
    },

    #[error("command '{command}' failed with exit code {code}: {stderr}")]
    ProcessFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("command '{command}' did not complete within {seconds} seconds")]
    ProcessTimeout { command: String, seconds: u64 },

    #[error("{message}")]
    Filesystem {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl FsError {
    /// Catch-all constructor for failures that have no dedicated kind.
    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::Filesystem {
            message: message.into(),
            source: None,
        }
    }

    pub fn filesystem_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Filesystem {
            message: message.into(),
            source: Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_path() {
        let err = FsError::Restrictions {
            label: "deploy".to_string(),
            path: PathBuf::from("/etc/passwd"),
            access: Access::Write,
        };
        let message = err.to_string();
        assert!(message.contains("/etc/passwd"));
        assert!(message.contains("write"));
        assert!(message.contains("deploy"));
    }

    #[test]
    fn test_parent_not_exist_names_both_paths() {
        let err = FsError::ParentNotExist {
            path: PathBuf::from("/a/b/c.txt"),
            parent: PathBuf::from("/a/b"),
        };
        let message = err.to_string();
        assert!(message.contains("/a/b"));
        assert!(message.contains("/a/b/c.txt"));
    }

    #[test]
    fn test_source_is_chained() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = FsError::FileNotWritable {
            path: PathBuf::from("/tmp/x"),
            reason: "permission check failed".to_string(),
            source: Some(io),
        };
        assert!(err.source().is_some());
    }
}
