use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::config::FsConfig;
use crate::error::{FsError, Result};

/// Prefix strings resolved through `FsConfig::category_roots` instead of
/// being taken literally.
const CATEGORY_PREFIXES: [&str; 5] = ["css", "js", "img", "font", "video"];

/// Resolve a raw path string to an absolute path.
///
/// `~` resolves to the home directory, `.`/`./` to the current directory,
/// a leading `/` is taken as-is, and anything else is prepended with
/// `prefix` (category names select the configured category root, `None`
/// selects the config default root). Domain paths (`host:/path`) are
/// already absolute and pass through untouched.
pub fn absolute(
    raw: &str,
    prefix: Option<&str>,
    must_exist: bool,
    config: &FsConfig,
) -> Result<PathBuf> {
    if raw.is_empty() {
        return Err(FsError::filesystem("cannot resolve an empty path"));
    }

    if is_domain_path(raw) {
        return Ok(PathBuf::from(raw));
    }

    let resolved = if raw == "~" || raw.starts_with("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| FsError::filesystem("cannot resolve '~', no home directory"))?;
        home.join(raw.trim_start_matches("~/").trim_start_matches('~'))
    } else if raw == "." || raw.starts_with("./") {
        let current = std::env::current_dir().map_err(|e| {
            FsError::filesystem_io("cannot resolve current directory", e)
        })?;
        current.join(raw.trim_start_matches("./"))
    } else if raw.starts_with('/') {
        PathBuf::from(raw)
    } else {
        match prefix {
            Some(name) if CATEGORY_PREFIXES.contains(&name) => config
                .category_root(name)
                .ok_or_else(|| {
                    FsError::filesystem(format!("no category root configured for '{name}'"))
                })?
                .join(raw),
            Some(literal) => PathBuf::from(literal).join(raw),
            None => config.default_root.join(raw),
        }
    };

    if must_exist && std::fs::symlink_metadata(&resolved).is_err() {
        return Err(FsError::FileNotExist { path: resolved });
    }

    Ok(resolved)
}

/// Purely lexical `.`/`..` collapsing on top of `absolute`. Never touches
/// the filesystem beyond what `absolute` does.
pub fn normalize(
    raw: &str,
    prefix: Option<&str>,
    must_exist: bool,
    config: &FsConfig,
) -> Result<PathBuf> {
    let absolute = absolute(raw, prefix, must_exist, config)?;
    if is_domain_path(raw) {
        return Ok(absolute);
    }
    collapse(&absolute)
}

/// Like `normalize`, but the parent directory component goes through the
/// OS's symlink resolution while the basename is reattached unresolved, so
/// a result exists even when the leaf itself does not. A missing parent is
/// created first.
pub fn real(raw: &str, prefix: Option<&str>, config: &FsConfig) -> Result<PathBuf> {
    let normalized = normalize(raw, prefix, false, config)?;
    if is_domain_path(raw) {
        return Ok(normalized);
    }

    let Some(parent) = normalized.parent() else {
        return Ok(normalized);
    };
    let Some(name) = normalized.file_name() else {
        return Ok(normalized);
    };

    if std::fs::symlink_metadata(parent).is_err() {
        std::fs::create_dir_all(parent).map_err(|e| {
            FsError::filesystem_io(
                format!("cannot create parent directory {}", parent.display()),
                e,
            )
        })?;
    }

    let parent = std::fs::canonicalize(parent).map_err(|e| {
        FsError::filesystem_io(
            format!("cannot resolve parent directory {}", parent.display()),
            e,
        )
    })?;

    Ok(parent.join(name))
}

/// Absolutize without config or prefixes: `~`/relative paths resolve
/// against home/current dir, then collapse lexically. Used by restriction
/// checking, where candidate and rule paths must compare structurally.
pub fn lexical_absolute(path: &Path) -> Result<PathBuf> {
    if let Some(raw) = path.to_str() {
        if is_domain_path(raw) {
            return Ok(path.to_path_buf());
        }
        if raw == "~" || raw.starts_with("~/") {
            let home = dirs::home_dir()
                .ok_or_else(|| FsError::filesystem("cannot resolve '~', no home directory"))?;
            return collapse(&home.join(raw.trim_start_matches("~/").trim_start_matches('~')));
        }
    }

    if path.is_absolute() {
        return collapse(path);
    }

    let current = std::env::current_dir()
        .map_err(|e| FsError::filesystem_io("cannot resolve current directory", e))?;
    collapse(&current.join(path))
}

/// Collapse `.`/`..` segments of an absolute path. Reverse scan: walking
/// segments back-to-front with a skip counter, a `..` cancels the nearest
/// preceding real segment; a skip left over at the front escaped the root.
fn collapse(path: &Path) -> Result<PathBuf> {
    let mut kept: Vec<&std::ffi::OsStr> = Vec::new();
    let mut skip = 0usize;

    for component in path.components().rev() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => skip += 1,
            Component::Normal(name) => {
                if skip > 0 {
                    skip -= 1;
                } else {
                    kept.push(name);
                }
            }
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if skip > 0 {
        return Err(FsError::OutOfBounds {
            path: path.display().to_string(),
        });
    }

    let mut collapsed = PathBuf::from("/");
    for name in kept.iter().rev() {
        collapsed.push(name);
    }
    Ok(collapsed)
}

/// Explicit, caller-scoped memoization for `absolute`, keyed by the raw
/// input string. Create one per operation scope and drop it with the scope;
/// results go stale if the filesystem changes underneath.
#[derive(Debug, Default)]
pub struct ResolveCache {
    entries: HashMap<String, PathBuf>,
}

impl ResolveCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absolute(
        &mut self,
        raw: &str,
        prefix: Option<&str>,
        must_exist: bool,
        config: &FsConfig,
    ) -> Result<PathBuf> {
        if let Some(hit) = self.entries.get(raw) {
            return Ok(hit.clone());
        }
        let resolved = absolute(raw, prefix, must_exist, config)?;
        self.entries.insert(raw.to_string(), resolved.clone());
        Ok(resolved)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `host:/path` pseudo-absolute paths, exempt from local resolution. The
/// domain part is a hostname or the `*` wildcard.
pub fn is_domain_path(raw: &str) -> bool {
    split_domain(raw).is_some()
}

pub fn split_domain(raw: &str) -> Option<(&str, &str)> {
    let (domain, rest) = raw.split_once(":/")?;
    if domain == "*" || is_hostname(domain) {
        Some((domain, &raw[domain.len() + 1..]))
    } else {
        None
    }
}

/// Whether a domain path belongs to `domain`, which may be the `*`
/// wildcard.
pub fn is_in_domain(raw: &str, domain: &str) -> bool {
    match split_domain(raw) {
        Some((host, _)) => domain == "*" || host == "*" || host == domain,
        None => false,
    }
}

fn is_hostname(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.len() <= 253
        && candidate.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
