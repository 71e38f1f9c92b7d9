use std::path::{Component, Path, PathBuf};

use crate::error::{Access, FsError, Result};
use crate::path::resolve;

/// A single whitelist rule: operations are allowed under `directory`,
/// writes only when `write` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub directory: PathBuf,
    pub write: bool,
}

/// A named, ordered set of directory-prefix rules. The authorization
/// primitive: every filesystem operation checks here first, and an empty
/// ruleset authorizes nothing.
///
/// Matching is structural (path-component prefix), not semantic: symlinks
/// are not resolved at this layer. Callers doing security-sensitive work
/// resolve real paths before trusting the check.
#[derive(Debug, Clone)]
pub struct Restrictions {
    label: String,
    rules: Vec<Rule>,
}

impl Restrictions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            rules: Vec::new(),
        }
    }

    /// A ruleset with the default label, for call sites that have nothing
    /// better to report in error messages.
    pub fn unlabeled() -> Self {
        Self::new("restrictions")
    }

    pub fn allow(mut self, directory: impl Into<PathBuf>, write: bool) -> Self {
        self.rules.push(Rule {
            directory: directory.into(),
            write,
        });
        self
    }

    pub fn add_rule(&mut self, directory: impl Into<PathBuf>, write: bool) {
        self.rules.push(Rule {
            directory: directory.into(),
            write,
        });
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Authorize `path` for the given access. Rule directories and the
    /// candidate are absolutized at check time; the first rule whose
    /// directory is a component-prefix of the candidate decides.
    pub fn check(&self, path: &Path, access: Access) -> Result<()> {
        if self.rules.is_empty() {
            return Err(FsError::NoRestrictionsSet {
                label: self.label.clone(),
            });
        }

        let candidate = resolve::lexical_absolute(path)?;
        for rule in &self.rules {
            let directory = resolve::lexical_absolute(&rule.directory)?;
            if !candidate.starts_with(&directory) {
                continue;
            }
            if access == Access::Write && !rule.write {
                return Err(FsError::Restrictions {
                    label: self.label.clone(),
                    path: candidate,
                    access,
                });
            }
            return Ok(());
        }

        Err(FsError::Restrictions {
            label: self.label.clone(),
            path: candidate,
            access,
        })
    }

    pub fn check_all<P: AsRef<Path>>(&self, paths: &[P], access: Access) -> Result<()> {
        for path in paths {
            self.check(path.as_ref(), access)?;
        }
        Ok(())
    }

    /// Whether upward pruning may delete the parent of `from`. Explicit
    /// boolean so traversal code branches instead of catching errors.
    pub fn can_ascend(&self, from: &Path) -> bool {
        match from.parent() {
            Some(parent) if parent != Path::new("") => {
                self.check(parent, Access::Write).is_ok()
            }
            _ => false,
        }
    }

    /// A new ruleset with each rule directory truncated by `levels` trailing
    /// segments. Negative `levels` keeps the first `|levels|` segments
    /// instead. Lets directory-creation code legally touch the parent of a
    /// restricted path.
    pub fn parent(&self, levels: i32) -> Restrictions {
        let rules = self
            .rules
            .iter()
            .map(|rule| {
                let segments: Vec<&std::ffi::OsStr> = rule
                    .directory
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(name) => Some(name),
                        _ => None,
                    })
                    .collect();

                let keep = if levels >= 0 {
                    segments.len().saturating_sub(levels as usize)
                } else {
                    (levels.unsigned_abs() as usize).min(segments.len())
                };

                let mut directory = if rule.directory.is_absolute() {
                    PathBuf::from("/")
                } else {
                    PathBuf::new()
                };
                for segment in &segments[..keep] {
                    directory.push(segment);
                }

                Rule {
                    directory,
                    write: rule.write,
                }
            })
            .collect();

        Restrictions {
            label: self.label.clone(),
            rules,
        }
    }

    /// A more narrowly scoped ruleset: every rule directory crossed with
    /// every child segment. `write` overrides the rule flags when given.
    pub fn child(&self, subpaths: &[&str], write: Option<bool>) -> Restrictions {
        let mut rules = Vec::with_capacity(self.rules.len() * subpaths.len());
        for rule in &self.rules {
            for subpath in subpaths {
                rules.push(Rule {
                    directory: rule.directory.join(subpath.trim_start_matches('/')),
                    write: write.unwrap_or(rule.write),
                });
            }
        }

        Restrictions {
            label: self.label.clone(),
            rules,
        }
    }

    /// The same directories, all writable. Explicit privilege escalation for
    /// call sites that know they need it (auto-mount, temp dir creation).
    pub fn these_writable(&self) -> Restrictions {
        Restrictions {
            label: self.label.clone(),
            rules: self
                .rules
                .iter()
                .map(|rule| Rule {
                    directory: rule.directory.clone(),
                    write: true,
                })
                .collect(),
        }
    }
}
