use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::dir::Directory;
use crate::error::{Access, Result};
use crate::files::Files;
use crate::path::Entry;

const HASH_READ_BUFFER: usize = 64 * 1024;

/// Groups of same-content files, keyed by content hash. Only hashes shared
/// by at least two files appear.
#[derive(Debug, Default)]
pub struct Duplicates {
    groups: HashMap<String, Files>,
}

impl Duplicates {
    pub fn groups(&self) -> &HashMap<String, Files> {
        &self.groups
    }

    /// Number of duplicate groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, hash: &str) -> Option<&Files> {
        self.groups.get(hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Files)> {
        self.groups.iter().map(|(hash, files)| (hash.as_str(), files))
    }
}

impl Directory<'_> {
    /// Find files with identical content, two-phased: bucket by exact size
    /// first, then hash only the sizes that have at least two candidates.
    /// Files larger than `max_size` (when non-zero) are logged and skipped;
    /// `recurse_levels` is how many directory levels below this one are
    /// scanned (0 scans only direct children).
    pub fn duplicates(&self, recurse_levels: usize, max_size: u64) -> Result<Duplicates> {
        self.entry.restrictions().check(self.path(), Access::Read)?;

        // phase 1: sizes only, no content is touched
        let mut by_size: HashMap<u64, Vec<PathBuf>> = HashMap::new();
        let walker = WalkDir::new(self.path())
            .min_depth(1)
            .max_depth(recurse_levels + 1);
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
            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(error) => {
                    tracing::warn!("skipping {}: {error}", entry.path().display());
                    continue;
                }
            };
            if max_size > 0 && size > max_size {
                tracing::warn!(
                    "skipping {} ({size} bytes exceeds the {max_size} byte scan limit)",
                    entry.path().display()
                );
                continue;
            }
            by_size.entry(size).or_default().push(entry.into_path());
        }

        // phase 2: hash only the buckets where a duplicate is possible
        let mut groups: HashMap<String, Files> = HashMap::new();
        let mut by_hash: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for (_, candidates) in by_size.into_iter().filter(|(_, c)| c.len() >= 2) {
            by_hash.clear();
            for path in candidates {
                match hash_file(&path) {
                    Ok(hash) => by_hash.entry(hash).or_default().push(path),
                    Err(io) => {
                        tracing::warn!("cannot hash {}: {io}", path.display());
                    }
                }
            }
            for (hash, paths) in by_hash.drain() {
                if paths.len() < 2 {
                    continue;
                }
                let mut files = Files::with_parent(self.path());
                for path in paths {
                    files.insert(Entry::new(
                        path,
                        self.entry.restrictions().clone(),
                        self.entry.context().clone(),
                    )?);
                }
                groups.insert(hash, files);
            }
        }

        Ok(Duplicates { groups })
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_READ_BUFFER];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FsConfig, FsContext};
    use crate::restrict::Restrictions;

    fn entry_for(root: &Path) -> Entry {
        Entry::new(
            root,
            Restrictions::new("dup-test").allow(root, true),
            FsContext::new(FsConfig::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_same_size_same_content_grouped() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("f1"), "identical").unwrap();
        std::fs::write(temp.path().join("f2"), "identical").unwrap();
        // same size, different content
        std::fs::write(temp.path().join("f3"), "idenzical").unwrap();

        let entry = entry_for(temp.path());
        let duplicates = entry.as_directory().unwrap().duplicates(0, 0).unwrap();

        assert_eq!(duplicates.len(), 1);
        let (_, group) = duplicates.iter().next().unwrap();
        assert_eq!(group.len(), 2);
        assert!(group.contains(&temp.path().join("f1")));
        assert!(group.contains(&temp.path().join("f2")));
        assert!(!group.contains(&temp.path().join("f3")));
    }

    #[test]
    fn test_unique_sizes_never_hashed() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("f1"), "a").unwrap();
        std::fs::write(temp.path().join("f2"), "bb").unwrap();
        std::fs::write(temp.path().join("f3"), "ccc").unwrap();

        let entry = entry_for(temp.path());
        let duplicates = entry.as_directory().unwrap().duplicates(0, 0).unwrap();
        assert!(duplicates.is_empty());
    }

    #[test]
    fn test_recurse_levels_limits_depth() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("deep/deeper")).unwrap();
        std::fs::write(temp.path().join("a"), "same").unwrap();
        std::fs::write(temp.path().join("deep/deeper/b"), "same").unwrap();

        let entry = entry_for(temp.path());
        // the twin sits two levels down, out of reach
        let shallow = entry.as_directory().unwrap().duplicates(0, 0).unwrap();
        assert!(shallow.is_empty());

        let deep = entry.as_directory().unwrap().duplicates(2, 0).unwrap();
        assert_eq!(deep.len(), 1);
    }

    #[test]
    fn test_oversized_files_skipped() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("big1"), vec![7u8; 1000]).unwrap();
        std::fs::write(temp.path().join("big2"), vec![7u8; 1000]).unwrap();

        let entry = entry_for(temp.path());
        let duplicates = entry.as_directory().unwrap().duplicates(0, 100).unwrap();
        assert!(duplicates.is_empty());
    }

    #[test]
    fn test_three_way_duplicate_in_one_group() {
        let temp = tempfile::tempdir().unwrap();
        for name in ["x", "y", "z"] {
            std::fs::write(temp.path().join(name), "triple").unwrap();
        }

        let entry = entry_for(temp.path());
        let duplicates = entry.as_directory().unwrap().duplicates(0, 0).unwrap();
        assert_eq!(duplicates.len(), 1);
        let (_, group) = duplicates.iter().next().unwrap();
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn test_hash_file_hex() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("f");
        std::fs::write(&path, "").unwrap();
        let hash = hash_file(&path).unwrap();
        // sha-256 of the empty string
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
