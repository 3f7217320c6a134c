//! Site file tree enumeration.
//!
//! Produces one `FileEntry` per regular file under the site root. Symlinked
//! directories and broken symlinks are skipped; the backup directory itself
//! is always excluded so runs never archive their own output.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub follow_links: bool,
    /// Name fragments to skip (matched against the file name).
    pub exclude_patterns: Vec<String>,
    /// Directories excluded wholesale (e.g. the backup directory).
    pub exclude_dirs: Vec<PathBuf>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            exclude_patterns: vec![".git".to_string(), ".DS_Store".to_string()],
            exclude_dirs: Vec::new(),
        }
    }
}

/// One regular file found under the root.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Full path to the file.
    pub path: PathBuf,

    /// Path relative to the root, forward slashes.
    pub relative_path: String,

    /// File size in bytes.
    pub size: u64,
}

impl FileEntry {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata().map_err(std::io::Error::other)?;
        let path = entry.path().to_path_buf();

        let size = if raw_metadata.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved.len(),
                // Symlink to a directory, or broken; skip it.
                _ => return Ok(None),
            }
        } else {
            raw_metadata.len()
        };

        let relative_path = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Ok(Some(Self {
            path,
            relative_path,
            size,
        }))
    }
}

/// Filesystem enumerator seam, so the filelist builder can be driven by a
/// fixture list in tests.
pub trait FileEnumerator: Send + Sync {
    fn enumerate(&self, root: &Path) -> std::io::Result<Vec<FileEntry>>;
}

/// Production enumerator over walkdir.
pub struct WalkdirEnumerator {
    options: WalkOptions,
}

impl WalkdirEnumerator {
    pub fn new(options: WalkOptions) -> Self {
        Self { options }
    }
}

impl FileEnumerator for WalkdirEnumerator {
    fn enumerate(&self, root: &Path) -> std::io::Result<Vec<FileEntry>> {
        let mut files = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(self.options.follow_links)
            .into_iter()
            .filter_entry(|e| !is_excluded_dir(e, &self.options.exclude_dirs));

        for entry in walker {
            let entry = entry.map_err(std::io::Error::other)?;

            if should_exclude(&entry, &self.options.exclude_patterns) {
                continue;
            }
            if entry.file_type().is_dir() {
                continue;
            }
            if let Some(file) = FileEntry::from_entry(&entry, root)? {
                files.push(file);
            }
        }

        Ok(files)
    }
}

fn is_excluded_dir(entry: &DirEntry, exclude_dirs: &[PathBuf]) -> bool {
    entry.file_type().is_dir() && exclude_dirs.iter().any(|d| entry.path() == d)
}

fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|p| file_name.contains(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let walker = WalkdirEnumerator::new(WalkOptions::default());
        let files = walker.enumerate(temp_dir.path())?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn walk_collects_relative_paths_and_sizes() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("wp-content/uploads"))?;
        fs::write(temp_dir.path().join("index.php"), b"<?php")?;
        fs::write(temp_dir.path().join("wp-content/uploads/a.jpg"), b"123456")?;

        let walker = WalkdirEnumerator::new(WalkOptions::default());
        let mut files = walker.enumerate(temp_dir.path())?;
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].relative_path, "index.php");
        assert_eq!(files[0].size, 5);
        assert_eq!(files[1].relative_path, "wp-content/uploads/a.jpg");
        assert_eq!(files[1].size, 6);
        Ok(())
    }

    #[test]
    fn excluded_dirs_are_skipped_wholesale() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let backup_dir = temp_dir.path().join("backups");
        fs::create_dir(&backup_dir)?;
        fs::write(backup_dir.join("old-run.tar.gz"), b"archive")?;
        fs::write(temp_dir.path().join("keep.txt"), b"keep")?;

        let walker = WalkdirEnumerator::new(WalkOptions {
            exclude_dirs: vec![backup_dir],
            ..WalkOptions::default()
        });
        let files = walker.enumerate(temp_dir.path())?;

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "keep.txt");
        Ok(())
    }

    #[test]
    fn exclude_patterns_match_file_names() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("file.txt"), b"keep")?;
        fs::write(temp_dir.path().join(".DS_Store"), b"exclude")?;

        let walker = WalkdirEnumerator::new(WalkOptions::default());
        let files = walker.enumerate(temp_dir.path())?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "file.txt");
        Ok(())
    }
}
