//! File categorization and per-category manifests.
//!
//! Every file under the site root is classified by a fixed prefix policy
//! into plugins/themes/uploads/other. The archive-assembly step later reads
//! the manifests this module writes into the run directory.

use crate::error::Result;
use crate::fs::{FileEntry, FileEnumerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileKind {
    Plugins,
    Themes,
    Uploads,
    Other,
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [
        FileKind::Plugins,
        FileKind::Themes,
        FileKind::Uploads,
        FileKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Plugins => "plugins",
            FileKind::Themes => "themes",
            FileKind::Uploads => "uploads",
            FileKind::Other => "other",
        }
    }

    /// Manifest file name inside the run directory.
    pub fn manifest_name(&self) -> String {
        format!("filelist-{}.json", self.as_str())
    }
}

/// First matching prefix wins; everything else is `Other`.
pub fn kind_of(relative_path: &str) -> FileKind {
    const PREFIXES: [(&str, FileKind); 3] = [
        ("wp-content/plugins/", FileKind::Plugins),
        ("wp-content/themes/", FileKind::Themes),
        ("wp-content/uploads/", FileKind::Uploads),
    ];

    for (prefix, kind) in PREFIXES {
        if relative_path.starts_with(prefix) {
            return kind;
        }
    }
    FileKind::Other
}

/// One manifest row: `[absolute_path, relative_path_or_basename, size]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry(pub PathBuf, pub String, pub u64);

/// Builds the categorized filelist for one run.
#[derive(Default)]
pub struct FilelistBuilder {
    lists: BTreeMap<FileKind, Vec<FileEntry>>,
    total_size: u64,
}

impl FilelistBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate the site root and classify every file.
    pub fn run(
        &mut self,
        enumerator: &dyn FileEnumerator,
        root: &Path,
    ) -> Result<&BTreeMap<FileKind, Vec<FileEntry>>> {
        for file in enumerator.enumerate(root)? {
            self.total_size += file.size;
            self.lists
                .entry(kind_of(&file.relative_path))
                .or_default()
                .push(file);
        }
        Ok(&self.lists)
    }

    /// Total uncompressed size across every category.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn lists(&self) -> &BTreeMap<FileKind, Vec<FileEntry>> {
        &self.lists
    }

    /// Write one `filelist-<kind>.json` per category into the run directory.
    /// Empty categories still get a manifest so the archive step can read a
    /// fixed set of files.
    pub fn write_manifests(&self, run_dir: &Path) -> Result<()> {
        for kind in FileKind::ALL {
            let entries: Vec<ManifestEntry> = self
                .lists
                .get(&kind)
                .map(|files| {
                    files
                        .iter()
                        .map(|f| ManifestEntry(f.path.clone(), f.relative_path.clone(), f.size))
                        .collect()
                })
                .unwrap_or_default();

            let path = run_dir.join(kind.manifest_name());
            let json = serde_json::to_string(&entries)?;
            std::fs::write(&path, json)?;
        }
        Ok(())
    }
}

/// Read one category manifest back from the run directory.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
