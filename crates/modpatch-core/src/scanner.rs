//! Locating add-on archives and the documents inside unpacked add-ons

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Module-metadata document name
pub const META_FILE: &str = "meta.lsx";
/// Progression-table document name
pub const PROGRESSIONS_FILE: &str = "Progressions.lsx";
/// Class-description document name
pub const CLASS_DESCRIPTIONS_FILE: &str = "ClassDescriptions.lsx";
/// Installed-mods list document name
pub const MODSETTINGS_FILE: &str = "modsettings.lsx";
/// Extension of packed add-ons
pub const ARCHIVE_EXTENSION: &str = "pak";

/// Paths of the documents found in one unpacked add-on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonFiles {
    /// Root of the unpacked tree
    pub root: PathBuf,
    pub meta: PathBuf,
    pub progressions: Option<PathBuf>,
    pub class_descriptions: Option<PathBuf>,
}

impl AddonFiles {
    /// Whether the add-on carries a progression table at all
    pub fn has_progressions(&self) -> bool {
        self.progressions.is_some()
    }
}

/// Find files by exact name under `root`
///
/// Directories are walked in name order and the first match for each name
/// wins, so the result does not depend on filesystem iteration order.
pub fn find_files<P: AsRef<Path>>(root: P, targets: &[&str]) -> BTreeMap<String, PathBuf> {
    let mut found = BTreeMap::new();

    for entry in WalkDir::new(root.as_ref())
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if targets.contains(&name) && !found.contains_key(name) {
                found.insert(name.to_string(), entry.path().to_path_buf());
            }
        }
    }

    found
}

/// Locate the documents of one unpacked add-on
///
/// The metadata document is required; its absence is a `Lookup` error.
pub fn locate_addon_files<P: AsRef<Path>>(root: P) -> Result<AddonFiles> {
    let root = root.as_ref();
    let mut found = find_files(root, &[META_FILE, PROGRESSIONS_FILE, CLASS_DESCRIPTIONS_FILE]);

    let meta = found.remove(META_FILE).ok_or_else(|| Error::Lookup {
        file: META_FILE.to_string(),
        root: root.to_path_buf(),
    })?;

    Ok(AddonFiles {
        root: root.to_path_buf(),
        meta,
        progressions: found.remove(PROGRESSIONS_FILE),
        class_descriptions: found.remove(CLASS_DESCRIPTIONS_FILE),
    })
}

/// Collect add-on archives from the configured sources
///
/// Each source is either a directory, scanned non-recursively for `.pak`
/// files, or a `.pak` file taken as-is. Archives whose stem equals
/// `exclude_stem` (the patch's own archive) are left out. The result is sorted
/// and free of duplicates.
pub fn find_archives<P: AsRef<Path>>(sources: &[P], exclude_stem: &str) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();

    for source in sources {
        let source = source.as_ref();
        if source.is_file() {
            if is_archive(source) {
                archives.push(source.to_path_buf());
            }
            continue;
        }

        for entry in fs::read_dir(source).map_err(|e| Error::FileRead {
            path: source.to_path_buf(),
            source: e,
        })? {
            let path = entry?.path();
            if path.is_file() && is_archive(&path) {
                archives.push(path);
            }
        }
    }

    archives.retain(|p| p.file_stem().and_then(|s| s.to_str()) != Some(exclude_stem));
    archives.sort();
    archives.dedup();
    Ok(archives)
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}
