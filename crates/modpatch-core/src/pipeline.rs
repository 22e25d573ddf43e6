//! End-to-end patch run: unpack, parse, merge, render, pack, install
//!
//! Per-add-on problems end up in the report as skip reasons, and an unreadable
//! source directory is logged and passed over. Errors that `Error::is_fatal`
//! classifies as fatal abort the run, as does any failure while staging,
//! packing or installing the patch. An aborted run removes its staging tree
//! and any archive it had already installed.

use crate::archive::Archiver;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::merger::{combine, Combined, MergeOptions};
use crate::model::{AddonMetadata, Progressions};
use crate::modsettings;
use crate::parser::load_addon;
use crate::report::{AddonOutcome, AddonReport, RunReport};
use crate::scanner::{find_archives, find_files, locate_addon_files, MODSETTINGS_FILE};
use crate::serializer::{
    render_metadata, render_module_reference, render_module_short_desc, render_progressions,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Paths of a rendered patch tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPatch {
    pub root: PathBuf,
    pub meta: PathBuf,
    pub progressions: PathBuf,
}

/// Write the patch's two documents into `root` using the game's folder layout
pub fn write_patch_tree(root: &Path, patch: &AddonMetadata) -> Result<StagedPatch> {
    let folder = &patch.identity.folder;
    let meta = root.join("Mods").join(folder).join("meta.lsx");
    let progressions = root
        .join("Public")
        .join(folder)
        .join("Progressions")
        .join("Progressions.lsx");

    for path in [&meta, &progressions] {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&meta, render_metadata(patch))?;
    fs::write(&progressions, render_progressions(patch))?;

    Ok(StagedPatch {
        root: root.to_path_buf(),
        meta,
        progressions,
    })
}

/// Parse one unpacked add-on into its report line and, if usable, its metadata
///
/// Add-ons without a progression table are reported as not applicable and
/// yield no metadata. Add-ons whose table failed to parse are returned, so the
/// merge engine records the skip too.
pub fn load_unpacked(source: &Path, root: &Path) -> (AddonReport, Option<AddonMetadata>) {
    let skipped = |name: Option<String>, reason: String| {
        warn!("skipping {}: {}", source.display(), reason);
        (
            AddonReport {
                source: source.to_path_buf(),
                name,
                outcome: AddonOutcome::Skipped { reason },
            },
            None,
        )
    };

    let files = match locate_addon_files(root) {
        Ok(files) => files,
        Err(e) => return skipped(None, e.to_string()),
    };

    if !files.has_progressions() {
        info!("{}: no progression table, not selected", source.display());
        return (
            AddonReport {
                source: source.to_path_buf(),
                name: None,
                outcome: AddonOutcome::NotApplicable,
            },
            None,
        );
    }

    let addon = match load_addon(&files) {
        Ok(addon) => addon,
        Err(e) => return skipped(None, e.to_string()),
    };

    let outcome = match &addon.progressions {
        Progressions::Parsed { entries } => {
            info!(
                "selected {} ({} progressions)",
                addon.identity.name,
                entries.len()
            );
            AddonOutcome::Selected {
                progressions: entries.len(),
            }
        }
        Progressions::Skipped { reason } => {
            warn!("skipping {}: {}", addon.identity.name, reason);
            AddonOutcome::Skipped {
                reason: reason.clone(),
            }
        }
    };

    (
        AddonReport {
            source: source.to_path_buf(),
            name: Some(addon.identity.name.clone()),
            outcome,
        },
        Some(addon),
    )
}

/// Load several unpacked add-ons, in order
pub fn load_unpacked_dirs<P: AsRef<Path>>(dirs: &[P]) -> (Vec<AddonReport>, Vec<AddonMetadata>) {
    let mut reports = Vec::with_capacity(dirs.len());
    let mut addons = Vec::new();
    for dir in dirs {
        let (report, addon) = load_unpacked(dir.as_ref(), dir.as_ref());
        reports.push(report);
        addons.extend(addon);
    }
    (reports, addons)
}

/// A configured patch run
pub struct Pipeline<A: Archiver> {
    config: Config,
    archiver: A,
}

impl<A: Archiver> Pipeline<A> {
    pub fn new(config: Config, archiver: A) -> Self {
        Self { config, archiver }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn unpacked_dir(&self) -> PathBuf {
        self.config.staging_dir.join("unpacked")
    }

    fn patch_dir(&self) -> PathBuf {
        self.config.staging_dir.join(&self.config.patch_identity.folder)
    }

    /// Run every stage, cleaning up after a fatal error
    pub fn run(&self) -> Result<RunReport> {
        self.config.validate()?;

        let mut report = RunReport::new(self.config.dry_run);
        let mut installed = Installed::default();

        match self.execute(&mut report, &mut installed) {
            Ok(()) => {
                if !self.config.dry_run && !self.config.keep_staging {
                    remove_dir(&self.config.staging_dir);
                    report.staged_at = None;
                }
                installed.commit();
                report.finish();
                info!(
                    "done: {} add-ons selected, {} skipped, {} progressions",
                    report.selected().count(),
                    report.skipped().count(),
                    report.progressions
                );
                Ok(report)
            }
            Err(e) => {
                error!("run aborted: {}", e);
                installed.rollback();
                remove_dir(&self.config.staging_dir);
                Err(e)
            }
        }
    }

    fn execute(&self, report: &mut RunReport, installed: &mut Installed) -> Result<()> {
        let identity = &self.config.patch_identity;

        let archives = self.collect_archives()?;
        info!("found {} add-on archives", archives.len());

        remove_dir(&self.config.staging_dir);
        fs::create_dir_all(self.unpacked_dir())?;

        let mut addons = Vec::new();
        for (index, archive) in archives.iter().enumerate() {
            let root = match self.unpack(index, archive) {
                Ok(root) => root,
                Err(e) if !e.is_fatal() => {
                    warn!("skipping {}: {}", archive.display(), e);
                    report.addons.push(AddonReport {
                        source: archive.clone(),
                        name: None,
                        outcome: AddonOutcome::Skipped {
                            reason: e.to_string(),
                        },
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };
            let (line, addon) = load_unpacked(archive, &root);
            report.addons.push(line);
            addons.extend(addon);
        }

        let Combined {
            patch,
            notes,
            slot_grants_removed,
        } = combine(
            &addons,
            &MergeOptions {
                identity: identity.clone(),
                flag_merge: self.config.flag_merge,
            },
        );
        report.merge = notes;
        report.progressions = patch.entries().len();
        report.slot_grants_removed = slot_grants_removed;

        if patch.entries().is_empty() {
            // still installed, so a patch from an earlier run stops overriding the tables
            warn!("no progressions to merge; installing an empty patch");
        }

        let staged = write_patch_tree(&self.patch_dir(), &patch)?;
        info!("patch staged at {}", staged.root.display());
        report.staged_at = Some(staged.root.clone());

        if self.config.dry_run {
            info!("dry run: skipping pack and install");
            return Ok(());
        }

        let archive = self.pack(&staged)?;
        let destination = self.install_archive(&archive, installed)?;
        report.archive = Some(destination);

        report.modsettings_updated = self.register(&patch)?;
        Ok(())
    }

    /// Archives from every readable source, sorted and deduplicated
    fn collect_archives(&self) -> Result<Vec<PathBuf>> {
        let folder = &self.config.patch_identity.folder;
        let mut archives = Vec::new();
        for source in &self.config.source_directories {
            match find_archives(std::slice::from_ref(source), folder) {
                Ok(found) => archives.extend(found),
                Err(e) if !e.is_fatal() => {
                    warn!("skipping source {}: {}", source.display(), e)
                }
                Err(e) => return Err(e),
            }
        }
        archives.sort();
        archives.dedup();
        Ok(archives)
    }

    /// Unpack into a directory unique to this archive's position in the run
    ///
    /// Sources may hold archives with the same file name, so the stem alone
    /// does not identify an unpacked tree.
    fn unpack(&self, index: usize, archive: &Path) -> Result<PathBuf> {
        let stem = archive
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("addon");
        let destination = self.unpacked_dir().join(format!("{:03}-{}", index, stem));
        info!("unpacking {}", archive.display());
        self.archiver.extract(archive, &destination)
    }

    fn pack(&self, staged: &StagedPatch) -> Result<PathBuf> {
        let destination = self
            .config
            .staging_dir
            .join(format!("{}.pak", self.config.patch_identity.folder));
        info!("packing {}", staged.root.display());
        self.archiver.pack(&staged.root, &destination)
    }

    fn install_archive(&self, archive: &Path, installed: &mut Installed) -> Result<PathBuf> {
        let dir = self
            .config
            .install_dir()
            .ok_or_else(|| Error::Config("no mods_dir to install into".to_string()))?;
        let destination = dir.join(format!("{}.pak", self.config.patch_identity.folder));

        if destination.exists() {
            let backup = destination.with_extension("pak.bak");
            fs::rename(&destination, &backup)?;
            installed.previous = Some((backup, destination.clone()));
        }

        move_file(archive, &destination)?;
        installed.archive = Some(destination.clone());
        info!("installed {}", destination.display());
        Ok(destination)
    }

    fn modsettings_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config.modsettings_path {
            return Ok(path.clone());
        }
        self.config
            .game_data_dir
            .as_ref()
            .and_then(|dir| find_files(dir, &[MODSETTINGS_FILE]).remove(MODSETTINGS_FILE))
            .ok_or_else(|| Error::tool(MODSETTINGS_FILE, "installed-mods list not found"))
    }

    fn register(&self, patch: &AddonMetadata) -> Result<bool> {
        let path = self.modsettings_path()?;
        let module = render_module_reference(patch);
        let short_desc = render_module_short_desc(patch);
        modsettings::patch_file(&path, &[("Module", &module), ("ModuleShortDesc", &short_desc)])
            .map_err(|e| match e {
                Error::ExternalTool { .. } => e,
                other => Error::tool(MODSETTINGS_FILE, other.to_string()),
            })
    }
}

/// Archive installed by the current run, and the one it displaced
#[derive(Debug, Default)]
struct Installed {
    archive: Option<PathBuf>,
    /// (backup, original location) of a previously installed patch
    previous: Option<(PathBuf, PathBuf)>,
}

impl Installed {
    fn commit(&mut self) {
        if let Some((backup, _)) = self.previous.take() {
            if let Err(e) = fs::remove_file(&backup) {
                warn!("could not remove {}: {}", backup.display(), e);
            }
        }
    }

    fn rollback(&mut self) {
        if let Some(archive) = self.archive.take() {
            if let Err(e) = fs::remove_file(&archive) {
                warn!("could not remove {}: {}", archive.display(), e);
            }
        }
        if let Some((backup, original)) = self.previous.take() {
            if let Err(e) = fs::rename(&backup, &original) {
                warn!("could not restore {}: {}", original.display(), e);
            }
        }
    }
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_err() {
        // rename fails across filesystems
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

fn remove_dir(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("could not remove {}: {}", path.display(), e);
        }
    }
}
