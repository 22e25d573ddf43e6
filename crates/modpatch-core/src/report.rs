//! Run report: what happened to every add-on and where the patch went

use crate::error::Result;
use crate::merger::MergeNote;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Why an add-on was or was not used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AddonOutcome {
    /// Parsed and handed to the merge engine
    Selected { progressions: usize },
    /// Carries no progression table; not a candidate
    NotApplicable,
    /// Could not be used
    Skipped { reason: String },
}

/// One add-on's line in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonReport {
    /// Archive or unpacked directory the add-on came from
    pub source: PathBuf,
    /// Module name, when the metadata could be read
    pub name: Option<String>,
    pub outcome: AddonOutcome,
}

impl AddonReport {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.source.display().to_string(),
        }
    }
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub addons: Vec<AddonReport>,
    pub merge: Vec<MergeNote>,
    /// Entries in the merged progression table
    pub progressions: usize,
    pub slot_grants_removed: usize,
    /// Root of the rendered patch tree
    pub staged_at: Option<PathBuf>,
    /// Installed patch archive
    pub archive: Option<PathBuf>,
    pub modsettings_updated: bool,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            addons: Vec::new(),
            merge: Vec::new(),
            progressions: 0,
            slot_grants_removed: 0,
            staged_at: None,
            archive: None,
            modsettings_updated: false,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Add-ons whose progressions went into the merge
    pub fn selected(&self) -> impl Iterator<Item = &AddonReport> {
        self.addons
            .iter()
            .filter(|a| matches!(a.outcome, AddonOutcome::Selected { .. }))
    }

    /// Add-ons that could not be used
    pub fn skipped(&self) -> impl Iterator<Item = &AddonReport> {
        self.addons
            .iter()
            .filter(|a| matches!(a.outcome, AddonOutcome::Skipped { .. }))
    }

    /// Save the report as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
