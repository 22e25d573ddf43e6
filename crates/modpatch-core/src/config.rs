//! Run configuration loaded from a TOML file

use crate::error::{Error, Result};
use crate::merger::FlagMerge;
use crate::model::AddonIdentity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for one patch run
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stage and render only; skip packing and installation
    pub dry_run: bool,
    /// Directories scanned for `.pak` add-ons, or individual `.pak` files
    pub source_directories: Vec<PathBuf>,
    /// How `AllowImprovement`/`IsMulticlass` combine when several add-ons set them
    pub flag_merge: FlagMerge,
    /// Path to the `divine` package tool
    pub divine_path: PathBuf,
    /// Game id passed to the package tool
    pub game: String,
    /// Kill the package tool after this many seconds
    pub tool_timeout_secs: Option<u64>,
    /// Scratch directory for unpacked add-ons and the patch tree
    pub staging_dir: PathBuf,
    /// Where the packed patch is installed; defaults to the first source directory
    pub mods_dir: Option<PathBuf>,
    /// Installed-mods list; located under `game_data_dir` when unset
    pub modsettings_path: Option<PathBuf>,
    /// Searched for `modsettings.lsx` when `modsettings_path` is unset
    pub game_data_dir: Option<PathBuf>,
    /// Keep the staging tree after a successful run
    pub keep_staging: bool,
    /// Identity of the generated patch
    pub patch_identity: AddonIdentity,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dry_run: false,
            source_directories: Vec::new(),
            flag_merge: FlagMerge::default(),
            divine_path: PathBuf::from("export_tool/divine.exe"),
            game: "bg3".to_string(),
            tool_timeout_secs: None,
            staging_dir: PathBuf::from("temp"),
            mods_dir: None,
            modsettings_path: None,
            game_data_dir: None,
            keep_staging: false,
            patch_identity: AddonIdentity::default(),
        }
    }
}

impl Config {
    /// Load a config from TOML
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save the config as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check the settings a run cannot do without
    pub fn validate(&self) -> Result<()> {
        let id = &self.patch_identity;
        if id.uuid.trim().is_empty() || id.folder.trim().is_empty() || id.name.trim().is_empty() {
            return Err(Error::Config(
                "patch_identity needs a uuid, name and folder".to_string(),
            ));
        }
        if id.folder.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "patch folder '{}' must be a plain directory name",
                id.folder
            )));
        }
        if self.source_directories.is_empty() {
            return Err(Error::Config("no source_directories configured".to_string()));
        }
        if !self.dry_run && self.install_dir().is_none() {
            return Err(Error::Config("no mods_dir to install into".to_string()));
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    /// Directory receiving the packed patch
    pub fn install_dir(&self) -> Option<PathBuf> {
        self.mods_dir.clone().or_else(|| {
            self.source_directories
                .iter()
                .find(|p| p.is_dir())
                .cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
dry_run = true
source_directories = ["Mods"]
flag_merge = "logical-or"

[patch_identity]
uuid = "1234"
name = "MyPatch"
author = "me"
folder = "MyPatch"
description = ""
"#,
        )
        .unwrap();

        assert!(config.dry_run);
        assert_eq!(config.flag_merge, FlagMerge::LogicalOr);
        assert_eq!(config.patch_identity.uuid, "1234");
        assert_eq!(config.game, "bg3");
        assert_eq!(config.staging_dir, PathBuf::from("temp"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_flag_policy_rejected() {
        let err = Config::from_toml("flag_merge = \"maybe\"").unwrap_err();
        assert!(matches!(err, Error::TomlDe(_)));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.source_directories.push(PathBuf::from("Mods"));
        config.mods_dir = Some(PathBuf::from("Mods"));
        assert!(config.validate().is_ok());

        config.patch_identity.folder = "a/b".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("modpatch.toml");

        let mut config = Config::default();
        config.tool_timeout_secs = Some(30);
        config.source_directories.push(PathBuf::from("Mods"));
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.tool_timeout(), Some(Duration::from_secs(30)));
    }
}
