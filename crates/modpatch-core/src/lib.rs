//! modpatch-core: Core library for merging BG3 mod progression tables
//!
//! This library provides functionality to:
//! - Read the LSX documents of unpacked add-ons into typed progression entries
//! - Merge progression entries from many add-ons into one patch, field by field
//! - Remove duplicate spell-slot grants from merged boosts
//! - Render the patch's metadata and progression documents
//! - Drive the external package tool and register the patch in `modsettings.lsx`

pub mod archive;
pub mod config;
pub mod error;
pub mod lsx;
pub mod merger;
pub mod model;
pub mod modsettings;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod scanner;
pub mod serializer;
pub mod slots;

pub use archive::{Archiver, DivineArchiver};
pub use config::Config;
pub use error::{Error, Result};
pub use merger::{combine, Combined, Contribution, FlagMerge, MergeNote, MergeOptions, MergeStrategy};
pub use model::{
    AddonIdentity, AddonMetadata, Field, ProgressionEntry, Progressions, StringSet, SubClass,
};
pub use parser::{load_addon, parse_addon, parse_progressions};
pub use pipeline::{load_unpacked, load_unpacked_dirs, write_patch_tree, Pipeline, StagedPatch};
pub use report::{AddonOutcome, AddonReport, RunReport};
pub use scanner::{find_archives, locate_addon_files, AddonFiles};
pub use serializer::{render_metadata, render_progressions};
pub use slots::{remove_duplicate_spellslots, SlotGrant};
