//! modpatch CLI
//!
//! Command-line tool for building a merged progression patch from installed BG3 mods.

use clap::{Parser, Subcommand};
use modpatch_core::{
    combine, load_unpacked_dirs, write_patch_tree, AddonOutcome, AddonReport, Config, Contribution,
    DivineArchiver, FlagMerge, MergeOptions, Pipeline, Progressions, RunReport,
};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modpatch")]
#[command(about = "BG3 progression table merger", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack installed mods, merge their progressions and install the patch
    Run {
        /// Path to config file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Render the patch without packing or installing it
        #[arg(long)]
        dry_run: bool,

        /// Write the run report (JSON) here
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Merge already-unpacked mods and write the patch documents
    Merge {
        /// Unpacked mod directories, in merge order
        #[arg(short, long, required = true)]
        dir: Vec<PathBuf>,

        /// Output directory for the patch tree
        #[arg(short, long)]
        output: PathBuf,

        /// OR the boolean flags instead of keeping the first value
        #[arg(long)]
        logical_or: bool,
    },

    /// Show what an unpacked mod contributes
    Inspect {
        /// Unpacked mod directory
        #[arg(short, long)]
        dir: PathBuf,
    },

    /// Write a config file with default settings
    InitConfig {
        /// Output path for the config file
        #[arg(short, long)]
        output: PathBuf,

        /// Directories holding installed mods
        #[arg(short, long)]
        source: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> modpatch_core::Result<()> {
    match command {
        Commands::Run {
            config,
            dry_run,
            report,
        } => cmd_run(&config, dry_run, report.as_deref()),
        Commands::Merge {
            dir,
            output,
            logical_or,
        } => cmd_merge(&dir, &output, logical_or),
        Commands::Inspect { dir } => cmd_inspect(&dir),
        Commands::InitConfig { output, source } => cmd_init_config(&output, source),
    }
}

fn cmd_run(config_path: &Path, dry_run: bool, report_path: Option<&Path>) -> modpatch_core::Result<()> {
    let mut config = Config::load(config_path)?;
    config.dry_run |= dry_run;
    debug!("loaded config from {}", config_path.display());

    let archiver = DivineArchiver::new(config.divine_path.clone(), config.game.clone())
        .with_timeout(config.tool_timeout());
    let report = Pipeline::new(config, archiver).run()?;

    print_report(&report);
    if let Some(path) = report_path {
        report.save(path)?;
        println!("Report written to {}", path.display());
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Mods ({}):", report.addons.len());
    for addon in &report.addons {
        print_addon(addon);
    }
    println!();
    println!(
        "Merged {} progressions ({} duplicate spell slot grants removed)",
        report.progressions, report.slot_grants_removed
    );

    if let Some(staged) = &report.staged_at {
        println!("Patch tree: {}", staged.display());
    }
    match &report.archive {
        Some(archive) => println!("Installed: {}", archive.display()),
        None if report.dry_run => println!("Dry run: nothing installed"),
        None => println!("Nothing installed"),
    }
    if report.modsettings_updated {
        println!("modsettings.lsx updated");
    }
}

fn print_addon(addon: &AddonReport) {
    let status = match &addon.outcome {
        AddonOutcome::Selected { progressions } => format!("{} progressions", progressions),
        AddonOutcome::NotApplicable => "no progression table".to_string(),
        AddonOutcome::Skipped { reason } => format!("skipped: {}", reason),
    };
    println!("  {} [{}]", addon.display_name(), status);
}

fn cmd_merge(dirs: &[PathBuf], output: &Path, logical_or: bool) -> modpatch_core::Result<()> {
    let (reports, addons) = load_unpacked_dirs(dirs);
    for report in &reports {
        print_addon(report);
    }

    let options = MergeOptions {
        flag_merge: if logical_or {
            FlagMerge::LogicalOr
        } else {
            FlagMerge::FirstWins
        },
        ..MergeOptions::default()
    };
    let combined = combine(&addons, &options);

    for note in &combined.notes {
        if let Contribution::Merged {
            added,
            merged,
            mismatched_fields,
        } = note.contribution
        {
            println!(
                "  {}: {} added, {} merged, {} fields kept",
                note.addon, added, merged, mismatched_fields
            );
        }
    }

    let staged = write_patch_tree(output, &combined.patch)?;
    println!();
    println!(
        "Wrote {} progressions to {}",
        combined.patch.entries().len(),
        staged.progressions.display()
    );
    println!("Wrote metadata to {}", staged.meta.display());

    Ok(())
}

fn cmd_inspect(dir: &Path) -> modpatch_core::Result<()> {
    let (reports, addons) = load_unpacked_dirs(&[dir]);
    for report in &reports {
        print_addon(report);
    }

    let Some(addon) = addons.first() else {
        return Ok(());
    };

    println!();
    println!("Name: {}", addon.identity.name);
    println!("UUID: {}", addon.identity.uuid);
    println!("Folder: {}", addon.identity.folder);
    if !addon.identity.author.is_empty() {
        println!("Author: {}", addon.identity.author);
    }

    if let Progressions::Parsed { entries } = &addon.progressions {
        println!();
        println!("Progressions ({}):", entries.len());
        for entry in entries {
            println!(
                "  {} level {} ({}) boosts={} passives={} selectors={} subclasses={}",
                entry.name,
                entry.level,
                entry.uuid,
                entry.boosts.len(),
                entry.passives_added.len(),
                entry.selectors.len(),
                entry.subclasses.len()
            );
        }
    }

    Ok(())
}

fn cmd_init_config(output: &Path, sources: Vec<PathBuf>) -> modpatch_core::Result<()> {
    let config = Config {
        source_directories: sources,
        ..Config::default()
    };
    config.save(output)?;

    println!("Created config file: {}", output.display());
    println!("Edit source_directories and patch_identity before running.");

    Ok(())
}
