//! `hotreload package`: build and stage deployment packages.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use hotreload_core::paths::staged_package_path;
use hotreload_core::Settings;
use hotreload_package::{build, build_and_stage, BuiltPackage, InclusionPolicy};

#[derive(Subcommand, Debug)]
pub enum PackageCommand {
    /// Build a package from a source tree and write it to the staging slot.
    Build(BuildArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Source tree to package; defaults to the working directory.
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Print every packaged path.
    #[arg(long)]
    pub list: bool,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "digest")]
    digest: String,
    #[tabled(rename = "files")]
    files: usize,
    #[tabled(rename = "bytes")]
    bytes: usize,
    #[tabled(rename = "staged at")]
    staged_at: String,
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "path")]
    path: String,
}

pub fn run(command: PackageCommand, config: &Path) -> Result<()> {
    let settings = crate::load_settings(config)?;
    match command {
        PackageCommand::Build(args) => {
            let source = source_root(args.source)?;
            let staged = staged_package_path(&settings.state_dir());
            let built = build_and_stage(&source, &policy(&settings), &staged)
                .with_context(|| format!("failed to package {}", source.display()))?;

            println!("{}", "package staged".green().bold());
            print_summary(&built, &staged);
            if args.list {
                print_entries(&built);
            }
        }
    }
    Ok(())
}

/// Build without staging; used by `push`.
pub(crate) fn build_from(
    source: Option<PathBuf>,
    settings: &Settings,
) -> Result<(PathBuf, BuiltPackage)> {
    let source = source_root(source)?;
    let built = build(&source, &policy(settings))
        .with_context(|| format!("failed to package {}", source.display()))?;
    Ok((source, built))
}

fn source_root(source: Option<PathBuf>) -> Result<PathBuf> {
    match source {
        Some(path) => Ok(path),
        None => std::env::current_dir().context("could not determine working directory"),
    }
}

fn policy(settings: &Settings) -> InclusionPolicy {
    InclusionPolicy::from_settings(&settings.package)
}

fn print_summary(built: &BuiltPackage, staged: &Path) {
    let row = SummaryRow {
        digest: built.digest.to_string(),
        files: built.file_count(),
        bytes: built.bytes.len(),
        staged_at: staged.display().to_string(),
    };
    let mut table = Table::new([row]);
    table.with(Style::rounded());
    println!("{table}");
}

fn print_entries(built: &BuiltPackage) {
    let rows = built
        .entries
        .iter()
        .enumerate()
        .map(|(index, path)| EntryRow {
            index: index + 1,
            path: path.clone(),
        });
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
