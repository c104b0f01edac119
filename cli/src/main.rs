use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use autolink_core::{GlobalSettings, LinkedMapping, Linker, Mapping};
use clap::{ArgAction, Parser};
use console::style;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// autolink CLI entry point.
#[derive(Debug, Parser)]
#[command(name = "autolink", about = "Rewrite keyword mentions in HTML files into anchor links.")]
struct Args {
    /// Path to the rule file (YAML) with settings and keyword mappings.
    #[arg(long, default_value = "autolink.yml")]
    rules: PathBuf,

    /// Emit a JSON summary for automation.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Report what would be linked without writing anything.
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,

    /// Write rewritten documents back in place. Without this flag a single
    /// input file is rewritten to stdout instead.
    #[arg(long, action = ArgAction::SetTrue)]
    write: bool,

    /// Files or directories containing .html/.htm documents.
    #[arg(value_name = "PATH", default_value = ".", num_args = 0..)]
    paths: Vec<PathBuf>,
}

/// On-disk rule file: global settings plus the mapping table. The `active`
/// flag and the excluded-file list are collaborator concerns, applied here
/// before the engine ever sees a mapping or a document.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RuleFile {
    settings: GlobalSettings,
    mappings: Vec<MappingRule>,
    /// File names (not paths) to skip entirely.
    exclude: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct MappingRule {
    #[serde(flatten)]
    mapping: Mapping,
    active: bool,
}

impl Default for MappingRule {
    fn default() -> Self {
        Self {
            mapping: Mapping::default(),
            active: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct FileSummary {
    path: String,
    links_inserted: usize,
    linked: Vec<LinkedMapping>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let raw = fs::read_to_string(&args.rules)
        .with_context(|| format!("failed to read rule file {}", args.rules.display()))?;
    let rules: RuleFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse rule file {}", args.rules.display()))?;

    let mappings: Vec<Mapping> = rules
        .mappings
        .into_iter()
        .filter(|rule| rule.active)
        .map(|rule| rule.mapping)
        .collect();
    let linker = Linker::new(&mappings, &rules.settings)?;

    let files = collect_documents(&args.paths, &rules.exclude)?;
    if files.is_empty() {
        bail!("no .html or .htm documents found under the given paths");
    }

    let mut summaries = Vec::with_capacity(files.len());
    let mut total_links = 0usize;
    let single_to_stdout = files.len() == 1 && !args.write && !args.dry_run && !args.json;

    for path in &files {
        let document = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let rewrite = linker.rewrite(&document);
        total_links += rewrite.links_inserted;

        if single_to_stdout {
            print!("{}", rewrite.html);
        } else if args.write && !args.dry_run && rewrite.links_inserted > 0 {
            fs::write(path, &rewrite.html)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        summaries.push(FileSummary {
            path: path.display().to_string(),
            links_inserted: rewrite.links_inserted,
            linked: rewrite.linked,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if !single_to_stdout {
        print_summary(&summaries, total_links, linker.mapping_count(), args.dry_run);
    }

    Ok(())
}

fn collect_documents(paths: &[PathBuf], exclude: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            if !is_excluded(path, exclude) {
                files.push(path.clone());
            }
            continue;
        }
        if !path.is_dir() {
            bail!("path {} does not exist", path.display());
        }
        for entry in WalkDir::new(path).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let entry_path = entry.path();
            let is_html = entry_path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
                .unwrap_or(false);
            if is_html && !is_excluded(entry_path, exclude) {
                files.push(entry_path.to_path_buf());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn is_excluded(path: &Path, exclude: &[String]) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| exclude.iter().any(|excluded| excluded == name))
        .unwrap_or(false)
}

fn print_summary(summaries: &[FileSummary], total_links: usize, rule_count: usize, dry_run: bool) {
    for summary in summaries {
        if summary.links_inserted == 0 {
            continue;
        }
        println!(
            "{} {} ({} links)",
            style("linked").green().bold(),
            summary.path,
            summary.links_inserted
        );
    }
    let verb = if dry_run { "would insert" } else { "inserted" };
    println!(
        "{} {verb} {} links across {} files using {} rules",
        style("autolink").bold(),
        style(total_links).bold(),
        summaries.len(),
        rule_count
    );
}
