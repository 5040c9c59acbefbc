use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use stash_cas::LocalCas;
use stash_pkg::{CancelToken, LocalStorage, PackageHandler, Storage, StorageConfig};
use stash_types::{Derivation, Digest};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let format = cli.format;
    match cli.command {
        Command::Put(args) => cmd_put(&config, args, format),
        Command::Cat(args) => cmd_cat(&config, args),
        Command::Has(args) => cmd_has(&config, args, format),
        Command::Id(args) => cmd_id(args, format),
        Command::Ls => cmd_ls(&config, format),
        Command::Prune(args) => cmd_prune(&config, args, format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StorageConfig> {
    let config = match path {
        Some(path) => StorageConfig::from_file(path)?,
        None => StorageConfig::from_env()?,
    };
    debug!(base = %config.base_dir.display(), "using cache directory");
    Ok(config)
}

fn open_cas(config: &StorageConfig) -> anyhow::Result<LocalCas> {
    LocalCas::new(config.cas_config())
        .with_context(|| format!("opening blob store at {}", config.cas_dir().display()))
}

fn parse_digest(s: &str) -> anyhow::Result<Digest> {
    s.parse().with_context(|| format!("invalid digest {s:?}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_put(config: &StorageConfig, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let data = fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let digest = open_cas(config)?.put(&data)?;
    match format {
        OutputFormat::Text => println!("{digest}"),
        OutputFormat::Json => print_json(&serde_json::json!({ "digest": digest.to_string() }))?,
    }
    Ok(())
}

fn cmd_cat(config: &StorageConfig, args: CatArgs) -> anyhow::Result<()> {
    let digest = parse_digest(&args.digest)?;
    let mut reader = open_cas(config)?.open(&digest, args.offset, args.limit)?;
    let mut stdout = io::stdout().lock();
    io::copy(&mut reader, &mut stdout)?;
    stdout.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct HasReport {
    present: Vec<String>,
    missing: Vec<String>,
}

fn cmd_has(config: &StorageConfig, args: HasArgs, format: OutputFormat) -> anyhow::Result<()> {
    let digests = args
        .digests
        .iter()
        .map(|s| parse_digest(s))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let missing = open_cas(config)?.find_missing(&digests);

    match format {
        OutputFormat::Text => {
            for digest in &digests {
                if missing.contains(digest) {
                    println!("{} {digest}", "missing".red());
                } else {
                    println!("{} {digest}", "present".green());
                }
            }
        }
        OutputFormat::Json => print_json(&HasReport {
            present: digests
                .iter()
                .filter(|d| !missing.contains(*d))
                .map(ToString::to_string)
                .collect(),
            missing: missing.iter().map(ToString::to_string).collect(),
        })?,
    }
    if !missing.is_empty() {
        bail!("{} of {} blob(s) missing", missing.len(), digests.len());
    }
    Ok(())
}

fn read_derivation(path: &Path) -> anyhow::Result<Derivation> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing derivation {}", path.display()))
}

fn cmd_id(args: IdArgs, format: OutputFormat) -> anyhow::Result<()> {
    let derivation = read_derivation(&args.file)?;
    let id = stash_hash::derivation_id(&derivation)?;
    match format {
        OutputFormat::Text => println!("{id}"),
        OutputFormat::Json => print_json(&serde_json::json!({ "id": id }))?,
    }
    Ok(())
}

#[derive(Serialize)]
struct PackageRow {
    id: String,
    available: bool,
    last_used: Option<String>,
    version: String,
}

fn cmd_ls(config: &StorageConfig, format: OutputFormat) -> anyhow::Result<()> {
    let storage = LocalStorage::from_config(config)?;
    let rows: Vec<PackageRow> = storage
        .packages()?
        .iter()
        .map(|pkg| {
            let availability = pkg.available();
            PackageRow {
                id: pkg.id().to_string(),
                available: availability.available,
                last_used: availability.last_used.map(|t| t.to_rfc3339()),
                version: pkg.metadata().version,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No packages.");
            }
            for row in &rows {
                let state = if row.available { "✓".green() } else { "·".dimmed() };
                let used = row.last_used.as_deref().unwrap_or("never built");
                println!("{state} {}  {}", row.id.bold(), used.dimmed());
            }
        }
    }
    Ok(())
}

fn cmd_prune(config: &StorageConfig, args: PruneArgs, format: OutputFormat) -> anyhow::Result<()> {
    let ttl = args
        .ttl_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.prune_ttl());
    let max = args.max.unwrap_or(config.prune_max);
    let storage = LocalStorage::from_config(config)?;
    let report = storage.prune(&CancelToken::new(), ttl, max)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => println!(
            "{} Pruned {} of {} package(s), {} skipped, {} bytes freed.",
            "✓".green().bold(),
            report.removed,
            report.examined,
            report.skipped,
            report.bytes_freed
        ),
    }
    Ok(())
}
