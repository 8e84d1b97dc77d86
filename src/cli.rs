use crate::{
    config::AppConfig,
    copier::{self, CancelFlag, CopyError, CopyOutcome, CopyProgress, ProgressCallback},
    darkest,
    host::{DirectoryCollection, ModCollection},
    inventory::{self, Inventory, InventoryRow, ModOrigin},
    steam::{self, StorageRoot},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::warn;

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

struct GlobalOptions {
    format: OutputFormat,
    mods_dir: Option<PathBuf>,
    game_root: Option<PathBuf>,
}

enum CliCommand {
    List(ListOptions),
    Copy(CopyOptions),
    Paths,
    Help,
    Version,
}

struct ListOptions {
    imported: Option<bool>,
    filter: Option<String>,
}

struct CopyOptions {
    query: String,
    name: String,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("torchsmith v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::List(options) => {
            let session = Session::open(&global)?;
            session.print_rows(&options, global.format)
        }
        CliCommand::Paths => {
            let session = Session::open(&global)?;
            session.print_paths(global.format)
        }
        CliCommand::Copy(options) => {
            let mut session = Session::open(&global)?;
            session.copy(&options)
        }
    }
}

fn parse_args(args: &[String]) -> Result<(GlobalOptions, CliCommand)> {
    let (global, tokens) = parse_global_options(args);
    let Some(head) = tokens.first() else {
        return Ok((global, CliCommand::Help));
    };
    let command = match head.as_str() {
        "--help" | "-h" | "help" => CliCommand::Help,
        "--version" | "-V" | "version" => CliCommand::Version,
        "list" => CliCommand::List(parse_list(tokens.get(1..).unwrap_or(&[]))?),
        "paths" => CliCommand::Paths,
        "copy" => {
            let query = tokens.get(1).ok_or_else(|| {
                anyhow::anyhow!("copy requires a source (published file id, title, or path)")
            })?;
            let name = tokens
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("copy requires a destination mod name"))?;
            CliCommand::Copy(CopyOptions {
                query: query.clone(),
                name: name.clone(),
            })
        }
        other => bail!("Unknown command: {other} (use 'list', 'copy', or 'paths')"),
    };
    Ok((global, command))
}

fn parse_global_options(args: &[String]) -> (GlobalOptions, Vec<String>) {
    let mut format = OutputFormat::Text;
    let mut mods_dir = None;
    let mut game_root = None;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            if let Some(parsed) = OutputFormat::parse(value) {
                format = parsed;
            }
            continue;
        }
        if arg == "--format" {
            if let Some(value) = iter.next() {
                if let Some(parsed) = OutputFormat::parse(value) {
                    format = parsed;
                }
            }
            continue;
        }
        if let Some(value) = arg.strip_prefix("--mods-dir=") {
            mods_dir = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--mods-dir" {
            if let Some(value) = iter.next() {
                mods_dir = Some(PathBuf::from(value));
            }
            continue;
        }
        if let Some(value) = arg.strip_prefix("--game-root=") {
            game_root = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--game-root" {
            if let Some(value) = iter.next() {
                game_root = Some(PathBuf::from(value));
            }
            continue;
        }
        tokens.push(arg.to_string());
    }

    (
        GlobalOptions {
            format,
            mods_dir,
            game_root,
        },
        tokens,
    )
}

fn parse_list(args: &[String]) -> Result<ListOptions> {
    let mut imported = None;
    let mut filter = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--imported" => imported = Some(true),
            "--pending" => imported = Some(false),
            "--filter" => {
                if let Some(value) = iter.next() {
                    filter = Some(value.to_string());
                } else {
                    bail!("--filter requires a value");
                }
            }
            value if value.starts_with("--filter=") => {
                filter = Some(value.trim_start_matches("--filter=").to_string());
            }
            _ => {}
        }
    }
    Ok(ListOptions { imported, filter })
}

struct Session {
    mods_dir: PathBuf,
    game_root: Option<PathBuf>,
    roots: Vec<StorageRoot>,
    collection: DirectoryCollection,
    inventory: Inventory,
}

impl Session {
    fn open(global: &GlobalOptions) -> Result<Self> {
        let config = AppConfig::load_or_create()?;
        let mods_dir = global.mods_dir.clone().or(config.mods_dir).context(
            "no mods directory configured; pass --mods-dir or set mods_dir in the config file",
        )?;
        if !mods_dir.is_dir() {
            bail!("mods directory does not exist: {}", mods_dir.display());
        }
        let game_root = global
            .game_root
            .clone()
            .or(config.game_root)
            .or_else(|| steam::find_installed_game(darkest::STEAM_APP_ID));
        if let Some(root) = &game_root {
            if !darkest::looks_like_game_root(root) {
                warn!("{} does not look like a {} install", root.display(), darkest::GAME_NAME);
            }
        }
        let roots = steam::locate_storage_roots(darkest::STEAM_APP_ID, game_root.as_deref());
        let collection = DirectoryCollection::new(mods_dir.clone());
        let local_mods = game_root
            .as_deref()
            .map(darkest::local_mods_dir)
            .filter(|dir| dir.is_dir());
        let inventory = inventory::build_inventory(
            darkest::STEAM_APP_ID,
            &roots,
            local_mods.as_deref(),
            &collection,
        );
        Ok(Self {
            mods_dir,
            game_root,
            roots,
            collection,
            inventory,
        })
    }

    fn print_rows(&self, options: &ListOptions, format: OutputFormat) -> Result<()> {
        let mut rows: Vec<&InventoryRow> = self.inventory.rows.iter().collect();
        if let Some(filter) = &options.filter {
            let needle = filter.to_ascii_lowercase();
            rows.retain(|row| row.display_title.to_ascii_lowercase().contains(&needle));
        }
        if let Some(imported) = options.imported {
            rows.retain(|row| row.already_imported == imported);
        }

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            OutputFormat::Text => {
                for row in rows {
                    let imported = if row.already_imported { "x" } else { " " };
                    let origin = match row.origin {
                        ModOrigin::Workshop => "workshop",
                        ModOrigin::Local => "local",
                    };
                    let title = if row.display_title.is_empty() {
                        "(untitled)"
                    } else {
                        row.display_title.as_str()
                    };
                    let destination = if row.destination_name.is_empty() {
                        "(not copied)"
                    } else {
                        row.destination_name.as_str()
                    };
                    println!(
                        "[{imported}] {origin:<8} {title:<44} {destination:<24} {}",
                        row.source_path.display()
                    );
                }
            }
        }
        Ok(())
    }

    fn print_paths(&self, format: OutputFormat) -> Result<()> {
        let report = PathsReport {
            steam_root: steam::find_steam_root(),
            game_root: self.game_root.clone(),
            storage_roots: self.roots.iter().map(|root| root.path.clone()).collect(),
            mods_dir: self.mods_dir.clone(),
            local_mods_dir: self.game_root.as_deref().map(darkest::local_mods_dir),
        };
        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => {
                println!("steam root:     {}", display_optional(&report.steam_root));
                println!("game root:      {}", display_optional(&report.game_root));
                for root in &report.storage_roots {
                    println!("workshop root:  {}", root.display());
                }
                println!("mods dir:       {}", report.mods_dir.display());
                println!(
                    "local mods dir: {}",
                    display_optional(&report.local_mods_dir)
                );
            }
        }
        Ok(())
    }

    fn copy(&mut self, options: &CopyOptions) -> Result<()> {
        let row = self.find_row(&options.query)?.clone();
        let name = options.name.trim().to_string();
        if self.collection.installed_mod_names().contains(&name) {
            bail!("a mod named {name:?} already exists");
        }
        let dest = self.mods_dir.join(&name);

        let progress: ProgressCallback = Arc::new(|update: CopyProgress| match update.detail {
            Some(detail) => eprint!(
                "\rCopying {}/{}: {detail}        ",
                update.completed, update.total
            ),
            None => eprint!("\rCopying {}/{}", update.completed, update.total),
        });
        let cancel = CancelFlag::new();
        let outcome = copier::copy_mod(
            &row.source_path,
            &self.mods_dir,
            &name,
            row.origin,
            &self.inventory.records,
            Some(&progress),
            &cancel,
        );
        eprintln!();
        match outcome {
            Ok(CopyOutcome::Completed) => {
                self.inventory.record_copy(&row.source_path, &name, &dest);
                println!("Copied to {}", dest.display());
                Ok(())
            }
            Ok(CopyOutcome::Cancelled) => {
                println!("Cancelled; partial copy left at {}", dest.display());
                Ok(())
            }
            Err(
                err @ (CopyError::InvalidName { .. }
                | CopyError::NameCollision(_)
                | CopyError::UnregisteredItem(_)),
            ) => bail!("{err}"),
            Err(err) => Err(err).context("copy failed"),
        }
    }

    fn find_row(&self, query: &str) -> Result<&InventoryRow> {
        let matched: Vec<&InventoryRow> = self
            .inventory
            .rows
            .iter()
            .filter(|row| {
                row.source_path == Path::new(query)
                    || row.source_path.file_name().and_then(|name| name.to_str()) == Some(query)
                    || row.display_title == query
            })
            .collect();
        match matched.len() {
            0 => bail!("no inventory row matches {query:?} (try 'torchsmith list')"),
            1 => Ok(matched[0]),
            _ => bail!("{} rows match {query:?}; use the source path", matched.len()),
        }
    }
}

#[derive(Serialize)]
struct PathsReport {
    steam_root: Option<PathBuf>,
    game_root: Option<PathBuf>,
    storage_roots: Vec<PathBuf>,
    mods_dir: PathBuf,
    local_mods_dir: Option<PathBuf>,
}

fn display_optional(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "(not found)".to_string())
}

fn print_help() {
    println!(
        "torchsmith - Steam Workshop mod importer for {}",
        darkest::GAME_NAME
    );
    println!();
    println!("Usage: torchsmith [options] <command>");
    println!();
    println!("Commands:");
    println!("  list                  List workshop and loose mods with import status");
    println!("      --imported          only rows already copied into the mod library");
    println!("      --pending           only rows not yet copied");
    println!("      --filter <text>     filter rows by title");
    println!("  copy <source> <name>  Copy a mod into the library under <name>");
    println!("                        <source> is a published file id, a title, or a path");
    println!("  paths                 Show the discovered Steam/game/library paths");
    println!();
    println!("Options:");
    println!("  --format <text|json>  Output format (default: text)");
    println!("  --mods-dir <path>     Mod library directory (overrides config)");
    println!("  --game-root <path>    Game install directory (overrides discovery)");
}
