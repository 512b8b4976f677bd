//! `snare save` (spec §6): grounded on `cmd/save.go`.

use anyhow::Context;
use clap::Args;
use snare::store::CaptureStore;
use std::path::PathBuf;

#[derive(Args)]
pub struct SaveArgs {
    /// Capture id to save; omit with --all or --last.
    id: Option<String>,

    /// Save every capture instead of a single one.
    #[arg(long)]
    all: bool,

    /// Save only the most recent N captures.
    #[arg(short = 'n', long)]
    last: Option<usize>,

    /// Destination file (defaults to stdout for a single capture, or
    /// `captures.json` for --all/--last).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub fn run(args: SaveArgs) -> anyhow::Result<()> {
    let store = CaptureStore::new(1000, Some(snare::config::store_dir()));

    if args.all || args.last.is_some() {
        let n = args.last.unwrap_or(0);
        let captures = store.list_from_disk(n);
        let json = serde_json::to_string_pretty(&captures)?;
        let output = args.output.unwrap_or_else(|| PathBuf::from("captures.json"));
        std::fs::write(&output, json).with_context(|| format!("writing {}", output.display()))?;
        println!("saved {} captures to {}", captures.len(), output.display());
        return Ok(());
    }

    let id = args.id.context("capture id required unless --all or --last is given")?;
    let capture = store.get_by_prefix(&id).with_context(|| format!("no capture found matching '{id}'"))?;
    let json = serde_json::to_string_pretty(&capture)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            println!("saved capture {} to {}", capture.id, path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
