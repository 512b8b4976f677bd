//! `snare export` (spec §6.2): grounded on `cmd/export.go`.

use anyhow::Context;
use clap::{Args, ValueEnum};
use snare::har;
use snare::store::CaptureStore;
use std::path::PathBuf;

#[derive(Clone, Copy, ValueEnum)]
pub enum Format {
    Json,
    Har,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Export format.
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Destination file.
    #[arg(short, long)]
    output: PathBuf,
}

pub fn run(args: ExportArgs) -> anyhow::Result<()> {
    let store = CaptureStore::new(1000, Some(snare::config::store_dir()));
    let captures = store.list_from_disk(0);

    let contents = match args.format {
        Format::Json => serde_json::to_string_pretty(&captures)?,
        Format::Har => serde_json::to_string_pretty(&har::build_har(&captures))?,
    };

    std::fs::write(&args.output, contents).with_context(|| format!("writing {}", args.output.display()))?;
    println!("exported {} captures to {}", captures.len(), args.output.display());
    Ok(())
}
