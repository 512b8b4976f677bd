//! `snare show` (spec §6): grounded on `cmd/show.go`.

use anyhow::Context;
use clap::Args;
use snare::store::CaptureStore;

#[derive(Args)]
pub struct ShowArgs {
    /// Capture id, or a unique prefix of one.
    id: String,
}

pub fn run(args: ShowArgs) -> anyhow::Result<()> {
    let store = CaptureStore::new(1000, Some(snare::config::store_dir()));
    let capture = store
        .get_by_prefix(&args.id)
        .with_context(|| format!("no capture found matching '{}'", args.id))?;
    let json = serde_json::to_string_pretty(&capture)?;
    println!("{json}");
    Ok(())
}
