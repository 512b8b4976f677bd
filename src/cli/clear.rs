//! `snare clear` (spec §6): grounded on `cmd/clear.go`.

use clap::Args;
use snare::store::CaptureStore;

#[derive(Args)]
pub struct ClearArgs {}

pub fn run(_args: ClearArgs) -> anyhow::Result<()> {
    let store = CaptureStore::new(1000, Some(snare::config::store_dir()));
    store.clear(true);
    println!("cleared all captures");
    Ok(())
}
