//! `snare list` (spec §6): grounded on `cmd/list.go`.

use clap::Args;
use snare::store::CaptureStore;

#[derive(Args)]
pub struct ListArgs {
    /// Number of most recent captures to show (0 = all).
    #[arg(short = 'n', long, default_value_t = 20)]
    count: usize,
}

pub fn run(args: ListArgs) -> anyhow::Result<()> {
    let store = CaptureStore::new(1000, Some(snare::config::store_dir()));
    let captures = store.list_from_disk(args.count);
    if captures.is_empty() {
        println!("no captures found");
        return Ok(());
    }
    for c in &captures {
        let status = c
            .response
            .as_ref()
            .map(|r| r.status_code.to_string())
            .unwrap_or_else(|| "ERR".to_string());
        println!(
            "{}  {:<6} {:<4} {:<40} {}",
            c.timestamp.to_rfc3339(),
            c.request.method,
            status,
            truncate(&c.request.url, 40),
            &c.id[..8.min(c.id.len())]
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
