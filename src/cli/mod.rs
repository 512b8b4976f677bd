//! CLI surface (spec §6).
//!
//! Grounded on `cmd/root.go` and its siblings: one subcommand per Go
//! `cmd/*.go` file, `clap` derive standing in for `cobra`.

mod ca;
mod clear;
mod export;
mod list;
mod replay;
mod save;
mod serve;
mod show;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "snare", about = "Local HTTP/HTTPS intercepting proxy with capture and replay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the proxy.
    Serve(serve::ServeArgs),
    /// List recent captures.
    List(list::ListArgs),
    /// Show one capture in full.
    Show(show::ShowArgs),
    /// Save captures to a file.
    Save(save::SaveArgs),
    /// Export captures as JSON or HAR.
    Export(export::ExportArgs),
    /// Resend a captured request.
    Replay(replay::ReplayArgs),
    /// Delete all captures.
    Clear(clear::ClearArgs),
    /// Certificate authority management.
    #[command(subcommand)]
    Ca(ca::CaCommand),
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => serve::run(args).await,
        Command::List(args) => list::run(args),
        Command::Show(args) => show::run(args),
        Command::Save(args) => save::run(args),
        Command::Export(args) => export::run(args),
        Command::Replay(args) => replay::run(args).await,
        Command::Clear(args) => clear::run(args),
        Command::Ca(cmd) => ca::run(cmd),
    }
}
