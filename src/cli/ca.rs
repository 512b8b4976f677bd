//! `snare ca generate`/`ca install` (spec §6.1): grounded on `cmd/ca.go`.

use anyhow::Context;
use clap::{Args, Subcommand};
use snare::cert::CertificateAuthority;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum CaCommand {
    /// Generate (or reuse) the root certificate.
    Generate(GenerateArgs),
    /// Print OS-specific instructions for trusting the root certificate.
    Install,
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Directory to write ca.pem/ca-key.pem into.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub fn run(cmd: CaCommand) -> anyhow::Result<()> {
    match cmd {
        CaCommand::Generate(args) => generate(args),
        CaCommand::Install => install(),
    }
}

fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let dir = args.output.unwrap_or_else(snare::config::ca_dir);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    CertificateAuthority::load_or_create(&dir)?;
    println!("CA ready at {}", CertificateAuthority::cert_path(&dir).display());
    Ok(())
}

fn install() -> anyhow::Result<()> {
    let dir = snare::config::ca_dir();
    let cert_path = CertificateAuthority::cert_path(&dir);
    if !cert_path.is_file() {
        println!("no CA found at {}; run `snare ca generate` first", cert_path.display());
        return Ok(());
    }

    println!("Root certificate: {}", cert_path.display());
    match std::env::consts::OS {
        "macos" => {
            println!("Trust it system-wide with:");
            println!(
                "  sudo security add-trusted-cert -d -r trustRoot -k /Library/Keychains/System.keychain {}",
                cert_path.display()
            );
        }
        "linux" => {
            println!("Trust it system-wide with (Debian/Ubuntu):");
            println!("  sudo cp {} /usr/local/share/ca-certificates/snare-ca.crt", cert_path.display());
            println!("  sudo update-ca-certificates");
            println!("On Fedora/RHEL, copy into /etc/pki/ca-trust/source/anchors/ and run update-ca-trust instead.");
        }
        "windows" => {
            println!("Trust it with:");
            println!("  certutil -addstore -f \"ROOT\" {}", cert_path.display());
        }
        other => {
            println!("Unrecognized platform '{other}'; import {} into your trust store manually.", cert_path.display());
        }
    }
    Ok(())
}
