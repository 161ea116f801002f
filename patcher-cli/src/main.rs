use clap::{Parser, Subcommand};
use std::path::PathBuf;

use patcher_core::writes::Endian;
use patcher_core::{
    baseline, build_patch, load_address_map, load_aliases, load_baseline, load_change_set,
    ppf, save_baseline, Result,
};

#[derive(Debug, Parser)]
#[command(name = "disc-patcher", version, about = "Binary patch authoring for sectored disc images")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read a baseline document out of a disc image, driven by an
    /// address-map catalog.
    Extract {
        #[arg(long)]
        image: PathBuf,

        #[arg(long)]
        map: PathBuf,

        #[arg(long)]
        out: PathBuf,
    },
    /// Validate a change-set against a baseline and emit a patch.
    Build {
        #[arg(long)]
        baseline: PathBuf,

        #[arg(long)]
        changes: PathBuf,

        #[arg(long)]
        aliases: Option<PathBuf>,

        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value = "")]
        description: String,
    },
    /// Print the write records of an existing patch file.
    Dissect {
        #[arg(long)]
        patch: PathBuf,
    },
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Extract { image, map, out } => {
            let raw = std::fs::read(&image)?;
            let map = load_address_map(&map)?;
            let extracted = baseline::extract(&raw, &map, Endian::Little)?;
            save_baseline(&out, &extracted)?;
        }
        Command::Build {
            baseline,
            changes,
            aliases,
            out,
            description,
        } => {
            let baseline = load_baseline(&baseline)?;
            let changes = load_change_set(&changes)?;
            let aliases = match aliases {
                Some(path) => load_aliases(&path)?,
                None => Default::default(),
            };
            let patch = build_patch(&baseline, &changes, &aliases, &description, Endian::Little)?;
            std::fs::write(&out, patch)?;
        }
        Command::Dissect { patch } => {
            let raw = std::fs::read(&patch)?;
            let parsed = ppf::decode(&raw)?;
            println!("description: {}", parsed.description);
            println!("records: {}", parsed.records.len());
            for rec in &parsed.records {
                let bytes: Vec<String> =
                    rec.bytes.iter().map(|b| format!("{:02X}", b)).collect();
                println!(
                    "  0x{:08X} len {:3}  {}",
                    rec.address,
                    rec.bytes.len(),
                    bytes.join(" ")
                );
            }
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
