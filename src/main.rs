// src/main.rs - meantrim CLI entry point
// Tree location: ./src/main.rs

//! meantrim command line
//!
//! `trim` runs the pipeline and reports the residual edge count, `solve`
//! additionally searches the residue for 42-cycles and recovers their
//! nonces, `info` lists the bindable devices.

use clap::{Parser, Subcommand};
use meantrim::{
    algorithms::solver,
    compute::DeviceRegistry,
    init, MeantrimError, Params, Result, Settings, SipKeys, TrimParams, Trimmer, Variant,
};

#[derive(Parser)]
#[command(name = "meantrim")]
#[command(about = "Cuckoo/Cuckaroo edge trimmer and 42-cycle solver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trim the edge graph and report the residual count
    Trim {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Trim, then search the residue for 42-cycles and recover proofs
    Solve {
        #[command(flatten)]
        run: RunArgs,
    },
    /// List bindable devices
    Info,
}

#[derive(clap::Args)]
struct RunArgs {
    /// log2 of the edge count
    #[arg(long)]
    edge_bits: Option<u32>,
    /// Edge construction: cuckoo or cuckaroo
    #[arg(long)]
    variant: Option<String>,
    /// Trimming rounds
    #[arg(long)]
    ntrims: Option<u32>,
    /// Expansion mode: 0, 1, or 2
    #[arg(long)]
    expand: Option<u8>,
    /// Device id to bind
    #[arg(long)]
    device: Option<usize>,
    /// Four comma-separated SipHash key words (hex)
    #[arg(long, conflicts_with = "header")]
    keys: Option<String>,
    /// Work header (hex) to derive the key set from
    #[arg(long)]
    header: Option<String>,
}

fn main() -> Result<()> {
    init()?;
    let cli = Cli::parse();
    match cli.command {
        Commands::Trim { run } => {
            let (mut trimmer, _) = build_trimmer(&run)?;
            let count = trimmer.trim()?;
            println!("residual edges: {count}");
        }
        Commands::Solve { run } => {
            let (mut trimmer, settings) = build_trimmer(&run)?;
            let solutions = solver::solve(&mut trimmer, settings.max_solutions)?;
            if solutions.is_empty() {
                println!("no 42-cycle found (max {} reported)", settings.max_solutions);
            }
            for (i, solution) in solutions.iter().enumerate() {
                println!("solution {}: nonces {:?}", i + 1, solution.nonces);
            }
        }
        Commands::Info => {
            let registry = DeviceRegistry::detect();
            for dev in registry.list() {
                println!(
                    "device {}: {} ({:.1} GiB budget)",
                    dev.device_id,
                    dev.name,
                    dev.memory as f64 / (1024.0 * 1024.0 * 1024.0)
                );
            }
        }
    }
    Ok(())
}

fn build_trimmer(run: &RunArgs) -> Result<(Trimmer, Settings)> {
    let settings = Settings::default();
    let edge_bits = run.edge_bits.unwrap_or(settings.edge_bits);
    let variant_name = run.variant.clone().unwrap_or_else(|| settings.variant.clone());
    let variant = parse_variant(&variant_name)?;
    let tp = TrimParams {
        ntrims: run.ntrims.unwrap_or(settings.ntrims),
        expand: run.expand.unwrap_or(settings.expand),
        ..TrimParams::default()
    };
    let params = Params::new(edge_bits)?;
    let device = run.device.unwrap_or(settings.device);

    let mut trimmer = Trimmer::new(tp, params, device, variant)?;
    trimmer.sip_keys = parse_keys(run)?;
    Ok((trimmer, settings))
}

fn parse_variant(name: &str) -> Result<Variant> {
    match name.to_lowercase().as_str() {
        "cuckoo" => Ok(Variant::Cuckoo),
        "cuckaroo" => Ok(Variant::Cuckaroo),
        other => Err(MeantrimError::Config(format!(
            "unknown variant '{other}', expected cuckoo or cuckaroo"
        ))),
    }
}

fn parse_keys(run: &RunArgs) -> Result<SipKeys> {
    if let Some(list) = &run.keys {
        let words: Vec<&str> = list.split(',').collect();
        if words.len() != 4 {
            return Err(MeantrimError::Config(format!(
                "expected 4 comma-separated key words, got {}",
                words.len()
            )));
        }
        let mut parsed = [0u64; 4];
        for (slot, word) in parsed.iter_mut().zip(words.iter()) {
            let trimmed = word.trim().trim_start_matches("0x");
            *slot = u64::from_str_radix(trimmed, 16)
                .map_err(|e| MeantrimError::Config(format!("bad key word '{word}': {e}")))?;
        }
        return Ok(SipKeys {
            k0: parsed[0],
            k1: parsed[1],
            k2: parsed[2],
            k3: parsed[3],
        });
    }
    if let Some(header) = &run.header {
        let bytes = hex::decode(header.trim_start_matches("0x"))?;
        return Ok(SipKeys::from_header(&bytes).map_err(MeantrimError::Algorithm)?);
    }
    Ok(SipKeys::default())
}
