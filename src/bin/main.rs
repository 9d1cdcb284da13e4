use anyhow::Result;
use clap::{Parser, Subcommand};

use rf_tools::combine::subcommand::CombineArgs;
use rf_tools::norm::subcommand::NormArgs;
use rf_tools::peaks::subcommand::PeakcallArgs;

#[derive(Parser)]
#[command(
    name = "rftools",
    author,
    version,
    about = "RNA structure-probing core pipeline",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform per-base count profiles into normalized reactivity
    /// profiles, one XML document per transcript.
    Norm(NormArgs),
    /// Call enriched regions from immunoprecipitation coverage, BED output.
    Peakcall(PeakcallArgs),
    /// Merge replicate reactivity profiles with per-base mean and stdev.
    Combine(CombineArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Norm(args) => args.run(),
        Commands::Peakcall(args) => args.run(),
        Commands::Combine(args) => args.run(),
    }
}
