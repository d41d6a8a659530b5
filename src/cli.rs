use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::joining::JoinMethod;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct ProgramArgs {
    #[command(subcommand)]
    pub subcommand: ProgramSubcommand,
    /// How chatty the run is; RUST_LOG overrides this when set.
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

/// Logging verbosity selected on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Errors only.
    Quiet,
    /// Progress and timing summaries.
    Info,
    /// Per-stage detail.
    Debug,
}

#[derive(Subcommand, Debug)]
pub enum ProgramSubcommand {
    #[clap(
        name = "construct",
        about = "Construct a neighbour-joining tree from a distance matrix"
    )]
    Construct(ConstructArgs),
}

#[derive(Args, Debug)]
pub struct ConstructArgs {
    /// Input distance matrix file path
    #[arg(short, long, help = "Input distance matrix file path", required = true)]
    pub input: String,
    #[arg(
        short,
        long,
        help = "Output Newick tree file path",
        default_value = "output.nwk"
    )]
    pub output: String,
    #[arg(
        short = 'm',
        long,
        help = "The joining algorithm to run",
        default_value = "bionj"
    )]
    pub method: JoinMethod,
    #[arg(
        short = 't',
        long,
        default_value_t = 0,
        help = "Worker threads for the row-parallel kernels; 0 uses every core"
    )]
    pub threads: usize,
    #[arg(long, help = "Write a JSON run log to this path")]
    pub run_log: Option<String>,
}

impl ConstructArgs {
    pub fn default() -> Self {
        Self {
            input: String::new(),
            output: String::from("output.nwk"),
            method: JoinMethod::Bionj,
            threads: 0,
            run_log: None,
        }
    }
}
