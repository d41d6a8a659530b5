use std::path::Path;

use anyhow::{Context, Result};
use clap::{crate_name, crate_version, Parser};
use log::{error, info};

use fast_nj::{
    cli::{ConstructArgs, ProgramArgs, ProgramSubcommand},
    init_logging,
    joining::runner::construct_tree_with_log,
};

fn main() {
    let app = ProgramArgs::parse();
    init_logging(app.log_level);

    let outcome = match &app.subcommand {
        ProgramSubcommand::Construct(args) => run_construct(args),
    };

    if let Err(err) = outcome {
        error!("{:#}", err);
        std::process::exit(1);
    }
}

fn run_construct(args: &ConstructArgs) -> Result<()> {
    install_thread_pool(args.threads)?;
    info!(
        "{} {} joining with {} worker thread(s)",
        crate_name!(),
        crate_version!(),
        rayon::current_num_threads()
    );
    construct_tree_with_log(
        Path::new(&args.input),
        Path::new(&args.output),
        args.method,
        args.run_log.as_deref().map(Path::new),
    )
    .with_context(|| format!("constructing tree from '{}'", args.input))
}

/// Size the global rayon pool; zero keeps rayon's own choice of one worker
/// per core.
fn install_thread_pool(threads: usize) -> Result<()> {
    let mut pool = rayon::ThreadPoolBuilder::new();
    if threads > 0 {
        pool = pool.num_threads(threads);
    }
    pool.build_global()
        .context("installing the global thread pool")
}
