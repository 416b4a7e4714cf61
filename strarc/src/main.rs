mod cli;
mod commands;
mod error;
mod filter;
mod options;

use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use crate::cli::{CliOpts, Commands};
use crate::error::Error;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(opts: CliOpts) -> anyhow::Result<()> {
    match opts.cmd {
        Commands::Create(args) => commands::create(args, opts.verbose),
        Commands::Extract(args) => commands::extract(args, opts.verbose),
        Commands::Test(args) => commands::test(args, opts.verbose),
    }
}

fn main() {
    let opts = CliOpts::from_iter(wild::args_os());
    init_logging(opts.verbose);

    if let Err(e) = run(opts) {
        let code = e.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(1);
        eprintln!("Error: {:?}", e);
        std::process::exit(code);
    }
}
