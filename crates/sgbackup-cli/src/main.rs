//! sgbackup - Savegame backup tool
//!
//! Usage:
//!   sgbackup <command> [options]
//!   sgbackup --help       Show help

use tracing_subscriber::EnvFilter;

mod cli;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        cli::print_help();
        return Ok(());
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("sgbackup v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match cli::parse_args(&args) {
        Ok((command, options)) => {
            init_logging(options.verbose);
            cli::run(command, options)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            cli::print_help();
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    // RUST_LOG wins over --verbose
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
