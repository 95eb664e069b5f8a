use clap::Parser;
use metab_prep::cli::{args::Args, commands};
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse command line arguments
    let args = Args::parse();

    // If no subcommand was provided, show help and available commands
    if args.command.is_none() {
        show_help_and_commands();
        process::exit(0);
    }

    let verbose = matches!(
        &args.command,
        Some(metab_prep::cli::args::Commands::Prepare(p)) if p.verbose
    );
    init_logging(verbose);

    match commands::run(args) {
        Ok(()) => {
            process::exit(0);
        }
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "metab_prep=debug" } else { "metab_prep=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Show help information and available commands when no subcommand is provided
fn show_help_and_commands() {
    println!("metab-prep - Stream Sensor Series Preparation");
    println!("=============================================");
    println!();
    println!("Condition irregular multi-sensor stream time series into a single");
    println!("regularly-spaced table suitable for metabolism models.");
    println!();
    println!("USAGE:");
    println!("    metab-prep <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    prepare     Condition a record set into a model-ready table");
    println!("    help        Show this help message or help for specific commands");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Show help information");
    println!("    -V, --version    Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    # Prepare a record set with defaults:");
    println!("    metab-prep prepare --input records.csv --site site.json");
    println!();
    println!("    # Prepare with a config file and an explicit interval:");
    println!("    metab-prep prepare --input records.csv --site site.json \\");
    println!("                       --config prep.toml --interval \"15 min\"");
    println!();
    println!("For detailed help on any command, use:");
    println!("    metab-prep prepare --help");
}
