mod cli;
mod converter;
mod db;
mod error;
mod models;
mod resources;
mod xml;
mod xslt;

use colored::Colorize;
use tracing::Level;

use cli::{Cli, Invocation};
use error::ImportError;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse_lenient(std::env::args_os()).unwrap_or_else(|e| e.exit());
    init_logging(cli.verbose);

    let result = match cli.invocation() {
        Invocation::Usage => Err(ImportError::Usage),
        Invocation::Convert {
            source,
            destination,
        } => cli::convert::run(&source, destination.as_deref()),
    };

    if let Err(e) = result {
        if e.is_informational() {
            println!("{e}");
            return;
        }
        eprintln!("{} {e}", "Error:".red().bold());
        std::process::exit(1);
    }
}
