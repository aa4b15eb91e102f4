//! Conductor CLI
//!
//! Inspects workflow specs and prints the effective configuration.

use conductor_core::cli;

fn main() {
    if let Err(e) = cli::run_cli() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
