mod cli;

use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();

    if let Err(e) = cli::run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(whs_core::error::exit_code_for(&e));
    }
}
