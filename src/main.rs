//! formwork CLI entry point
//!
//! Parses arguments and dispatches via `cli::run`. The error object is
//! already on stdout; stderr gets the one-line summary.

use formwork::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
