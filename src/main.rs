//! walrep CLI entry point
//!
//! Everything except the exit status is delegated to `cli::run`.

use walrep::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }
}
