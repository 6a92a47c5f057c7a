//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    if let Err(err) = census_cli::run() {
        eprintln!("census: {err}");
        std::process::exit(1);
    }
}
