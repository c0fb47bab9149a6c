//! Entry point for the `conductord` daemon.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match conductord::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            writeln!(io::stderr(), "conductord: {error}").ok();
            ExitCode::FAILURE
        }
    }
}
