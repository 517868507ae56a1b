mod cmd_ci;
mod error;
mod paths;
mod runner;

use error::Result;
use std::env;
use std::process::ExitCode;

fn print_help() {
    println!(
        "\
Workspace automation.

Usage:
  cargo xtask <command> [args...]

Commands:
  ci      Source guardrails, fmt, check and test for the whole workspace
  help    Print this message
"
    );
}

fn run(mut args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        print_help();
        return Ok(());
    }
    let command = args.remove(0);
    match command.as_str() {
        "ci" => cmd_ci::cmd(args),
        "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => Err(error::XtaskError::Message(format!(
            "unknown command `{other}` (run `cargo xtask help`)"
        ))),
    }
}

fn main() -> ExitCode {
    match run(env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
