#![allow(clippy::result_large_err)]

use clap::{CommandFactory, error::ErrorKind};
use runbook::cli::Cli;

fn main() {
  colog::init();

  match runbook::cli::main_entrypoint() {
    Ok(()) => {}
    Err(e) => {
      let mut cmd = Cli::command();

      cmd.error(ErrorKind::InvalidValue, e).exit();
    }
  }
}
