//! Binary entry point: parse arguments, dispatch, map errors to exit codes.
//!
//! Exit codes: 0 on success, 1 on user error (bad options or input), 2 on
//! any internal or environmental failure.

use anyhow::Context;
use clap::Parser;

use gambit::cli::{self, Cli};
use gambit::GambitError;

fn try_main(cli: Cli) -> anyhow::Result<()> {
    cli::run(cli).context("command failed")
}

fn main() {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version output are not errors.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    if let Err(err) = try_main(cli) {
        let user_error = err
            .downcast_ref::<GambitError>()
            .is_some_and(GambitError::is_user_error);

        if cfg!(debug_assertions) {
            eprintln!("{err:?}");
        } else {
            eprintln!("{err:#}");
        }
        std::process::exit(if user_error { 1 } else { 2 });
    }
}
