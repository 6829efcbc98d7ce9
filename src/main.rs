//! Stride CLI entry point.

use std::process::ExitCode;

use clap::{CommandFactory, FromArgMatches};
use stride::cli::Cli;
use stride::context::Context;
use stride::environment::Environment;
use stride::extensions::{ExtensionDebug, ExtensionSet};
use stride::runner::{self, RunOptions};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for logging.
///
/// Log level is controlled by:
/// 1. `--debug` flag sets level to DEBUG
/// 2. `RUST_LOG` environment variable (if set)
/// 3. Default is INFO
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("stride=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stride=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    // Extensions add their own arguments before parsing.
    let cmd = ExtensionSet::prepare(Cli::command());
    let matches = cmd.get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };
    init_tracing(cli.debug);

    tracing::debug!("Stride starting with args: {:?}", cli);

    let environment = match Environment::from_host(cli.directory.as_deref()) {
        Ok(environment) => environment,
        Err(e) => {
            eprintln!("stride: {}", e);
            return ExitCode::from(2);
        }
    };
    let mut ctxt = Context::new(cli.verbosity(), cli.debug, environment);

    for (name, value) in &cli.environment {
        ctxt.environment.set(name, value.clone());
    }
    for (name, value) in &cli.variables {
        ctxt.variables.set(name, value.clone());
    }

    let debug = ExtensionDebug::from_env();
    let mut exts = match ExtensionSet::activate(&mut ctxt, &matches, debug) {
        Ok(exts) => exts,
        Err(e) => {
            eprintln!("stride: {}", e);
            return ExitCode::from(2);
        }
    };

    let options = RunOptions {
        check: cli.check,
        keep_going: cli.keep_going,
    };
    let outcome = runner::execute(&mut ctxt, &mut exts, &cli.test, cli.key.as_deref(), &options);

    if let Some(msg) = outcome.message() {
        eprintln!("stride: {}", msg);
    }
    ExitCode::from(outcome.exit_code())
}
