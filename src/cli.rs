//! Command-line interface.

use clap::{ArgAction, Parser};
use serde_yaml::Value;
use std::path::PathBuf;

/// Run a declarative test description.
#[derive(Parser, Debug)]
#[command(
    name = "stride",
    version,
    disable_version_flag = true,
    about = "Declarative test-step runner",
    long_about = "Runs the steps of a declarative YAML test description in order, \
                  reporting each step's outcome and an aggregate result."
)]
pub struct Cli {
    /// Test description file
    pub test: PathBuf,

    /// Directory to run the steps in (defaults to the current directory)
    pub directory: Option<PathBuf>,

    /// Select a named step list within the test description
    #[arg(short = 'k', long = "key", value_name = "KEY")]
    pub key: Option<String>,

    /// Parse and flatten the test description without running it
    #[arg(short = 'K', long = "check")]
    pub check: bool,

    /// Set a template variable; TYPE is str, int, or bool (default str)
    #[arg(
        short = 'V',
        long = "variable",
        value_name = "[TYPE:]NAME=VALUE",
        value_parser = parse_variable
    )]
    pub variables: Vec<(String, Value)>,

    /// Set an environment variable for spawned commands
    #[arg(
        short = 'e',
        long = "environment",
        value_name = "NAME=VALUE",
        value_parser = parse_env
    )]
    pub environment: Vec<(String, String)>,

    /// Increase output verbosity (may be repeated)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress ordinary output
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Enable debug output on stderr
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Keep running after a step fails
    #[arg(long = "keep-going")]
    pub keep_going: bool,

    /// Print version
    #[arg(long = "version", action = ArgAction::Version, value_parser = clap::value_parser!(bool))]
    version: Option<bool>,
}

impl Cli {
    /// Effective verbosity level: quiet is 0, normal is 1, each -v adds one.
    pub fn verbosity(&self) -> u32 {
        if self.quiet {
            0
        } else {
            1 + u32::from(self.verbose)
        }
    }
}

/// Parse a `[TYPE:]NAME=VALUE` variable assignment.
fn parse_variable(input: &str) -> Result<(String, Value), String> {
    let (spec, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expecting [TYPE:]NAME=VALUE, got \"{}\"", input))?;

    let (var_type, name) = match spec.split_once(':') {
        Some((var_type, name)) => (var_type, name),
        None => ("str", spec),
    };
    if name.is_empty() {
        return Err(format!("missing variable name in \"{}\"", input));
    }

    let value = match var_type {
        "str" | "string" => Value::String(value.to_string()),
        "int" | "integer" => {
            let n: i64 = value
                .parse()
                .map_err(|_| format!("\"{}\" is not an integer", value))?;
            Value::Number(n.into())
        }
        "bool" | "boolean" => match value {
            "true" | "yes" | "on" | "1" => Value::Bool(true),
            "false" | "no" | "off" | "0" => Value::Bool(false),
            other => return Err(format!("\"{}\" is not a boolean", other)),
        },
        other => return Err(format!("unknown variable type \"{}\"", other)),
    };

    Ok((name.to_string(), value))
}

/// Parse a `NAME=VALUE` environment assignment.
fn parse_env(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((name, value)) if !name.is_empty() => {
            Ok((name.to_string(), value.to_string()))
        }
        _ => Err(format!("expecting NAME=VALUE, got \"{}\"", input)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("stride").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn minimal_invocation() {
        let cli = parse(&["test.yml"]);
        assert_eq!(cli.test, PathBuf::from("test.yml"));
        assert_eq!(cli.directory, None);
        assert!(!cli.check);
        assert_eq!(cli.verbosity(), 1);
    }

    #[test]
    fn directory_and_key() {
        let cli = parse(&["test.yml", "work", "-k", "smoke"]);
        assert_eq!(cli.directory, Some(PathBuf::from("work")));
        assert_eq!(cli.key.as_deref(), Some("smoke"));
    }

    #[test]
    fn verbosity_counts_and_quiet_wins() {
        assert_eq!(parse(&["t.yml", "-vv"]).verbosity(), 3);
        assert_eq!(parse(&["t.yml", "-q", "-v"]).verbosity(), 0);
    }

    #[test]
    fn untyped_variable_is_a_string() {
        let cli = parse(&["t.yml", "-V", "x=1"]);
        assert_eq!(cli.variables, vec![("x".into(), Value::String("1".into()))]);
    }

    #[test]
    fn typed_variables() {
        let cli = parse(&["t.yml", "-V", "int:n=3", "-V", "bool:flag=yes"]);
        assert_eq!(cli.variables[0], ("n".into(), Value::Number(3.into())));
        assert_eq!(cli.variables[1], ("flag".into(), Value::Bool(true)));
    }

    #[test]
    fn bad_variable_values_are_rejected() {
        assert!(parse_variable("int:n=three").is_err());
        assert!(parse_variable("bool:f=maybe").is_err());
        assert!(parse_variable("float:f=1.5").is_err());
        assert!(parse_variable("novalue").is_err());
    }

    #[test]
    fn value_may_contain_equals() {
        let (name, value) = parse_variable("x=a=b").unwrap();
        assert_eq!(name, "x");
        assert_eq!(value, Value::String("a=b".into()));
    }

    #[test]
    fn environment_assignments() {
        let cli = parse(&["t.yml", "-e", "PATH=/bin", "-e", "EMPTY="]);
        assert_eq!(cli.environment[0], ("PATH".into(), "/bin".into()));
        assert_eq!(cli.environment[1], ("EMPTY".into(), String::new()));
    }

    #[test]
    fn check_and_keep_going_flags() {
        let cli = parse(&["t.yml", "-K", "--keep-going"]);
        assert!(cli.check);
        assert!(cli.keep_going);
    }
}
