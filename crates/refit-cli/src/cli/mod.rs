mod commands;

use clap::Parser;
use refit_core::domain::RefitError;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let refit_error = error.as_refit_error();
            eprintln!("{}", refit_error.diagnostic_line());
            refit_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("refit-signals".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "refit-signals",
    version,
    about = "Noise-weighted refit of wire and APD signal energies"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Refit every event of an event file and write a JSON report
    Run(commands::RunArgs),
    /// Load and validate a configuration and the artifacts it names
    CheckConfig(commands::CheckConfigArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Run(args) => commands::run_refit_command(args),
        CliCommand::CheckConfig(args) => commands::run_check_config_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(RefitError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_refit_error(&self) -> RefitError {
        match self {
            Self::Usage(message) => RefitError::configuration("CONFIG.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => RefitError::configuration("CONFIG.CLI_IO", format!("{error:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CliError, run};
    use refit_core::domain::RefitErrorCategory;

    #[test]
    fn help_and_version_exit_cleanly() {
        assert_eq!(run(["--help"]).expect("help"), 0);
        assert_eq!(run(["--version"]).expect("version"), 0);
    }

    #[test]
    fn unknown_subcommand_is_a_usage_error() {
        let error = run(["refit-everything"]).expect_err("unknown subcommand");
        assert!(matches!(error, CliError::Usage(_)));
        let refit_error = error.as_refit_error();
        assert_eq!(refit_error.category(), RefitErrorCategory::Configuration);
        assert_eq!(refit_error.placeholder(), "CONFIG.CLI_USAGE");
        assert_eq!(refit_error.exit_code(), 2);
    }

    #[test]
    fn unknown_backend_is_rejected_by_the_parser() {
        let error = run([
            "run",
            "--config",
            "c.json",
            "--conditions",
            "d.json",
            "--wire-response",
            "w.json",
            "--events",
            "e.json",
            "--backend",
            "blas",
        ])
        .expect_err("bad backend");
        assert!(matches!(error, CliError::Usage(_)));
    }
}
