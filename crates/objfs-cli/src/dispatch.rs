//! Command dispatch and exit codes: 0 on success, 1 when a command fails,
//! 2 when the invocation itself is wrong.

use std::{ffi::OsString, fmt::Write as _, io::Write};

use clap::{error::ErrorKind, CommandFactory, Parser};
use tracing::debug;

use crate::{
    cli::{normalize_legacy_flags, Command, GlobalArgs},
    commands,
    error::{CliError, EXIT_USAGE},
    vars::{Collaborators, Context},
};

/// Parse the process arguments, accepting legacy single-dash global flags.
pub fn parse<I, T>(argv: I) -> Result<GlobalArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    GlobalArgs::try_parse_from(normalize_legacy_flags(argv))
}

/// Report a global flag error (or `--help`) and return the exit code.
pub fn parse_failure(err: &clap::Error, errout: &mut dyn Write) -> u8 {
    let text = match err.kind() {
        ErrorKind::DisplayHelp => global_usage(),
        _ => err.render().to_string(),
    };
    // Nothing sensible is left to do if stderr is gone.
    let _ = errout.write_all(text.as_bytes());
    EXIT_USAGE
}

/// Global usage: flags followed by the command list.
pub fn global_usage() -> String {
    let mut text = GlobalArgs::command().render_help().to_string();
    text.push_str("\nCommands:\n");
    for command in Command::command().get_subcommands() {
        let about = command.get_about().map(ToString::to_string).unwrap_or_default();
        let _ = writeln!(text, "  {:<10}{about}", command.get_name());
    }
    text
}

/// Usage of one command, if it exists.
pub fn command_usage(name: &str) -> Option<String> {
    let mut root = Command::command();
    root.build();
    root.find_subcommand_mut(name)
        .map(|command| command.render_help().to_string())
}

fn is_command(name: &str) -> bool {
    Command::command().find_subcommand(name).is_some()
}

/// Run the command named by the trailing arguments.
pub async fn run(
    args: GlobalArgs,
    collaborators: Collaborators,
    out: &mut dyn Write,
    errout: &mut dyn Write,
) -> u8 {
    let (name, rest) = match args.args.split_first() {
        Some((name, rest)) if is_command(name) => (name.clone(), rest.to_vec()),
        Some((name, rest)) if name == "help" => {
            if rest.is_empty() {
                let _ = errout.write_all(global_usage().as_bytes());
            }
            for usage in rest.iter().filter_map(|name| command_usage(name)) {
                let _ = errout.write_all(usage.as_bytes());
            }
            return EXIT_USAGE;
        }
        other => {
            debug!(command = ?other.map(|(name, _)| name), "no such command");
            let _ = errout.write_all(global_usage().as_bytes());
            return EXIT_USAGE;
        }
    };

    let argv = std::iter::once("objfs".to_string())
        .chain(std::iter::once(name.clone()))
        .chain(rest);
    let command = match Command::try_parse_from(argv) {
        Ok(command) => command,
        Err(err) => {
            let text = match err.kind() {
                ErrorKind::DisplayHelp => command_usage(&name).unwrap_or_default(),
                _ => err.render().to_string(),
            };
            let _ = errout.write_all(text.as_bytes());
            return EXIT_USAGE;
        }
    };

    let ctx = Context::new(args, collaborators);
    match commands::execute(&ctx, command, out).await {
        Ok(()) => 0,
        Err(err) => {
            let code = err.exit_code();
            match &err {
                CliError::Usage(message) => {
                    let _ = errout.write_all(global_usage().as_bytes());
                    let _ = writeln!(errout, "error: {message}");
                }
                CliError::Fatal(report) => {
                    let _ = writeln!(errout, "error: {report:#}");
                }
            }
            code
        }
    }
}
