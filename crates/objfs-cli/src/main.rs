mod cli;
mod commands;
mod config;
mod dispatch;
mod error;
mod registry;
mod secrets;
mod vars;

use std::{io, process::ExitCode};

use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let args = match dispatch::parse(std::env::args_os()) {
        Ok(args) => args,
        Err(err) => return Ok(ExitCode::from(dispatch::parse_failure(&err, &mut io::stderr()))),
    };
    init_tracing(args.verbose);

    let code = dispatch::run(
        args,
        registry::builtin(),
        &mut io::stdout(),
        &mut io::stderr(),
    )
    .await;
    Ok(ExitCode::from(code))
}

fn init_tracing(verbose: bool) {
    // RUST_LOG wins; otherwise stay quiet unless -v is given.
    let default = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
