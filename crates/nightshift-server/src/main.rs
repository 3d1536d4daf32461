use clap::Parser;
use nightshift_core::config::{NightshiftConfig, DEFAULT_LOG_FILTER, DEFAULT_OUTPUT_BUFFER};

mod cli;
mod next;
mod run;
mod runner;
mod serve;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // load config before logging so its filter applies; errors surface below
    let serve_config = match &cli.command {
        Some(Commands::Serve { config }) => Some(NightshiftConfig::load(config.as_deref())),
        _ => None,
    };
    let filter = match &serve_config {
        Some(Ok(c)) => c.server.log_filter.clone(),
        _ => DEFAULT_LOG_FILTER.to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Next {
            expression,
            count,
            from,
            json,
        }) => next::run(&expression, count, from.as_deref(), json),
        Some(Commands::Run {
            project,
            timeout_ms,
            workdir,
            success_codes,
            program,
            args,
        }) => {
            let args = run::RunArgs {
                project,
                timeout_ms,
                workdir,
                success_codes,
                program,
                args,
            };
            let status = run::run(args, DEFAULT_OUTPUT_BUFFER).await?;
            if status != 0 {
                std::process::exit(status);
            }
            Ok(())
        }
        Some(Commands::Serve { config }) => {
            let loaded = match serve_config {
                Some(loaded) => loaded,
                None => NightshiftConfig::load(config.as_deref()),
            };
            serve::run(loaded?).await
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
