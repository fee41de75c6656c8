use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use sandboxctl::cli::args::{Cli, Commands};
use sandboxctl::cli::commands;
use sandboxctl::config::loader::load_config;
use sandboxctl::config::types::SandboxctlConfig;
use sandboxctl::error::Result;
use sandboxctl::SandboxClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.global_opts.verbose);

    // Load configuration (file + CLI/env overrides)
    let config = load_config(cli.global_opts.config.as_deref())?.with_overrides(
        cli.global_opts.url,
        cli.global_opts.domain,
        cli.global_opts.token,
    );
    let format = cli.global_opts.format;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    // Dispatch to subcommand handler; exec and health report an exit status
    let exit_code = match cli.command {
        Commands::Exec(args) => commands::exec(args, &connect(&config)?, format, &cancel).await?,
        Commands::Start(args) => {
            commands::start(args, &connect(&config)?, format, &cancel).await?;
            0
        }
        Commands::Ps => {
            commands::ps(&connect(&config)?, format, &cancel).await?;
            0
        }
        Commands::Kill(args) => {
            commands::kill(args, &connect(&config)?, format, &cancel).await?;
            0
        }
        Commands::Logs(args) => {
            commands::logs(args, &connect(&config)?, format, &cancel).await?;
            0
        }
        Commands::Fs(args) => {
            commands::fs(args, &connect(&config)?, format, &cancel).await?;
            0
        }
        Commands::Port(args) => {
            commands::port(args, &connect(&config)?, format, &cancel).await?;
            0
        }
        Commands::Health => commands::health(&connect(&config)?, format, &cancel).await?,
        Commands::Config(args) => {
            commands::config(args, config).await?;
            0
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Config commands never connect, so they work without a configured sandbox.
fn connect(config: &SandboxctlConfig) -> Result<SandboxClient> {
    SandboxClient::new(config.client_config()?)
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
