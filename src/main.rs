use std::convert::Infallible;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use ssh_forward_tunnel::cli::{normalize_args, Cli};
use ssh_forward_tunnel::logging::init_logging;
use ssh_forward_tunnel::listener;
use ssh_forward_tunnel::{SshChannelDialer, SshSessionFactory};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    init_logging(cli.log_level);

    match run(cli).await {
        Ok(never) => match never {},
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Infallible> {
    let key_file = cli.key_file.clone();
    let config = cli
        .into_config()
        .with_context(|| format!("loading credentials from {}", key_file.display()))?;

    info!(
        server = %config.server,
        remote = %config.remote,
        local = %config.local,
        policy = %config.on_connect_error,
        "tunneling through ssh server, exposing remote as local"
    );

    Ok(listener::start(config, SshSessionFactory::default(), SshChannelDialer).await?)
}
