use anyhow::Result;
use clap::Parser;
use node_manager::utils::logging::setup_logging;
use node_manager::utils::signal::trigger_cancellation_on_signal;
use node_manager::Cli;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level());

    let cancellation_token = CancellationToken::new();
    let signal_handle = trigger_cancellation_on_signal(cancellation_token.clone())?;

    let result = cli.run(cancellation_token.clone()).await;
    if let Err(e) = &result {
        log::error!("Command execution error: {e:#}");
    }

    cancellation_token.cancel();
    let _ = signal_handle.await;
    result
}
