use tokio::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancels `cancellation_token` on SIGINT or SIGTERM.
pub fn trigger_cancellation_on_signal(
    cancellation_token: CancellationToken,
) -> io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => log::info!("Received termination signal"),
            _ = sigint.recv() => log::info!("Received interrupt signal"),
            _ = cancellation_token.cancelled() => return,
        }
        cancellation_token.cancel();
    }))
}
