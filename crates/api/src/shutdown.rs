//! Shutdown signal handling shared by the binaries.

use tokio::signal;
use tokio::task::JoinHandle;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Waits for a background task to finish after shutdown was requested.
///
/// Returns false, after logging why, if the task panicked or was cancelled.
pub async fn join_task(name: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(err) if err.is_panic() => {
            tracing::error!(task = name, error = %err, "background task panicked");
            false
        }
        Err(err) => {
            tracing::error!(task = name, error = %err, "background task was cancelled");
            false
        }
    }
}
