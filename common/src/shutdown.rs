use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

/// Resolves when the process receives SIGINT (Ctrl+C) or SIGTERM
/// (Kubernetes), returning the signal's name for the shutdown log line.
pub async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
        "Ctrl+C"
    }
}

/// Spawns the signal listener and cancels the token when a signal arrives.
/// Request-scoped child tokens derived from it observe the cancellation too.
pub fn cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        eprintln!("{}", format!("🛑 Received {}", signal).red());
        cancel.cancel();
    });
}
