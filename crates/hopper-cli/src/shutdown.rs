use tokio_util::sync::CancellationToken;

/// Cancel the returned token on SIGINT (Ctrl-C) or, on unix, SIGTERM.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => tracing::info!("received SIGINT, shutting down"),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to listen for SIGINT");
                        return;
                    }
                },
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
            tracing::info!("received Ctrl-C, shutting down");
        }

        trigger.cancel();
    });

    token
}
