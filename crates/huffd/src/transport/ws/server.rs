//! WebSocket server bootstrap and shutdown.

use std::fmt;
use std::future::pending;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::service::JobService;

use super::routes::routes;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Ignore SIGTERM; stop only on SIGINT or `POST /shutdown`.
    pub await_explicit_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            await_explicit_shutdown: false,
        }
    }
}

/// Why the server stopped taking connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Interrupt,
    Terminate,
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Requested => "POST /shutdown",
        })
    }
}

/// Bind `config.host:config.port` and serve until shutdown.
pub async fn serve(config: ServerConfig, service: Arc<JobService>) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    serve_on(listener, service, config.await_explicit_shutdown).await
}

/// Serve on an already bound listener.
///
/// Open sockets are drained before this returns; the worker pool is closed last.
pub async fn serve_on(
    listener: TcpListener,
    service: Arc<JobService>,
    await_explicit_shutdown: bool,
) -> anyhow::Result<()> {
    let shutdown_rx = service.shutdown_rx();
    info!(addr = %listener.local_addr()?, "huffd listening");

    axum::serve(listener, routes(Arc::clone(&service)))
        .with_graceful_shutdown(async move {
            let reason = stop_reason(await_explicit_shutdown, shutdown_rx).await;
            info!(%reason, "Draining connections");
        })
        .await?;

    service.shutdown();
    info!("huffd stopped");
    Ok(())
}

async fn stop_reason(ignore_sigterm: bool, mut shutdown_rx: watch::Receiver<bool>) -> StopReason {
    tokio::select! {
        () = interrupt() => StopReason::Interrupt,
        () = terminate(ignore_sigterm) => StopReason::Terminate,
        () = requested(&mut shutdown_rx) => StopReason::Requested,
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for SIGINT");
        pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate(ignore: bool) {
    use tokio::signal::unix::{SignalKind, signal};

    if ignore {
        info!("Ignoring SIGTERM until SIGINT or POST /shutdown");
        return pending().await;
    }
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM");
            pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate(_ignore: bool) {
    pending().await
}

async fn requested(shutdown_rx: &mut watch::Receiver<bool>) {
    // Sender gone: nobody can ask any more.
    if shutdown_rx.wait_for(|&stop| stop).await.is_err() {
        pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Settings;

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert!(!config.await_explicit_shutdown);
    }

    #[tokio::test]
    async fn shutdown_request_is_the_stop_reason() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(stop_reason(true, rx));

        tx.send(true).unwrap();
        let reason = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, StopReason::Requested);
        assert_eq!(reason.to_string(), "POST /shutdown");
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_never_stops() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_millis(50), requested(&mut rx)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn explicit_shutdown_stops_server_and_closes_pool() {
        let service = Arc::new(JobService::new(&Settings {
            workers: 1,
            ..Settings::default()
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = tokio::spawn(serve_on(listener, Arc::clone(&service), true));

        service.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(service.is_shutting_down());
        assert_eq!(service.health().available_workers, 0);
    }
}
