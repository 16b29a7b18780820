//! lumo-bridge binary: the service backed by the in-memory cloud.
//!
//! SIGUSR2 flips the control channel to `"0"`, asking the edge to stop at
//! its next poll tick. SIGINT/SIGTERM cancel the service directly.

use clap::Parser;
use lumo_bridge::{BridgeConfig, BridgeEnd, BridgeServer, MemoryCloud};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "lumo-bridge", about = "Motion-to-light bridge service", version)]
struct Cli {
    /// Host to bind the listener on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 5500)]
    port: u16,
}

fn init_tracing() {
    let filter = std::env::var("LUMO_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = BridgeConfig {
        host: cli.host,
        port: cli.port,
        ..BridgeConfig::default()
    };

    let cloud = MemoryCloud::new();

    #[cfg(unix)]
    spawn_control_flipper(cloud.clone(), cfg.control_channel.clone());

    let cancel = CancellationToken::new();
    let server = BridgeServer::with_cancel(cfg, cloud, cancel.clone());

    tracing::info!("bridge starting");
    let mut run = tokio::spawn(server.run());
    let result = tokio::select! {
        result = &mut run => result,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            cancel.cancel();
            (&mut run).await
        }
    };

    match result?? {
        BridgeEnd::Terminated => tracing::info!("session terminated by control channel"),
        BridgeEnd::Disconnected => tracing::info!("edge disconnected, exiting"),
        BridgeEnd::Cancelled => tracing::info!("bridge stopped"),
    }
    Ok(())
}

/// SIGUSR2 writes `"0"` to the control channel, letting a shell play the
/// dashboard button.
#[cfg(unix)]
fn spawn_control_flipper(cloud: MemoryCloud, channel: String) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut usr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGUSR2 handler");
                return;
            }
        };
        while usr2.recv().await.is_some() {
            match cloud.publish(&channel, "0") {
                Ok(()) => tracing::info!(channel = %channel, "control channel flipped to 0"),
                Err(e) => tracing::warn!(error = %e, "control flip failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
