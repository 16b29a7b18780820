//! lumo-edge binary: the agent wired to the simulated pin driver.
//!
//! SIGUSR1 injects a raw motion edge on the sensor pin, standing in for
//! hardware. SIGINT/SIGTERM shut the agent down through its token so
//! pins are safed and released on the way out.

use clap::Parser;
use lumo_edge::{EdgeAgent, EdgeConfig, SessionEnd, SimPins};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "lumo-edge", about = "Motion-to-light edge agent", version)]
struct Cli {
    /// Bridge host to connect to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bridge TCP port.
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

    let cfg = EdgeConfig {
        host: cli.host,
        port: cli.port,
        ..EdgeConfig::default()
    };

    let pins = SimPins::new();

    #[cfg(unix)]
    spawn_motion_injector(pins.handle(), cfg.motion_pin);

    let cancel = CancellationToken::new();
    let agent = EdgeAgent::with_cancel(cfg, pins, cancel.clone());

    tracing::info!("edge agent starting");
    let mut run = tokio::spawn(agent.run());
    let result = tokio::select! {
        result = &mut run => result,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            cancel.cancel();
            (&mut run).await
        }
    };

    match result?? {
        SessionEnd::Terminated => tracing::info!("bridge ended the session, exiting"),
        SessionEnd::Cancelled => tracing::info!("edge agent stopped"),
    }
    Ok(())
}

/// SIGUSR1 pulses the motion pin, letting a shell play the sensor.
#[cfg(unix)]
fn spawn_motion_injector(handle: lumo_edge::SimPinsHandle, motion_pin: u8) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGUSR1 handler");
                return;
            }
        };
        while usr1.recv().await.is_some() {
            match handle.pulse(motion_pin) {
                Ok(outcome) => tracing::info!(pin = motion_pin, ?outcome, "motion edge injected"),
                Err(e) => tracing::warn!(error = %e, "motion edge injection failed"),
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
