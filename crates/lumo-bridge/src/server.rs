//! Bridge service: one-shot TCP acceptor and the byte reactor.
//!
//! - Primes the cloud channels, then accepts exactly one edge connection.
//! - Each received byte is dispatched on its own: motion-on publishes
//!   `"on"` and motion-off `"off"` to the light channel; a poll tick
//!   fetches the control channel and answers with continue or terminate.
//! - Every poll tick gets exactly one reply, even when the control fetch
//!   fails.
//! - A byte outside the protocol is a violation: log, close, return the
//!   error.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use lumo_core::{Event, PollReply};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cloud::{CloudError, CloudPort, ControlSignal};
use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// How the bridge's one session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// The control channel asked for shutdown; terminate was sent.
    Terminated,
    /// The edge closed the connection.
    Disconnected,
    /// The cancellation token fired.
    Cancelled,
}

pub struct BridgeServer<C: CloudPort + 'static> {
    cfg: BridgeConfig,
    cloud: Arc<C>,
    cancel: CancellationToken,
}

impl<C: CloudPort + 'static> BridgeServer<C> {
    pub fn new(cfg: BridgeConfig, cloud: C) -> Self {
        Self::with_cancel(cfg, cloud, CancellationToken::new())
    }

    pub fn with_cancel(cfg: BridgeConfig, cloud: C, cancel: CancellationToken) -> Self {
        Self {
            cfg,
            cloud: Arc::new(cloud),
            cancel,
        }
    }

    /// Bind the listener. Split out from [`BridgeServer::serve`] so
    /// callers can bind port 0 and learn the real address first.
    pub async fn bind(&self) -> io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.cfg.addr()).await?;
        let addr = listener.local_addr()?;
        Ok((listener, addr))
    }

    /// Bind, accept one edge session, run it to its end.
    pub async fn run(self) -> Result<BridgeEnd, BridgeError> {
        let addr = self.cfg.addr();
        let (listener, local) = self
            .bind()
            .await
            .map_err(|source| BridgeError::Bind { addr, source })?;
        tracing::info!(addr = %local, "bridge listening");
        self.serve(listener).await
    }

    /// Prime the cloud channels, accept exactly one connection, and react
    /// to its bytes until terminate, disconnect, or cancellation.
    pub async fn serve(self, listener: TcpListener) -> Result<BridgeEnd, BridgeError> {
        self.prime_channels().await;

        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = self.cancel.cancelled() => {
                tracing::info!("cancelled before any edge connected");
                return Ok(BridgeEnd::Cancelled);
            }
        };
        // One session per run; the listener closes here.
        drop(listener);
        tracing::info!(%peer, "edge connected");

        self.react(stream).await
    }

    /// The byte reactor.
    async fn react<S>(&self, stream: S) -> Result<BridgeEnd, BridgeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        loop {
            let byte = tokio::select! {
                read = reader.read_u8() => match read {
                    Ok(b) => b,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        tracing::info!("edge disconnected");
                        return Ok(BridgeEnd::Disconnected);
                    }
                    Err(e) => return Err(BridgeError::Transport(e)),
                },
                _ = self.cancel.cancelled() => {
                    tracing::info!("session cancelled");
                    return Ok(BridgeEnd::Cancelled);
                }
            };

            let event = match Event::try_from(byte) {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(error = %e, "protocol violation, closing session");
                    return Err(BridgeError::Protocol(e));
                }
            };
            tracing::debug!(event = %event, "event received");

            match event {
                Event::MotionOn => self.publish_light("on").await,
                Event::MotionOff => self.publish_light("off").await,
                Event::PollTick => {
                    let reply = self.poll_control().await;
                    writer.write_u8(reply.as_byte()).await?;
                    writer.flush().await?;
                    tracing::debug!(reply = %reply, "poll reply sent");
                    if reply == PollReply::Terminate {
                        tracing::info!("control channel requested shutdown");
                        return Ok(BridgeEnd::Terminated);
                    }
                }
            }
        }
    }

    /// Run a cloud operation on the blocking pool.
    async fn run_cloud<T, F>(&self, f: F) -> Result<T, CloudError>
    where
        F: FnOnce(&C) -> Result<T, CloudError> + Send + 'static,
        T: Send + 'static,
    {
        let cloud = Arc::clone(&self.cloud);
        tokio::task::spawn_blocking(move || f(&*cloud))
            .await
            .map_err(|e| CloudError::Io(io::Error::other(e)))?
    }

    /// Seed both channels so the dashboard has state before any event and
    /// the first control fetch cannot miss. Non-fatal: a cloud that is
    /// down at startup only costs the initial values.
    async fn prime_channels(&self) {
        let light = self.cfg.light_channel.clone();
        let control = self.cfg.control_channel.clone();
        let result = self
            .run_cloud(move |c| {
                c.publish(&light, "off")?;
                c.publish(&control, "1")
            })
            .await;
        match result {
            Ok(()) => tracing::info!(
                light = %self.cfg.light_channel,
                control = %self.cfg.control_channel,
                "cloud channels primed"
            ),
            Err(e) => tracing::warn!(error = %e, "channel priming failed"),
        }
    }

    /// Light transitions are published best-effort; a cloud hiccup does
    /// not end the session.
    async fn publish_light(&self, value: &'static str) {
        let channel = self.cfg.light_channel.clone();
        if let Err(e) = self.run_cloud(move |c| c.publish(&channel, value)).await {
            tracing::warn!(error = %e, "light publish failed");
        }
    }

    /// Fetch the control channel. A fetch failure keeps the session
    /// alive: the edge still gets its continue reply.
    async fn poll_control(&self) -> PollReply {
        let channel = self.cfg.control_channel.clone();
        match self.run_cloud(move |c| c.fetch(&channel)).await {
            Ok(raw) => match ControlSignal::from_raw(&raw) {
                ControlSignal::Run => PollReply::Continue,
                ControlSignal::Shutdown => PollReply::Terminate,
            },
            Err(e) => {
                tracing::warn!(error = %e, "control fetch failed, continuing");
                PollReply::Continue
            }
        }
    }
}
