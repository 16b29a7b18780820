//! The edge agent: owns the pins, the debounce state, and the bridge
//! session.
//!
//! Two tasks share one [`MotionMonitor`]:
//!
//! - The motion watcher consumes debounced rising edges. A fresh
//!   activation drives the light high, the indicator low, and queues a
//!   motion-on event; repeat edges only refresh the window.
//! - The session loop ticks once per period. Each tick runs the decay
//!   check (the only path that deactivates), then sends a poll tick and
//!   waits for exactly one reply. Motion events keep flowing while the
//!   reply is pending.
//!
//! Every exit path, clean or failed, lowers both outputs and releases the
//! pin driver.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lumo_core::{DecayDecision, EdgeDecision, Event, MotionMonitor, PollReply};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::EdgeConfig;
use crate::error::{EdgeError, SessionError};
use crate::pins::{PinDriver, PinError, PinLevel, RisingEdge};

/// Motion events queued between the watcher and the session loop.
const EVENT_QUEUE_DEPTH: usize = 16;

/// How a session ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The bridge answered a poll tick with a terminate reply.
    Terminated,
    /// The cancellation token fired.
    Cancelled,
}

pub struct EdgeAgent<P: PinDriver + 'static> {
    cfg: EdgeConfig,
    pins: Arc<P>,
    cancel: CancellationToken,
}

impl<P: PinDriver + 'static> EdgeAgent<P> {
    pub fn new(cfg: EdgeConfig, pins: P) -> Self {
        Self::with_cancel(cfg, pins, CancellationToken::new())
    }

    pub fn with_cancel(cfg: EdgeConfig, pins: P, cancel: CancellationToken) -> Self {
        Self {
            cfg,
            pins: Arc::new(pins),
            cancel,
        }
    }

    /// Run the agent to completion: configure pins, connect to the bridge,
    /// exchange events and poll ticks until the bridge terminates the
    /// session, the token is cancelled, or the session fails.
    pub async fn run(self) -> Result<SessionEnd, EdgeError> {
        let edge_rx = match self.setup_pins().await {
            Ok(rx) => rx,
            Err(e) => {
                self.teardown().await;
                return Err(EdgeError::Pin(e));
            }
        };
        let result = self.drive_session(edge_rx).await;
        self.teardown().await;
        Ok(result?)
    }

    /// Run a pin operation on the blocking pool.
    async fn run_pins<T, F>(&self, f: F) -> Result<T, PinError>
    where
        F: FnOnce(&P) -> Result<T, PinError> + Send + 'static,
        T: Send + 'static,
    {
        let pins = Arc::clone(&self.pins);
        tokio::task::spawn_blocking(move || f(&*pins))
            .await
            .map_err(|e| PinError::Io(io::Error::other(e)))?
    }

    /// Configure both outputs (driven low), the motion input, and the edge
    /// subscription. Any failure here is fatal.
    async fn setup_pins(&self) -> Result<mpsc::Receiver<RisingEdge>, PinError> {
        let cfg = self.cfg.clone();
        let rx = self
            .run_pins(move |p| {
                p.configure_output(cfg.light_pin)?;
                p.configure_output(cfg.indicator_pin)?;
                p.configure_input(cfg.motion_pin, Duration::from_millis(cfg.debounce_window_ms))?;
                p.subscribe_rising_edges(cfg.motion_pin)
            })
            .await?;
        tracing::info!(
            light = self.cfg.light_pin,
            indicator = self.cfg.indicator_pin,
            motion = self.cfg.motion_pin,
            "pins configured"
        );
        Ok(rx)
    }

    async fn drive_session(
        &self,
        edge_rx: mpsc::Receiver<RisingEdge>,
    ) -> Result<SessionEnd, SessionError> {
        let addr = self.cfg.addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| SessionError::Connect {
                addr: addr.clone(),
                source,
            })?;
        tracing::info!(%addr, "connected to bridge");
        let (reader, writer) = stream.into_split();

        let epoch = Instant::now();
        let monitor = Arc::new(Mutex::new(MotionMonitor::new(self.cfg.debounce_window_ms)));
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        // The watcher stops with the session, before pins are torn down.
        let session_cancel = self.cancel.child_token();
        let watcher = tokio::spawn(watch_motion(
            Arc::clone(&self.pins),
            self.cfg.clone(),
            Arc::clone(&monitor),
            edge_rx,
            event_tx,
            epoch,
            session_cancel.clone(),
        ));

        let end = self
            .poll_loop(reader, writer, &monitor, event_rx, epoch, &session_cancel)
            .await;

        session_cancel.cancel();
        if let Err(e) = watcher.await {
            tracing::warn!(error = %e, "motion watcher task failed");
        }
        end
    }

    /// The session loop: forward queued motion events immediately, and on
    /// every tick run the decay check, send a poll tick, and wait for the
    /// bridge's reply.
    async fn poll_loop(
        &self,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        monitor: &Mutex<MotionMonitor>,
        mut events: mpsc::Receiver<Event>,
        epoch: Instant,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, SessionError> {
        let period = Duration::from_millis(self.cfg.tick_period_ms);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("session cancelled");
                    return Ok(SessionEnd::Cancelled);
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(SessionError::EventChannelClosed);
                    };
                    send_event(&mut writer, event).await?;
                }
                _ = ticker.tick() => {
                    self.decay_check(monitor, &mut writer, epoch).await?;
                    send_event(&mut writer, Event::PollTick).await?;
                    match self.await_reply(&mut reader, &mut writer, &mut events, cancel).await? {
                        Some(PollReply::Continue) => {}
                        Some(PollReply::Terminate) => {
                            tracing::info!("bridge requested termination");
                            return Ok(SessionEnd::Terminated);
                        }
                        None => return Ok(SessionEnd::Cancelled),
                    }
                }
            }
        }
    }

    /// Tick-path decay. Deactivation lowers the light, raises the idle
    /// indicator, and notifies the bridge; edges never deactivate.
    async fn decay_check(
        &self,
        monitor: &Mutex<MotionMonitor>,
        writer: &mut OwnedWriteHalf,
        epoch: Instant,
    ) -> Result<(), SessionError> {
        let now_ms = epoch.elapsed().as_millis() as u64;
        let decision = {
            let mut mon = monitor.lock().await;
            if mon.is_active() {
                mon.check_decay(now_ms)
            } else {
                DecayDecision::Idle
            }
        };
        if decision == DecayDecision::Deactivated {
            tracing::info!("no motion inside the window, light off");
            drive_outputs(
                &self.pins,
                [
                    (self.cfg.light_pin, PinLevel::Low),
                    (self.cfg.indicator_pin, PinLevel::High),
                ],
            )
            .await;
            send_event(writer, Event::MotionOff).await?;
        }
        Ok(())
    }

    /// Wait for the reply to a poll tick, forwarding motion events that
    /// arrive in the meantime. Returns `None` if cancelled mid-wait.
    async fn await_reply(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        events: &mut mpsc::Receiver<Event>,
        cancel: &CancellationToken,
    ) -> Result<Option<PollReply>, SessionError> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.cfg.reply_timeout_ms);
        loop {
            tokio::select! {
                read = tokio::time::timeout_at(deadline, reader.read_u8()) => {
                    let byte = match read {
                        Ok(result) => result?,
                        Err(_) => {
                            return Err(SessionError::ReplyTimeout {
                                timeout_ms: self.cfg.reply_timeout_ms,
                            });
                        }
                    };
                    let reply = PollReply::try_from(byte)?;
                    tracing::debug!(reply = %reply, "poll reply");
                    return Ok(Some(reply));
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(SessionError::EventChannelClosed);
                    };
                    send_event(writer, event).await?;
                }
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    /// Outputs to the safe state, then release the driver. Failures are
    /// logged; teardown always runs to the end.
    async fn teardown(&self) {
        let cfg = self.cfg.clone();
        let result = self
            .run_pins(move |p| {
                let mut first_err = None;
                for pin in [cfg.light_pin, cfg.indicator_pin] {
                    match p.set_output(pin, PinLevel::Low) {
                        // A pin that never got configured has no state to safe.
                        Ok(()) | Err(PinError::NotConfigured(_)) => {}
                        Err(e) => {
                            first_err.get_or_insert(e);
                        }
                    }
                }
                if let Err(e) = p.release() {
                    first_err.get_or_insert(e);
                }
                match first_err {
                    None => Ok(()),
                    Some(e) => Err(e),
                }
            })
            .await;
        match result {
            Ok(()) => tracing::info!("pins safed and released"),
            Err(e) => tracing::warn!(error = %e, "pin teardown incomplete"),
        }
    }
}

/// Forward debounced rising edges into the shared monitor. A fresh
/// activation drives the outputs and queues a motion-on event for the
/// session loop; repeat edges only refresh the window.
async fn watch_motion<P: PinDriver + 'static>(
    pins: Arc<P>,
    cfg: EdgeConfig,
    monitor: Arc<Mutex<MotionMonitor>>,
    mut edges: mpsc::Receiver<RisingEdge>,
    events: mpsc::Sender<Event>,
    epoch: Instant,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            edge = edges.recv() => {
                let Some(edge) = edge else {
                    tracing::debug!("edge subscription closed");
                    break;
                };
                let now_ms = epoch.elapsed().as_millis() as u64;
                let decision = monitor.lock().await.record_edge(now_ms);
                match decision {
                    EdgeDecision::Activated => {
                        tracing::info!(pin = edge.pin, "motion detected, light on");
                        drive_outputs(
                            &pins,
                            [
                                (cfg.light_pin, PinLevel::High),
                                (cfg.indicator_pin, PinLevel::Low),
                            ],
                        )
                        .await;
                        if events.send(Event::MotionOn).await.is_err() {
                            break;
                        }
                    }
                    EdgeDecision::Refreshed => {
                        tracing::debug!(pin = edge.pin, "motion refreshed");
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Pin writes on the activity path never kill the session; failures are
/// logged and the exchange carries on.
async fn drive_outputs<P: PinDriver + 'static>(pins: &Arc<P>, writes: [(u8, PinLevel); 2]) {
    let pins = Arc::clone(pins);
    let result = tokio::task::spawn_blocking(move || {
        for (pin, level) in writes {
            pins.set_output(pin, level)?;
        }
        Ok::<_, PinError>(())
    })
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "output pin write failed"),
        Err(e) => tracing::warn!(error = %e, "output pin task failed"),
    }
}

/// Write one event byte and flush.
async fn send_event(writer: &mut OwnedWriteHalf, event: Event) -> Result<(), SessionError> {
    writer.write_u8(event.as_byte()).await?;
    writer.flush().await?;
    tracing::debug!(event = %event, "event sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimPins, SimPinsHandle};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn test_cfg(port: u16) -> EdgeConfig {
        EdgeConfig {
            port,
            debounce_window_ms: 200,
            tick_period_ms: 50,
            reply_timeout_ms: 1_000,
            ..EdgeConfig::default()
        }
    }

    async fn bind() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        (listener, port)
    }

    fn spawn_agent(
        cfg: EdgeConfig,
    ) -> (
        SimPinsHandle,
        CancellationToken,
        JoinHandle<Result<SessionEnd, EdgeError>>,
    ) {
        let pins = SimPins::new();
        let handle = pins.handle();
        let cancel = CancellationToken::new();
        let agent = EdgeAgent::with_cancel(cfg, pins, cancel.clone());
        (handle, cancel, tokio::spawn(agent.run()))
    }

    /// Read bytes off the bridge side of the socket, answering every poll
    /// tick with a continue reply, until `wanted` shows up.
    async fn read_until(stream: &mut TcpStream, wanted: u8) -> Vec<u8> {
        let mut seen = Vec::new();
        loop {
            let b = stream.read_u8().await.expect("read event");
            seen.push(b);
            if b == wanted {
                return seen;
            }
            if b == b'2' {
                stream.write_u8(b'0').await.expect("write continue");
            }
        }
    }

    /// Reply terminate to the next poll tick and join the agent.
    async fn terminate(
        stream: &mut TcpStream,
        agent: JoinHandle<Result<SessionEnd, EdgeError>>,
    ) -> SessionEnd {
        read_until(stream, b'2').await;
        stream.write_u8(b'2').await.expect("write terminate");
        agent.await.expect("join agent").expect("agent run")
    }

    // ── 1. session lifecycle ──────────────────────────────────────────────

    #[tokio::test]
    async fn terminate_reply_ends_session_cleanly() {
        let (listener, port) = bind().await;
        let (handle, _cancel, agent) = spawn_agent(test_cfg(port));
        let (mut stream, _) = listener.accept().await.expect("accept");

        let end = tokio::time::timeout(TEST_TIMEOUT, async {
            let first = stream.read_u8().await.expect("first event");
            assert_eq!(first, b'2', "quiet agent leads with a poll tick");
            stream.write_u8(b'2').await.expect("write terminate");
            agent.await.expect("join agent").expect("agent run")
        })
        .await
        .expect("test timed out");

        assert_eq!(end, SessionEnd::Terminated);
        assert!(handle.is_released());
        assert_eq!(handle.output_level(7), Some(PinLevel::Low));
        assert_eq!(handle.output_level(12), Some(PinLevel::Low));
    }

    #[tokio::test]
    async fn cancellation_tears_the_session_down() {
        let (listener, port) = bind().await;
        let (handle, cancel, agent) = spawn_agent(test_cfg(port));
        let (_stream, _) = listener.accept().await.expect("accept");

        cancel.cancel();
        let end = tokio::time::timeout(TEST_TIMEOUT, agent)
            .await
            .expect("test timed out")
            .expect("join agent")
            .expect("agent run");

        assert_eq!(end, SessionEnd::Cancelled);
        assert!(handle.is_released());
        assert_eq!(handle.output_level(7), Some(PinLevel::Low));
    }

    #[tokio::test]
    async fn connect_failure_is_fatal_and_releases_pins() {
        let (listener, port) = bind().await;
        drop(listener);

        let (handle, _cancel, agent) = spawn_agent(test_cfg(port));
        let err = tokio::time::timeout(TEST_TIMEOUT, agent)
            .await
            .expect("test timed out")
            .expect("join agent")
            .expect_err("connect should fail");

        assert!(matches!(
            err,
            EdgeError::Session(SessionError::Connect { .. })
        ));
        assert!(handle.is_released());
    }

    #[tokio::test]
    async fn released_driver_fails_setup() {
        let pins = SimPins::new();
        let handle = pins.handle();
        pins.release().expect("pre-release");

        let agent = EdgeAgent::new(test_cfg(1), pins);
        let err = agent.run().await.expect_err("setup should fail");
        assert!(matches!(err, EdgeError::Pin(PinError::Released)));
        assert!(handle.is_released());
    }

    // ── 2. motion and decay ───────────────────────────────────────────────

    #[tokio::test]
    async fn motion_drives_light_and_sends_motion_on() {
        let (listener, port) = bind().await;
        let (handle, _cancel, agent) = spawn_agent(test_cfg(port));
        let (mut stream, _) = listener.accept().await.expect("accept");

        handle.pulse(11).expect("pulse motion");

        tokio::time::timeout(TEST_TIMEOUT, async {
            read_until(&mut stream, b'1').await;

            assert_eq!(handle.output_level(7), Some(PinLevel::High));
            assert_eq!(handle.output_level(12), Some(PinLevel::Low));

            let end = terminate(&mut stream, agent).await;
            assert_eq!(end, SessionEnd::Terminated);
        })
        .await
        .expect("test timed out");
    }

    #[tokio::test]
    async fn quiet_window_lowers_light_and_sends_motion_off() {
        let (listener, port) = bind().await;
        let (handle, _cancel, agent) = spawn_agent(test_cfg(port));
        let (mut stream, _) = listener.accept().await.expect("accept");

        handle.pulse(11).expect("pulse motion");

        tokio::time::timeout(TEST_TIMEOUT, async {
            read_until(&mut stream, b'1').await;
            read_until(&mut stream, b'0').await;

            // Decay lowered the light and raised the idle indicator.
            assert_eq!(handle.output_level(7), Some(PinLevel::Low));
            assert_eq!(handle.output_level(12), Some(PinLevel::High));

            let end = terminate(&mut stream, agent).await;
            assert_eq!(end, SessionEnd::Terminated);
        })
        .await
        .expect("test timed out");

        assert_eq!(handle.output_level(12), Some(PinLevel::Low));
    }

    #[tokio::test]
    async fn motion_event_flows_while_reply_is_pending() {
        let (listener, port) = bind().await;
        let cfg = EdgeConfig {
            reply_timeout_ms: 2_000,
            ..test_cfg(port)
        };
        let (handle, _cancel, agent) = spawn_agent(cfg);
        let (mut stream, _) = listener.accept().await.expect("accept");

        tokio::time::timeout(TEST_TIMEOUT, async {
            // Hold the tick reply back and inject motion in the meantime.
            let first = stream.read_u8().await.expect("first event");
            assert_eq!(first, b'2');
            handle.pulse(11).expect("pulse motion");

            let interleaved = stream.read_u8().await.expect("interleaved event");
            assert_eq!(interleaved, b'1', "motion must not wait for the reply");

            stream.write_u8(b'0').await.expect("late continue");
            let end = terminate(&mut stream, agent).await;
            assert_eq!(end, SessionEnd::Terminated);
        })
        .await
        .expect("test timed out");
    }

    // ── 3. session failures ───────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_reply_byte_fails_the_session() {
        let (listener, port) = bind().await;
        let (handle, _cancel, agent) = spawn_agent(test_cfg(port));
        let (mut stream, _) = listener.accept().await.expect("accept");

        let err = tokio::time::timeout(TEST_TIMEOUT, async {
            read_until(&mut stream, b'2').await;
            stream.write_u8(b'9').await.expect("write garbage");
            agent
                .await
                .expect("join agent")
                .expect_err("garbage reply should fail")
        })
        .await
        .expect("test timed out");

        assert!(matches!(
            err,
            EdgeError::Session(SessionError::Protocol(_))
        ));
        assert!(handle.is_released());
        assert_eq!(handle.output_level(7), Some(PinLevel::Low));
    }

    #[tokio::test]
    async fn missing_reply_times_the_session_out() {
        let (listener, port) = bind().await;
        let cfg = EdgeConfig {
            reply_timeout_ms: 100,
            ..test_cfg(port)
        };
        let (handle, _cancel, agent) = spawn_agent(cfg);
        let (mut stream, _) = listener.accept().await.expect("accept");

        let err = tokio::time::timeout(TEST_TIMEOUT, async {
            read_until(&mut stream, b'2').await;
            // Never reply.
            agent
                .await
                .expect("join agent")
                .expect_err("silence should time out")
        })
        .await
        .expect("test timed out");

        assert!(matches!(
            err,
            EdgeError::Session(SessionError::ReplyTimeout { timeout_ms: 100 })
        ));
        assert!(handle.is_released());
    }

    #[tokio::test]
    async fn bridge_disconnect_fails_the_session() {
        let (listener, port) = bind().await;
        let (handle, _cancel, agent) = spawn_agent(test_cfg(port));
        let (stream, _) = listener.accept().await.expect("accept");
        drop(stream);

        let err = tokio::time::timeout(TEST_TIMEOUT, agent)
            .await
            .expect("test timed out")
            .expect("join agent")
            .expect_err("dead peer should fail the session");

        assert!(matches!(
            err,
            EdgeError::Session(SessionError::Transport(_))
        ));
        assert!(handle.is_released());
        assert_eq!(handle.output_level(7), Some(PinLevel::Low));
    }

    // ── 4. full cycle against the real bridge ─────────────────────────────

    #[tokio::test]
    async fn full_cycle_against_real_bridge() {
        use lumo_bridge::{BridgeConfig, BridgeEnd, BridgeServer, MemoryCloud};

        let cloud = MemoryCloud::new();
        let server = BridgeServer::new(
            BridgeConfig {
                port: 0,
                ..BridgeConfig::default()
            },
            cloud.clone(),
        );
        let (listener, addr) = server.bind().await.expect("bind bridge");
        let bridge = tokio::spawn(server.serve(listener));

        let (handle, _cancel, agent) = spawn_agent(test_cfg(addr.port()));

        tokio::time::timeout(TEST_TIMEOUT, async {
            // The agent brings its pins up asynchronously; keep pulsing
            // until an edge lands and the bridge publishes it.
            wait_for("light on in the cloud", || {
                let _ = handle.pulse(11);
                cloud.latest("led_status").as_deref() == Some("on")
            })
            .await;
            assert_eq!(handle.output_level(7), Some(PinLevel::High));

            wait_for("light off in the cloud", || {
                cloud.latest("led_status").as_deref() == Some("off")
            })
            .await;
            assert_eq!(handle.output_level(7), Some(PinLevel::Low));
            assert_eq!(handle.output_level(12), Some(PinLevel::High));

            // Flip the control channel; the next poll tick should end both sides.
            cloud
                .publish("button_status", "0")
                .expect("flip control channel");

            let end = agent.await.expect("join agent").expect("agent run");
            assert_eq!(end, SessionEnd::Terminated);
            let bridge_end = bridge.await.expect("join bridge").expect("bridge run");
            assert_eq!(bridge_end, BridgeEnd::Terminated);
        })
        .await
        .expect("test timed out");

        assert!(handle.is_released());
        assert_eq!(handle.output_level(7), Some(PinLevel::Low));
        assert_eq!(handle.output_level(12), Some(PinLevel::Low));
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
        while !cond() {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
