//! Tunnel transport boundary and traffic monitoring.
//!
//! The helper does not move packets itself. A [`TunnelTransport`] owns the
//! device I/O and reports byte counts as [`TrafficEvent`]s; a
//! [`TunnelMonitor`] thread drains those events into the session's
//! [`StatsCounter`] and reports when the transport goes away on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::constants;
use crate::core::StatsCounter;
use crate::error::TunnelError;

/// Byte-count events produced by a running tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficEvent {
    /// Bytes read from the device and sent to the server.
    Sent(u64),
    /// Bytes received from the server and written to the device.
    Received(u64),
    /// The transport stopped on its own.
    Closed(String),
}

/// Parameters of the session a tunnel is started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub generation: u64,
    pub assigned_vip: String,
    pub server_vip: String,
    pub server_addr: String,
}

/// Packet transport collaborator.
pub trait TunnelTransport: Send + Sync {
    /// Brings the tunnel up and returns its traffic event stream.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Start`] if the tunnel cannot be brought up,
    /// including when a newer session already owns it.
    fn start(&self, session: &SessionInfo) -> Result<Receiver<TrafficEvent>, TunnelError>;

    /// Tears down the tunnel of session `generation`. A tunnel that belongs
    /// to another session is left running. Must be idempotent.
    fn stop(&self, generation: u64);
}

/// Running drain thread for one session's traffic events.
pub struct TunnelMonitor {
    generation: u64,
    stop: Arc<AtomicBool>,
    transport: Arc<dyn TunnelTransport>,
    handle: Option<JoinHandle<()>>,
}

impl TunnelMonitor {
    /// Spawns the drain thread.
    ///
    /// `on_closed` runs on the monitor thread if the event stream ends
    /// without [`TunnelMonitor::stop`] having been called.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Io`] if the thread cannot be spawned.
    pub fn spawn(
        generation: u64,
        events: Receiver<TrafficEvent>,
        stats: Arc<StatsCounter>,
        transport: Arc<dyn TunnelTransport>,
        on_closed: impl FnOnce(String) + Send + 'static,
    ) -> Result<Self, TunnelError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name(format!("tunnel-monitor-{generation}"))
            .spawn(move || {
                let reason = drain(&events, &stats, &flag);
                if let Some(reason) = reason {
                    tracing::warn!(generation, %reason, "tunnel closed unexpectedly");
                    on_closed(reason);
                }
            })?;

        Ok(Self {
            generation,
            stop,
            transport,
            handle: Some(handle),
        })
    }

    /// Generation of the session this monitor belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stops the transport and waits for the drain thread to finish.
    pub fn stop(mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!(generation = self.generation, "tunnel monitor panicked");
            }
        }
    }

    fn signal(&mut self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            self.transport.stop(self.generation);
        }
    }
}

impl Drop for TunnelMonitor {
    fn drop(&mut self) {
        self.signal();
    }
}

/// Drains events until stopped. Returns the close reason if the stream ended
/// on its own.
fn drain(events: &Receiver<TrafficEvent>, stats: &StatsCounter, stop: &AtomicBool) -> Option<String> {
    loop {
        if stop.load(Ordering::Acquire) {
            return None;
        }
        match events.recv_timeout(constants::TUNNEL_POLL_INTERVAL) {
            Ok(TrafficEvent::Sent(n)) => {
                stats.add_sent(n);
            }
            Ok(TrafficEvent::Received(n)) => {
                stats.add_recv(n);
            }
            Ok(TrafficEvent::Closed(reason)) => {
                return (!stop.load(Ordering::Acquire)).then_some(reason);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return (!stop.load(Ordering::Acquire))
                    .then(|| constants::MSG_TUNNEL_CLOSED.to_string());
            }
        }
    }
}

/// Sender of the running session, tagged with its generation.
type LiveSender = Arc<Mutex<Option<(u64, Sender<TrafficEvent>)>>>;

/// In-process transport for embedders that own the device I/O themselves.
///
/// The paired [`TrafficFeed`] pushes byte counts into whichever session is
/// currently running.
#[derive(Debug, Default)]
pub struct ChannelTunnel {
    live: LiveSender,
}

/// Producer side of a [`ChannelTunnel`].
#[derive(Debug, Clone)]
pub struct TrafficFeed {
    live: LiveSender,
}

impl ChannelTunnel {
    pub fn new() -> (Self, TrafficFeed) {
        let live = LiveSender::default();
        let feed = TrafficFeed {
            live: Arc::clone(&live),
        };
        (Self { live }, feed)
    }
}

impl TunnelTransport for ChannelTunnel {
    fn start(&self, session: &SessionInfo) -> Result<Receiver<TrafficEvent>, TunnelError> {
        let mut live = self.live.lock();
        if let Some((owner, _)) = live.as_ref().filter(|(owner, _)| *owner > session.generation) {
            return Err(TunnelError::Start(format!(
                "tunnel is owned by newer session {owner}"
            )));
        }
        let (tx, rx) = mpsc::channel();
        *live = Some((session.generation, tx));
        tracing::debug!(
            generation = session.generation,
            assigned_vip = %session.assigned_vip,
            "channel tunnel started"
        );
        Ok(rx)
    }

    fn stop(&self, generation: u64) {
        let mut live = self.live.lock();
        if live.as_ref().is_some_and(|(owner, _)| *owner == generation) {
            live.take();
        }
    }
}

impl TrafficFeed {
    fn send(&self, event: TrafficEvent) -> bool {
        self.live
            .lock()
            .as_ref()
            .is_some_and(|(_, tx)| tx.send(event).is_ok())
    }

    /// Reports bytes sent. Returns `false` if no tunnel is running.
    pub fn sent(&self, n: u64) -> bool {
        self.send(TrafficEvent::Sent(n))
    }

    /// Reports bytes received. Returns `false` if no tunnel is running.
    pub fn received(&self, n: u64) -> bool {
        self.send(TrafficEvent::Received(n))
    }

    /// Ends the running tunnel as if the device went away.
    pub fn close(&self, reason: impl Into<String>) -> bool {
        let sent = self.send(TrafficEvent::Closed(reason.into()));
        self.live.lock().take();
        sent
    }

    /// True while a tunnel is running.
    pub fn is_live(&self) -> bool {
        self.live.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn session() -> SessionInfo {
        session_for(1)
    }

    fn session_for(generation: u64) -> SessionInfo {
        SessionInfo {
            generation,
            assigned_vip: "10.0.0.42".into(),
            server_vip: "10.0.0.1".into(),
            server_addr: "vpn.example:443".into(),
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_feed_without_tunnel_is_rejected() {
        let (_tunnel, feed) = ChannelTunnel::new();
        assert!(!feed.is_live());
        assert!(!feed.sent(10));
    }

    #[test]
    fn test_monitor_drains_into_stats() {
        let (tunnel, feed) = ChannelTunnel::new();
        let tunnel: Arc<dyn TunnelTransport> = Arc::new(tunnel);
        let stats = Arc::new(StatsCounter::new());
        stats.begin(Instant::now());

        let events = tunnel.start(&session()).unwrap();
        let monitor =
            TunnelMonitor::spawn(1, events, Arc::clone(&stats), Arc::clone(&tunnel), |_| {}).unwrap();

        assert!(feed.sent(1200));
        assert!(feed.received(300));
        assert!(wait_until(|| {
            let snap = stats.snapshot();
            snap.bytes_sent == 1200 && snap.bytes_recv == 300
        }));

        monitor.stop();
        assert!(!feed.is_live());
    }

    #[test]
    fn test_unexpected_close_invokes_callback() {
        let (tunnel, feed) = ChannelTunnel::new();
        let tunnel: Arc<dyn TunnelTransport> = Arc::new(tunnel);
        let stats = Arc::new(StatsCounter::new());
        let (tx, rx) = mpsc::channel();

        let events = tunnel.start(&session()).unwrap();
        let monitor = TunnelMonitor::spawn(7, events, stats, tunnel, move |reason| {
            let _ = tx.send(reason);
        })
        .unwrap();
        assert_eq!(monitor.generation(), 7);

        feed.close("device removed");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "device removed"
        );
        monitor.stop();
    }

    #[test]
    fn test_stop_does_not_report_close() {
        let (tunnel, _feed) = ChannelTunnel::new();
        let tunnel: Arc<dyn TunnelTransport> = Arc::new(tunnel);
        let stats = Arc::new(StatsCounter::new());
        let (tx, rx) = mpsc::channel::<String>();

        let events = tunnel.start(&session()).unwrap();
        let monitor = TunnelMonitor::spawn(1, events, stats, tunnel, move |reason| {
            let _ = tx.send(reason);
        })
        .unwrap();
        monitor.stop();

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_older_session_cannot_take_over_tunnel() {
        let (tunnel, feed) = ChannelTunnel::new();
        let current = tunnel.start(&session_for(3)).unwrap();

        let err = tunnel.start(&session_for(1)).unwrap_err();
        assert!(matches!(err, TunnelError::Start(_)));

        assert!(feed.sent(64));
        assert_eq!(current.try_recv(), Ok(TrafficEvent::Sent(64)));
    }

    #[test]
    fn test_stop_only_ends_its_own_session() {
        let (tunnel, feed) = ChannelTunnel::new();
        let _events = tunnel.start(&session_for(3)).unwrap();

        tunnel.stop(1);
        assert!(feed.is_live());

        tunnel.stop(3);
        assert!(!feed.is_live());
        tunnel.stop(3);
    }
}
