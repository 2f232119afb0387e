//! Session Manager - lifecycle, handshake retries and status access.
//!
//! [`SessionManager`] is the only entry point a controller needs. It
//! coordinates:
//! - the connect lifecycle, driven by a worker thread per attempt
//! - handshake retries with bounded exponential backoff
//! - tunnel start-up and traffic monitoring once a session is established
//! - cancellation of an outstanding attempt on disconnect
//!
//! All methods take `&self` and are safe to call from any thread.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tunlink::session::SessionManager;
//! use tunlink::vpn::{ChannelTunnel, TcpHandshaker};
//!
//! let (tunnel, feed) = ChannelTunnel::new();
//! let manager = SessionManager::new(Arc::new(TcpHandshaker::default()), Arc::new(tunnel));
//!
//! let attempt = manager.connect(InitialConfig::new("vpn.example:443", "abc123"))?;
//! attempt.wait()?;
//! println!("{:?} {:?}", manager.status(), manager.stats());
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants;
use crate::core::{GeoLookup, StatsCounter};
use crate::error::{ConnectError, DisconnectError, HandshakeError, SessionError};
use crate::event::StatusFeed;
use crate::session::cancel::CancelToken;
use crate::session::machine::{SessionStateMachine, Transition};
use crate::session::retry::RetryPolicy;
use crate::state::{InitialConfig, IpInfo, Stats, Status};
use crate::vpn::version::{self, Compatibility};
use crate::vpn::{HandshakeResult, Handshaker, SessionInfo, TunnelMonitor, TunnelTransport};

/// How a connect attempt ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The session is established and the tunnel is running.
    Connected,
    /// A disconnect superseded the attempt.
    Cancelled,
}

/// Handle to the worker driving one connect attempt.
///
/// Dropping it detaches the worker; the attempt continues.
#[derive(Debug)]
pub struct ConnectAttempt {
    generation: u64,
    handle: JoinHandle<Result<ConnectOutcome, SessionError>>,
}

impl ConnectAttempt {
    /// Generation number of this attempt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the attempt to finish.
    ///
    /// # Errors
    ///
    /// The last [`HandshakeError`] once retries are exhausted, a
    /// [`TunnelError`](crate::error::TunnelError) if the tunnel could not be
    /// started, or [`SessionError::WorkerPanicked`].
    pub fn wait(self) -> Result<ConnectOutcome, SessionError> {
        self.handle
            .join()
            .map_err(|_| SessionError::WorkerPanicked)?
    }
}

struct InFlight {
    generation: u64,
    cancel: CancelToken,
}

type InFlightSlot = Arc<Mutex<Option<InFlight>>>;

/// Public façade over the session state machine.
pub struct SessionManager {
    machine: Arc<SessionStateMachine>,
    handshaker: Arc<dyn Handshaker>,
    tunnel: Arc<dyn TunnelTransport>,
    geo: Option<Arc<dyn GeoLookup>>,
    policy: RetryPolicy,
    handshake_timeout: Duration,
    inflight: InFlightSlot,
    last_error: Arc<Mutex<Option<HandshakeError>>>,
}

impl SessionManager {
    /// Creates a manager in the Disconnected state with default retry policy.
    pub fn new(handshaker: Arc<dyn Handshaker>, tunnel: Arc<dyn TunnelTransport>) -> Self {
        Self {
            machine: Arc::new(SessionStateMachine::new(Arc::new(StatsCounter::new()))),
            handshaker,
            tunnel,
            geo: None,
            policy: RetryPolicy::default(),
            handshake_timeout: constants::DEFAULT_HANDSHAKE_TIMEOUT,
            inflight: InFlightSlot::default(),
            last_error: Arc::default(),
        }
    }

    /// Builder method to set the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder method to set the per-attempt handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Builder method to attach a geolocation collaborator.
    #[must_use]
    pub fn with_geo(mut self, geo: Arc<dyn GeoLookup>) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Starts connecting and returns once the state is Connecting.
    ///
    /// The handshake runs on a worker thread; use the returned
    /// [`ConnectAttempt`] to wait for its outcome.
    ///
    /// # Errors
    ///
    /// [`ConnectError::AlreadyConnected`], [`ConnectError::InvalidConfig`], or
    /// [`ConnectError::Spawn`] if the worker cannot be started.
    pub fn connect(&self, config: InitialConfig) -> Result<ConnectAttempt, ConnectError> {
        let generation = self.machine.request_connect(&config)?;
        tracing::info!(generation, server = %config.server, "connect requested");

        let cancel = CancelToken::new();
        let superseded = self.inflight.lock().replace(InFlight {
            generation,
            cancel: cancel.clone(),
        });
        if let Some(old) = superseded {
            old.cancel.cancel();
        }
        // A disconnect that landed before the slot was filled found nothing
        // to cancel; one landing after it will find this attempt.
        if self.machine.generation() != generation {
            tracing::debug!(generation, "attempt superseded before it started");
            cancel.cancel();
        }
        *self.last_error.lock() = None;

        let task = ConnectTask {
            generation,
            config,
            cancel,
            machine: Arc::clone(&self.machine),
            handshaker: Arc::clone(&self.handshaker),
            tunnel: Arc::clone(&self.tunnel),
            policy: self.policy.clone(),
            timeout: self.handshake_timeout,
            inflight: Arc::clone(&self.inflight),
            last_error: Arc::clone(&self.last_error),
        };

        match thread::Builder::new()
            .name(format!("handshake-{generation}"))
            .spawn(move || task.run())
        {
            Ok(handle) => Ok(ConnectAttempt { generation, handle }),
            Err(err) => {
                tracing::error!(generation, error = %err, "failed to spawn handshake worker");
                self.inflight.lock().take();
                if let Err(violation) = self.machine.on_handshake_failure(generation, &err.to_string()) {
                    tracing::warn!(generation, %violation, "could not record spawn failure");
                }
                Err(ConnectError::Spawn(err))
            }
        }
    }

    /// Tears down the session, cancelling an outstanding handshake.
    ///
    /// # Errors
    ///
    /// [`DisconnectError::NotConnected`] unless Connecting or Connected.
    pub fn disconnect(&self) -> Result<(), DisconnectError> {
        tracing::info!("disconnect requested");
        let result = self.machine.request_disconnect();
        self.cancel_superseded();
        result
    }

    fn cancel_superseded(&self) {
        let current = self.machine.generation();
        let stale = {
            let mut inflight = self.inflight.lock();
            if inflight.as_ref().is_some_and(|a| a.generation != current) {
                inflight.take()
            } else {
                None
            }
        };
        if let Some(attempt) = stale {
            tracing::debug!(generation = attempt.generation, "cancelling superseded handshake");
            attempt.cancel.cancel();
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> Status {
        self.machine.snapshot()
    }

    /// Current traffic counters.
    pub fn stats(&self) -> Stats {
        self.machine.stats().snapshot()
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> StatusFeed {
        self.machine.subscribe()
    }

    /// Handshake error that ended the most recent attempt, if any.
    pub fn last_error(&self) -> Option<HandshakeError> {
        self.last_error.lock().clone()
    }

    /// Acknowledges an Error status, returning to Disconnected.
    pub fn clear_error(&self) -> bool {
        self.machine.acknowledge_error()
    }

    /// Advisory geolocation of `ip` (or of our public address).
    ///
    /// Never fails: lookup errors yield an empty [`IpInfo`].
    pub fn ip_info(&self, ip: Option<IpAddr>) -> IpInfo {
        let Some(geo) = &self.geo else {
            return IpInfo::default();
        };
        geo.lookup(ip).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "geolocation lookup failed");
            IpInfo::default()
        })
    }

    /// Cancels any attempt and tears the session down.
    pub fn shutdown(&self) {
        if let Some(attempt) = self.inflight.lock().take() {
            attempt.cancel.cancel();
        }
        if self.machine.request_disconnect().is_ok() {
            tracing::info!("session closed on shutdown");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Everything a handshake worker needs, moved onto its thread.
struct ConnectTask {
    generation: u64,
    config: InitialConfig,
    cancel: CancelToken,
    machine: Arc<SessionStateMachine>,
    handshaker: Arc<dyn Handshaker>,
    tunnel: Arc<dyn TunnelTransport>,
    policy: RetryPolicy,
    timeout: Duration,
    inflight: InFlightSlot,
    last_error: Arc<Mutex<Option<HandshakeError>>>,
}

impl ConnectTask {
    fn run(self) -> Result<ConnectOutcome, SessionError> {
        let outcome = self.drive();

        let mut inflight = self.inflight.lock();
        if inflight.as_ref().is_some_and(|a| a.generation == self.generation) {
            inflight.take();
        }
        outcome
    }

    fn drive(&self) -> Result<ConnectOutcome, SessionError> {
        let result = match self.negotiate_with_retry() {
            Ok(result) => result,
            Err(HandshakeError::Cancelled) => {
                tracing::info!(generation = self.generation, "connect attempt cancelled");
                return Ok(ConnectOutcome::Cancelled);
            }
            Err(err) => {
                *self.last_error.lock() = Some(err.clone());
                return match self.machine.on_handshake_failure(self.generation, &err.to_string())? {
                    Transition::Applied => Err(err.into()),
                    Transition::Discarded => Ok(ConnectOutcome::Cancelled),
                };
            }
        };

        if self.machine.on_handshake_success(self.generation, &result)? == Transition::Discarded {
            return Ok(ConnectOutcome::Cancelled);
        }
        tracing::info!(
            generation = self.generation,
            assigned_vip = %result.assigned_vip,
            server_vip = %result.server_vip,
            server_version = %result.server_version,
            "session established"
        );

        self.start_tunnel(&result)
    }

    fn negotiate_with_retry(&self) -> Result<HandshakeResult, HandshakeError> {
        let mut attempts = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(HandshakeError::Cancelled);
            }
            attempts += 1;

            match self.handshaker.negotiate(&self.config, self.timeout, &self.cancel) {
                Ok(result) => {
                    check_versions(&result)?;
                    return Ok(result);
                }
                Err(HandshakeError::Cancelled) => return Err(HandshakeError::Cancelled),
                Err(err) if err.is_retryable() && self.policy.allows_retry(attempts) => {
                    let delay = self.policy.delay_for_retry(attempts - 1);
                    tracing::warn!(
                        generation = self.generation,
                        attempt = attempts,
                        max_attempts = self.policy.max_attempts,
                        error = %err,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "handshake failed, retrying"
                    );
                    if !self.cancel.sleep(delay) {
                        return Err(HandshakeError::Cancelled);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        generation = self.generation,
                        attempt = attempts,
                        error = %err,
                        "handshake failed, giving up"
                    );
                    return Err(err);
                }
            }
        }
    }

    fn start_tunnel(&self, result: &HandshakeResult) -> Result<ConnectOutcome, SessionError> {
        let generation = self.generation;
        let info = SessionInfo {
            generation,
            assigned_vip: result.assigned_vip.clone(),
            server_vip: result.server_vip.clone(),
            server_addr: self.config.server.clone(),
        };

        if !self.machine.is_live(generation) {
            tracing::debug!(generation, "session superseded before tunnel start");
            return Ok(ConnectOutcome::Cancelled);
        }
        let events = match self.tunnel.start(&info) {
            Ok(events) => events,
            Err(err) => {
                if self.machine.on_tunnel_closed(generation, &err.to_string()) == Transition::Discarded {
                    tracing::debug!(generation, error = %err, "stale tunnel start refused");
                    return Ok(ConnectOutcome::Cancelled);
                }
                tracing::error!(generation, error = %err, "tunnel start failed");
                return Err(err.into());
            }
        };

        let machine = Arc::downgrade(&self.machine);
        let monitor = TunnelMonitor::spawn(
            generation,
            events,
            Arc::clone(self.machine.stats()),
            Arc::clone(&self.tunnel),
            move |reason| {
                if let Some(machine) = machine.upgrade() {
                    machine.on_tunnel_closed(generation, &reason);
                }
            },
        );
        let monitor = match monitor {
            Ok(monitor) => monitor,
            Err(err) => {
                self.tunnel.stop(generation);
                self.machine.on_tunnel_closed(generation, &err.to_string());
                return Err(err.into());
            }
        };

        Ok(match self.machine.attach_tunnel(generation, monitor) {
            Transition::Applied => ConnectOutcome::Connected,
            Transition::Discarded => ConnectOutcome::Cancelled,
        })
    }
}

fn check_versions(result: &HandshakeResult) -> Result<(), HandshakeError> {
    match version::check(&result.helper_version, &result.server_version) {
        Compatibility::Compatible => Ok(()),
        Compatibility::Unknown => {
            tracing::warn!(
                helper = %result.helper_version,
                server = %result.server_version,
                "cannot compare versions, continuing"
            );
            Ok(())
        }
        Compatibility::Incompatible => Err(HandshakeError::IncompatibleVersion {
            helper: result.helper_version.clone(),
            server: result.server_version.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeoError;
    use crate::state::StateKind;
    use crate::vpn::ChannelTunnel;

    struct FixedHandshaker(Result<HandshakeResult, HandshakeError>);

    impl Handshaker for FixedHandshaker {
        fn negotiate(
            &self,
            _config: &InitialConfig,
            _timeout: Duration,
            _cancel: &CancelToken,
        ) -> Result<HandshakeResult, HandshakeError> {
            self.0.clone()
        }
    }

    struct FailingGeo;

    impl GeoLookup for FailingGeo {
        fn lookup(&self, _ip: Option<IpAddr>) -> Result<IpInfo, GeoError> {
            Err(GeoError::Empty)
        }
    }

    fn result(server_version: &str) -> HandshakeResult {
        HandshakeResult {
            server_vip: "10.0.0.1".into(),
            assigned_vip: "10.0.0.42".into(),
            helper_version: "1.2.0".into(),
            server_version: server_version.into(),
        }
    }

    fn manager(handshake: Result<HandshakeResult, HandshakeError>) -> SessionManager {
        let (tunnel, _feed) = ChannelTunnel::new();
        SessionManager::new(Arc::new(FixedHandshaker(handshake)), Arc::new(tunnel)).with_retry_policy(
            RetryPolicy::new().initial_delay(Duration::from_millis(1)),
        )
    }

    #[test]
    fn test_incompatible_server_version_is_not_retried() {
        let mgr = manager(Ok(result("2.0.0")));
        let err = mgr
            .connect(InitialConfig::new("vpn.example:443", "abc123"))
            .unwrap()
            .wait()
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::Handshake(HandshakeError::IncompatibleVersion { .. })
        ));
        assert_eq!(mgr.status().kind(), StateKind::Error);
    }

    #[test]
    fn test_unknown_server_version_is_accepted() {
        let mgr = manager(Ok(result("")));
        let outcome = mgr
            .connect(InitialConfig::new("vpn.example:443", "abc123"))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected);
    }

    #[test]
    fn test_non_retryable_error_fails_fast() {
        let mgr = manager(Err(HandshakeError::InvalidToken));
        let err = mgr
            .connect(InitialConfig::new("vpn.example:443", "abc123"))
            .unwrap()
            .wait()
            .unwrap_err();
        assert!(matches!(err, SessionError::Handshake(HandshakeError::InvalidToken)));
        assert_eq!(mgr.last_error(), Some(HandshakeError::InvalidToken));
        assert!(mgr.clear_error());
        assert_eq!(mgr.status(), Status::Disconnected);
    }

    #[test]
    fn test_ip_info_swallows_failures() {
        let mgr = manager(Ok(result("1.3.0")));
        assert!(mgr.ip_info(None).is_empty());

        let mgr = mgr.with_geo(Arc::new(FailingGeo));
        assert!(mgr.ip_info("203.0.113.7".parse().ok()).is_empty());
        assert_eq!(mgr.status(), Status::Disconnected);
    }

    #[test]
    fn test_shutdown_tears_down_session() {
        let mgr = manager(Ok(result("1.3.0")));
        mgr.connect(InitialConfig::new("vpn.example:443", "abc123"))
            .unwrap()
            .wait()
            .unwrap();
        assert!(mgr.status().is_connected());

        mgr.shutdown();
        assert_eq!(mgr.status(), Status::Disconnected);
    }
}
