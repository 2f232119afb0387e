//! Authoritative session state.
//!
//! All transitions go through one mutex, so readers always see a status that
//! some transition produced and never a mix of two. Each connect attempt gets
//! a generation number; callbacks that carry an older generation than the
//! current one belong to a superseded attempt and are discarded.
//!
//! ```text
//!               request_connect            on_handshake_success
//! Disconnected ───────────────▶ Connecting ───────────────────▶ Connected
//!      ▲  ▲                        │   │                          │   │
//!      │  └────────────────────────┘   │ on_handshake_failure     │   │ on_tunnel_closed
//!      │      request_disconnect       ▼                          │   ▼
//!      │                             Error ◀──────────────────────┼── (Error)
//!      │                                                          │ request_disconnect
//!      └──────────────────────────── Disconnecting ◀──────────────┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::core::StatsCounter;
use crate::error::{ConnectError, DisconnectError, ProtocolViolation};
use crate::event::{StatusFeed, Subscribers};
use crate::state::{InitialConfig, ServerIdentity, StateKind, Status};
use crate::vpn::{HandshakeResult, TunnelMonitor};

/// Result of a generation-guarded callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The callback changed the state.
    Applied,
    /// The callback belonged to a superseded attempt and was ignored.
    Discarded,
}

#[derive(Default)]
struct Machine {
    status: Status,
    generation: u64,
    tunnel: Option<TunnelMonitor>,
}

/// Owner of the connection state.
pub struct SessionStateMachine {
    inner: Mutex<Machine>,
    stats: Arc<StatsCounter>,
    subscribers: Subscribers,
}

impl SessionStateMachine {
    pub fn new(stats: Arc<StatsCounter>) -> Self {
        Self {
            inner: Mutex::new(Machine::default()),
            stats,
            subscribers: Subscribers::default(),
        }
    }

    /// Counters owned by this session.
    pub fn stats(&self) -> &Arc<StatsCounter> {
        &self.stats
    }

    /// Immutable copy of the current status.
    pub fn snapshot(&self) -> Status {
        self.inner.lock().status.clone()
    }

    /// Generation of the most recent connect attempt.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// True while session `generation` is the current one and Connected.
    pub fn is_live(&self, generation: u64) -> bool {
        let machine = self.inner.lock();
        machine.generation == generation && machine.status.is_connected()
    }

    /// Subscribes to status changes, starting with the current status.
    pub fn subscribe(&self) -> StatusFeed {
        let machine = self.inner.lock();
        self.subscribers.subscribe(&machine.status)
    }

    fn set(&self, machine: &mut Machine, status: Status) {
        tracing::info!(
            from = %machine.status.kind(),
            to = %status.kind(),
            generation = machine.generation,
            "session state changed"
        );
        machine.status = status;
        self.subscribers.publish(&machine.status);
    }

    fn violation(operation: &'static str, state: StateKind) -> ProtocolViolation {
        let violation = ProtocolViolation { operation, state };
        tracing::error!(%violation, "rejected session callback");
        violation
    }

    /// Starts a new connect attempt and returns its generation.
    ///
    /// # Errors
    ///
    /// [`ConnectError::AlreadyConnected`] unless Disconnected or Error,
    /// [`ConnectError::InvalidConfig`] for an empty server or token.
    pub fn request_connect(&self, config: &InitialConfig) -> Result<u64, ConnectError> {
        let mut machine = self.inner.lock();
        match machine.status.kind() {
            StateKind::Disconnected | StateKind::Error => {}
            state => return Err(ConnectError::AlreadyConnected { state }),
        }
        config.validate()?;

        machine.generation += 1;
        let generation = machine.generation;
        self.set(
            &mut machine,
            Status::Connecting {
                server_addr: config.server.clone(),
            },
        );
        Ok(generation)
    }

    /// Completes a connect attempt.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation`] if the current attempt is not Connecting.
    pub fn on_handshake_success(
        &self,
        generation: u64,
        result: &HandshakeResult,
    ) -> Result<Transition, ProtocolViolation> {
        let mut machine = self.inner.lock();
        if generation != machine.generation {
            tracing::debug!(generation, current = machine.generation, "discarding stale handshake success");
            return Ok(Transition::Discarded);
        }
        let Status::Connecting { server_addr } = &machine.status else {
            return Err(Self::violation("on_handshake_success", machine.status.kind()));
        };

        let server = ServerIdentity {
            server_vip: result.server_vip.clone(),
            server_addr: server_addr.clone(),
            helper_version: result.helper_version.clone(),
            server_version: result.server_version.clone(),
        };
        self.stats.begin(Instant::now());
        self.set(
            &mut machine,
            Status::Connected {
                assigned_vip: result.assigned_vip.clone(),
                server,
            },
        );
        Ok(Transition::Applied)
    }

    /// Fails a connect attempt.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation`] if the current attempt is not Connecting.
    pub fn on_handshake_failure(
        &self,
        generation: u64,
        reason: &str,
    ) -> Result<Transition, ProtocolViolation> {
        let mut machine = self.inner.lock();
        if generation != machine.generation {
            tracing::debug!(generation, current = machine.generation, "discarding stale handshake failure");
            return Ok(Transition::Discarded);
        }
        if machine.status.kind() != StateKind::Connecting {
            return Err(Self::violation("on_handshake_failure", machine.status.kind()));
        }

        self.set(
            &mut machine,
            Status::Error {
                message: reason.to_string(),
            },
        );
        Ok(Transition::Applied)
    }

    /// Hands the running tunnel monitor to the live session.
    ///
    /// A monitor for a superseded or no longer Connected session is stopped.
    pub fn attach_tunnel(&self, generation: u64, monitor: TunnelMonitor) -> Transition {
        let rejected = {
            let mut machine = self.inner.lock();
            if generation == machine.generation
                && machine.status.is_connected()
                && machine.tunnel.is_none()
            {
                machine.tunnel = Some(monitor);
                None
            } else {
                Some(monitor)
            }
        };

        match rejected {
            None => Transition::Applied,
            Some(monitor) => {
                tracing::debug!(generation, "stopping tunnel of superseded session");
                monitor.stop();
                Transition::Discarded
            }
        }
    }

    /// The tunnel of session `generation` ended on its own.
    pub fn on_tunnel_closed(&self, generation: u64, reason: &str) -> Transition {
        let detached = {
            let mut machine = self.inner.lock();
            if generation != machine.generation || !machine.status.is_connected() {
                return Transition::Discarded;
            }
            let detached = machine.tunnel.take();
            self.stats.freeze();
            self.set(
                &mut machine,
                Status::Error {
                    message: format!("tunnel lost: {reason}"),
                },
            );
            detached
        };
        // Called from the monitor thread itself: signal, never join.
        drop(detached);
        Transition::Applied
    }

    /// Tears down the current session.
    ///
    /// From Connecting the outstanding attempt is invalidated and the state
    /// returns straight to Disconnected. From Connected the state passes
    /// through Disconnecting while the tunnel is stopped.
    ///
    /// # Errors
    ///
    /// [`DisconnectError::NotConnected`] unless Connecting or Connected.
    pub fn request_disconnect(&self) -> Result<(), DisconnectError> {
        let monitor = {
            let mut machine = self.inner.lock();
            let established = match &machine.status {
                Status::Connected {
                    assigned_vip,
                    server,
                } => Some((assigned_vip.clone(), server.clone())),
                Status::Connecting { .. } => None,
                other => {
                    return Err(DisconnectError::NotConnected {
                        state: other.kind(),
                    })
                }
            };
            machine.generation += 1;
            let Some((assigned_vip, server)) = established else {
                self.set(&mut machine, Status::Disconnected);
                return Ok(());
            };
            let monitor = machine.tunnel.take();
            self.stats.halt(Instant::now());
            self.set(
                &mut machine,
                Status::Disconnecting {
                    assigned_vip,
                    server,
                },
            );
            monitor
        };

        // Outside the lock: readers keep seeing Disconnecting meanwhile.
        if let Some(monitor) = monitor {
            monitor.stop();
        }

        let mut machine = self.inner.lock();
        self.stats.freeze();
        self.set(&mut machine, Status::Disconnected);
        Ok(())
    }

    /// Clears an Error status back to Disconnected.
    ///
    /// Returns `false` if the state was not Error.
    pub fn acknowledge_error(&self) -> bool {
        let mut machine = self.inner.lock();
        if machine.status.kind() != StateKind::Error {
            return false;
        }
        self.stats.reset();
        self.set(&mut machine, Status::Disconnected);
        true
    }
}
