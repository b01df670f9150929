//! Gateway session state machine.
//!
//! [`GatewaySession`] performs no I/O. Every input returns the ordered list
//! of [`SessionCommand`]s the driver must execute, which keeps the protocol
//! logic testable without sockets or timers.

use std::time::Duration;

use cordgate_protocol::{
    ClientProperties, GatewayFrame, HelloPayload, IdentifyPayload, OpCode, ReadyPayload,
    CloseClassification, ResumePayload, SelfUser, classify, dispatch_names,
};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Disconnect reason reported for INVALID_SESSION.
const INVALID_SESSION_REASON: &str = "invalid session";

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Ready,
    Disconnected,
    Dead,
}

/// Identifies a resumable session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    pub interval: Duration,
    pub last_ack_received: bool,
}

/// Consecutive connection failures since the last Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    pub count: u32,
    pub max: u32,
}

impl RetryCounter {
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    pub fn can_retry(&self) -> bool {
        self.count < self.max
    }
}

/// Static inputs of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub token: String,
    pub intents: u64,
    pub properties: ClientProperties,
    pub max_reconnect_count: u32,
    pub reconnect_interval: Duration,
    pub heartbeat_override: Option<Duration>,
}

// ============================================================================
// Outputs
// ============================================================================

/// Work the driver must perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Open a new transport after `delay`.
    Connect { delay: Duration },
    Send(GatewayFrame),
    /// Replace the heartbeat deadline with one `interval` from now.
    ArmHeartbeat(Duration),
    CancelHeartbeat,
    /// Drop the current transport.
    Close,
    Emit(LifecycleEvent),
    Dispatch(DispatchFrame),
}

/// Connection lifecycle, as seen by the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Ready {
        session_id: String,
        self_user: SelfUser,
    },
    Resumed {
        session_id: String,
    },
    /// First heartbeat ack after a reconnect.
    Alive,
    /// The server asked for a reconnect; the close that follows does the work.
    Reconnect,
    Disconnected {
        code: Option<u16>,
        reason: &'static str,
        resumable: bool,
        record: Option<SessionRecord>,
    },
    Dead {
        reason: String,
    },
}

/// An application dispatch ready for the event dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFrame {
    pub event_type: String,
    pub event_id: Option<String>,
    pub sequence: Option<u64>,
    pub data: Value,
}

// ============================================================================
// GatewaySession
// ============================================================================

pub struct GatewaySession {
    settings: SessionSettings,
    state: ConnectionState,
    session_id: Option<String>,
    sequence: Option<u64>,
    heartbeat: HeartbeatState,
    retry: RetryCounter,
    resume: bool,
    connecting: bool,
    alive: bool,
}

impl GatewaySession {
    pub fn new(settings: SessionSettings) -> Self {
        let retry = RetryCounter::new(settings.max_reconnect_count);
        Self {
            settings,
            state: ConnectionState::Connecting,
            session_id: None,
            sequence: None,
            heartbeat: HeartbeatState {
                interval: Duration::ZERO,
                last_ack_received: true,
            },
            retry,
            resume: false,
            connecting: false,
            alive: true,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn record(&self) -> Option<SessionRecord> {
        self.session_id.as_ref().map(|session_id| SessionRecord {
            session_id: session_id.clone(),
            sequence: self.sequence.unwrap_or(0),
        })
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn heartbeat(&self) -> HeartbeatState {
        self.heartbeat
    }

    pub fn retry(&self) -> RetryCounter {
        self.retry
    }

    pub fn resume_pending(&self) -> bool {
        self.resume
    }

    /// Open the transport. No-op while a connection attempt is in flight or
    /// once the session is dead.
    pub fn start(&mut self) -> Vec<SessionCommand> {
        if self.connecting || self.state == ConnectionState::Dead {
            return Vec::new();
        }
        self.connecting = true;
        self.state = ConnectionState::Connecting;
        vec![SessionCommand::Connect {
            delay: Duration::ZERO,
        }]
    }

    /// The transport is open; the server speaks first.
    pub fn on_open(&mut self) -> Vec<SessionCommand> {
        self.connecting = false;
        self.state = ConnectionState::AwaitingHello;
        Vec::new()
    }

    /// A text frame arrived. Malformed frames are logged and dropped.
    pub fn on_text(&mut self, text: &str) -> Vec<SessionCommand> {
        match serde_json::from_str::<GatewayFrame>(text) {
            Ok(frame) => self.on_frame(frame),
            Err(e) => {
                warn!(error = %e, "Dropping malformed gateway frame");
                Vec::new()
            }
        }
    }

    pub fn on_frame(&mut self, frame: GatewayFrame) -> Vec<SessionCommand> {
        match frame.opcode() {
            Some(OpCode::Hello) => self.on_hello(frame.d),
            Some(OpCode::HeartbeatAck) => self.on_heartbeat_ack(),
            Some(OpCode::Heartbeat) => self.on_heartbeat_request(),
            Some(OpCode::Dispatch) => self.on_dispatch(frame),
            Some(OpCode::InvalidSession) => self.on_invalid_session(),
            Some(OpCode::Reconnect) => {
                info!("Gateway requested reconnect");
                vec![SessionCommand::Emit(LifecycleEvent::Reconnect)]
            }
            _ => {
                debug!(op = frame.op, "Ignoring gateway opcode");
                Vec::new()
            }
        }
    }

    /// The heartbeat deadline elapsed.
    pub fn on_heartbeat_due(&mut self) -> Vec<SessionCommand> {
        if !self.is_connected() {
            return Vec::new();
        }
        if !self.heartbeat.last_ack_received {
            warn!("Heartbeat not acknowledged, reconnecting");
            let mut commands = vec![SessionCommand::Close];
            commands.extend(self.on_closed(None));
            return commands;
        }
        self.beat()
    }

    /// The transport closed, failed to open, or was dropped. `code` is the
    /// close frame's code, if one was received.
    pub fn on_closed(&mut self, code: Option<u16>) -> Vec<SessionCommand> {
        let close = classify(code);
        self.disconnect(close)
    }

    /// INVALID_SESSION: the server will not accept this session again.
    fn on_invalid_session(&mut self) -> Vec<SessionCommand> {
        if self.state == ConnectionState::Dead {
            return Vec::new();
        }
        warn!(state = ?self.state, "Gateway invalidated the session");
        let mut commands = vec![SessionCommand::Close];
        commands.extend(self.disconnect(CloseClassification {
            code: None,
            resumable: false,
            reason: INVALID_SESSION_REASON,
        }));
        commands
    }

    fn disconnect(&mut self, close: CloseClassification) -> Vec<SessionCommand> {
        self.connecting = false;
        if self.state == ConnectionState::Dead {
            return Vec::new();
        }

        let code = close.code;
        let record = if close.resumable {
            self.record()
        } else {
            None
        };
        self.resume = record.is_some();
        if record.is_none() {
            self.session_id = None;
            self.sequence = None;
        }
        self.state = ConnectionState::Disconnected;
        self.alive = false;

        warn!(
            code = ?code,
            reason = close.reason,
            resumable = close.resumable,
            "Gateway connection closed"
        );

        let mut commands = vec![
            SessionCommand::CancelHeartbeat,
            SessionCommand::Emit(LifecycleEvent::Disconnected {
                code,
                reason: close.reason,
                resumable: close.resumable,
                record,
            }),
        ];

        if self.retry.can_retry() {
            self.retry.count += 1;
            self.connecting = true;
            self.state = ConnectionState::Connecting;
            info!(
                attempt = self.retry.count,
                max = self.retry.max,
                "Reconnecting to gateway"
            );
            commands.push(SessionCommand::Connect {
                delay: self.settings.reconnect_interval,
            });
        } else {
            self.state = ConnectionState::Dead;
            let reason = format!(
                "gave up after {} reconnect attempts (last close: {})",
                self.retry.max, close.reason
            );
            commands.push(SessionCommand::Emit(LifecycleEvent::Dead { reason }));
        }
        commands
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Identifying | ConnectionState::Resuming | ConnectionState::Ready
        )
    }

    fn beat(&mut self) -> Vec<SessionCommand> {
        self.heartbeat.last_ack_received = false;
        vec![
            SessionCommand::Send(GatewayFrame::heartbeat(self.sequence)),
            SessionCommand::ArmHeartbeat(self.heartbeat.interval),
        ]
    }

    fn on_hello(&mut self, d: Value) -> Vec<SessionCommand> {
        let hello: HelloPayload = match serde_json::from_value(d) {
            Ok(hello) => hello,
            Err(e) => {
                warn!(error = %e, "Dropping malformed HELLO");
                return Vec::new();
            }
        };
        self.heartbeat.interval = self
            .settings
            .heartbeat_override
            .unwrap_or(Duration::from_millis(hello.heartbeat_interval));

        let handshake = match (self.resume, self.record()) {
            (true, Some(record)) => {
                info!(session_id = %record.session_id, seq = record.sequence, "Resuming session");
                self.state = ConnectionState::Resuming;
                GatewayFrame::resume(&ResumePayload {
                    token: self.settings.token.clone(),
                    session_id: record.session_id,
                    seq: record.sequence,
                })
            }
            _ => {
                debug!(intents = self.settings.intents, "Identifying");
                self.state = ConnectionState::Identifying;
                self.resume = false;
                self.session_id = None;
                self.sequence = None;
                GatewayFrame::identify(&IdentifyPayload {
                    token: self.settings.token.clone(),
                    intents: self.settings.intents,
                    properties: self.settings.properties.clone(),
                })
            }
        };

        let mut commands = vec![SessionCommand::Send(handshake)];
        commands.extend(self.beat());
        commands
    }

    fn on_heartbeat_ack(&mut self) -> Vec<SessionCommand> {
        self.heartbeat.last_ack_received = true;
        let mut commands = Vec::new();
        if !self.alive {
            self.alive = true;
            commands.push(SessionCommand::Emit(LifecycleEvent::Alive));
        }
        commands.push(SessionCommand::ArmHeartbeat(self.heartbeat.interval));
        commands
    }

    fn on_heartbeat_request(&mut self) -> Vec<SessionCommand> {
        if !self.heartbeat.last_ack_received {
            debug!("Heartbeat already outstanding");
            return Vec::new();
        }
        self.beat()
    }

    fn on_dispatch(&mut self, frame: GatewayFrame) -> Vec<SessionCommand> {
        if let Some(seq) = frame.s {
            self.sequence = Some(self.sequence.map_or(seq, |current| current.max(seq)));
        }
        let Some(event_type) = frame.t else {
            debug!("Dropping dispatch without event type");
            return Vec::new();
        };

        match event_type.as_str() {
            dispatch_names::READY => self.on_ready(frame.d),
            dispatch_names::RESUMED => self.on_resumed(),
            // Resuming: the server replays missed events before RESUMED.
            _ if matches!(self.state, ConnectionState::Ready | ConnectionState::Resuming) => {
                vec![SessionCommand::Dispatch(DispatchFrame {
                    event_type,
                    event_id: frame.id,
                    sequence: frame.s,
                    data: frame.d,
                })]
            }
            _ => {
                debug!(
                    event = %event_type,
                    state = ?self.state,
                    "Dropping dispatch before ready"
                );
                Vec::new()
            }
        }
    }

    fn on_ready(&mut self, d: Value) -> Vec<SessionCommand> {
        let ready: ReadyPayload = match serde_json::from_value(d) {
            Ok(ready) => ready,
            Err(e) => {
                warn!(error = %e, "Dropping malformed READY");
                return Vec::new();
            }
        };
        info!(
            session_id = %ready.session_id,
            user = %ready.user.username,
            "Gateway session ready"
        );
        self.session_id = Some(ready.session_id.clone());
        self.mark_ready();
        vec![
            SessionCommand::Emit(LifecycleEvent::Ready {
                session_id: ready.session_id,
                self_user: ready.user,
            }),
            SessionCommand::ArmHeartbeat(self.heartbeat.interval),
        ]
    }

    fn on_resumed(&mut self) -> Vec<SessionCommand> {
        let Some(session_id) = self.session_id.clone() else {
            debug!("Ignoring RESUMED without a session");
            return Vec::new();
        };
        info!(session_id = %session_id, "Gateway session resumed");
        self.mark_ready();
        vec![
            SessionCommand::Emit(LifecycleEvent::Resumed { session_id }),
            SessionCommand::ArmHeartbeat(self.heartbeat.interval),
        ]
    }

    fn mark_ready(&mut self) {
        self.state = ConnectionState::Ready;
        self.retry.count = 0;
        self.resume = false;
    }
}
