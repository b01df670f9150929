//! Session driver.
//!
//! Owns the transport and the single heartbeat deadline, feeds transport
//! events into [`GatewaySession`] and executes the commands it returns.

use std::collections::VecDeque;
use std::future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::machine::{
    ConnectionState, DispatchFrame, GatewaySession, LifecycleEvent, SessionCommand,
};
use super::transport::{Connector, Transport, TransportEvent};

/// Ordered output of a running session. Lifecycle events and dispatches
/// share one channel so consumers observe them in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Lifecycle(LifecycleEvent),
    Dispatch(DispatchFrame),
}

enum Wake {
    Shutdown,
    Event(TransportEvent),
    HeartbeatDue,
}

struct Driver {
    session: GatewaySession,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    heartbeat_at: Option<Instant>,
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

/// Run a gateway session until it dies or `shutdown` is cancelled.
///
/// Lifecycle events and application dispatches go to `events` in the order
/// the session produced them.
pub async fn run_session(
    session: GatewaySession,
    connector: Arc<dyn Connector>,
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
) {
    let mut driver = Driver {
        session,
        connector,
        transport: None,
        heartbeat_at: None,
        events,
        shutdown,
    };
    driver.run().await;
}

impl Driver {
    async fn run(&mut self) {
        let mut pending: VecDeque<SessionCommand> = self.session.start().into();

        loop {
            while let Some(command) = pending.pop_front() {
                if !self.execute(command, &mut pending).await {
                    self.close_transport().await;
                    info!("Gateway session shut down");
                    return;
                }
            }

            if self.session.state() == ConnectionState::Dead {
                error!("Gateway session is dead");
                self.close_transport().await;
                return;
            }

            let Some(transport) = self.transport.as_mut() else {
                // Unreachable while the session is alive: every close path
                // queues a Connect.
                warn!(state = ?self.session.state(), "No transport, stopping session");
                return;
            };

            let wake = tokio::select! {
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                event = transport.recv() => Wake::Event(event),
                _ = deadline(self.heartbeat_at) => Wake::HeartbeatDue,
            };

            let commands = match wake {
                Wake::Shutdown => {
                    self.close_transport().await;
                    info!("Gateway session shut down");
                    return;
                }
                Wake::Event(TransportEvent::Text(text)) => self.session.on_text(&text),
                Wake::Event(TransportEvent::Closed(code)) => {
                    self.transport = None;
                    self.session.on_closed(code)
                }
                Wake::HeartbeatDue => {
                    self.heartbeat_at = None;
                    self.session.on_heartbeat_due()
                }
            };
            pending.extend(commands);
        }
    }

    /// Execute one command. Returns `false` when shutdown was requested.
    async fn execute(
        &mut self,
        command: SessionCommand,
        pending: &mut VecDeque<SessionCommand>,
    ) -> bool {
        match command {
            SessionCommand::Connect { delay } => {
                self.close_transport().await;
                self.heartbeat_at = None;
                if !delay.is_zero() {
                    debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return false,
                        _ = sleep(delay) => {}
                    }
                }
                let connected = tokio::select! {
                    _ = self.shutdown.cancelled() => return false,
                    result = self.connector.connect() => result,
                };
                match connected {
                    Ok(transport) => {
                        self.transport = Some(transport);
                        pending.extend(self.session.on_open());
                    }
                    Err(e) => {
                        warn!(error = %e, "Gateway connect failed");
                        pending.extend(self.session.on_closed(None));
                    }
                }
            }
            SessionCommand::Send(frame) => {
                let Some(transport) = self.transport.as_mut() else {
                    debug!(op = frame.op, "No transport, dropping outbound frame");
                    return true;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode gateway frame");
                        return true;
                    }
                };
                if let Err(e) = transport.send(text).await {
                    warn!(error = %e, "Gateway send failed");
                    self.close_transport().await;
                    pending.extend(self.session.on_closed(None));
                }
            }
            SessionCommand::ArmHeartbeat(interval) => {
                self.heartbeat_at = Some(Instant::now() + interval);
            }
            SessionCommand::CancelHeartbeat => {
                self.heartbeat_at = None;
            }
            SessionCommand::Close => {
                self.close_transport().await;
            }
            SessionCommand::Emit(event) => self.publish(SessionEvent::Lifecycle(event)).await,
            SessionCommand::Dispatch(frame) => self.publish(SessionEvent::Dispatch(frame)).await,
        }
        true
    }

    async fn publish(&mut self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Session consumer gone, dropping event");
        }
    }

    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}
