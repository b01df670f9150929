//! Gateway session: the protocol state machine, the task that drives it, and
//! the transports it runs over.

mod driver;
mod machine;
mod transport;

pub use driver::{SessionEvent, run_session};
pub use machine::{
    ConnectionState, DispatchFrame, GatewaySession, HeartbeatState, LifecycleEvent, RetryCounter,
    SessionCommand, SessionRecord, SessionSettings,
};
pub use transport::{
    Connector, Transport, TransportError, TransportEvent, WebSocketConnector, WebSocketTransport,
};
