//! The bot facade: configuration, the running session, event subscriptions
//! and outbound capabilities in one handle.

use std::sync::Arc;

use cordgate_protocol::{ClientProperties, Sendable, SelfUser};
use serde_json::Value;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actions::{ActionError, ActionRegistry};
use crate::api::{ApiClient, ApiError, GuildInfo, MemberInfo};
use crate::config::Config;
use crate::dispatch::{CanonicalEvent, EventBus, EventDispatcher};
use crate::intents;
use crate::sender::{MessageSender, SendError, Target};
use crate::session::{
    Connector, GatewaySession, LifecycleEvent, SessionEvent, SessionSettings, WebSocketConnector,
    run_session,
};

/// Client name reported in IDENTIFY properties.
const CLIENT_NAME: &str = "cordgate";

const SESSION_EVENT_CAPACITY: usize = 100;
const LIFECYCLE_CAPACITY: usize = 32;

pub struct Bot {
    config: Config,
    sender: MessageSender,
    bus: EventBus,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    self_user: Arc<RwLock<Option<SelfUser>>>,
    actions: ActionRegistry,
}

impl Bot {
    /// Build a bot from a config whose token is already resolved.
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let api = ApiClient::from_config(&config)?;
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Ok(Self {
            config,
            sender: MessageSender::new(api),
            bus: EventBus::new(),
            lifecycle,
            self_user: Arc::new(RwLock::new(None)),
            actions: ActionRegistry::with_builtins(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sender(&self) -> &MessageSender {
        &self.sender
    }

    pub fn api(&self) -> &ApiClient {
        self.sender.api()
    }

    pub fn actions_mut(&mut self) -> &mut ActionRegistry {
        &mut self.actions
    }

    /// Receive events named `name` or nested under it (`"message"` gets
    /// every message event).
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<CanonicalEvent>> {
        self.bus.subscribe(name, capacity)
    }

    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// The bot's identity, once READY has been received.
    pub async fn self_info(&self) -> Option<SelfUser> {
        self.self_user.read().await.clone()
    }

    fn session_settings(&self) -> SessionSettings {
        let gateway = &self.config.gateway;
        SessionSettings {
            token: self.config.bot.token.clone(),
            intents: intents::resolve(&self.config.bot.intents),
            properties: ClientProperties::for_client(CLIENT_NAME),
            max_reconnect_count: gateway.max_reconnect_count,
            reconnect_interval: gateway.reconnect_interval(),
            heartbeat_override: gateway.heartbeat_override(),
        }
    }

    /// Connect to the configured gateway URL and start dispatching.
    pub fn start(&self) -> BotHandle {
        let connector = WebSocketConnector::new(
            self.config.gateway.url.clone(),
            self.config.proxy.clone(),
        );
        self.start_with(Arc::new(connector))
    }

    /// Start over an arbitrary connector.
    pub fn start_with(&self, connector: Arc<dyn Connector>) -> BotHandle {
        let shutdown = CancellationToken::new();
        let settings = self.session_settings();
        info!(
            url = %self.config.gateway.url,
            intents = settings.intents,
            "Starting gateway session"
        );

        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_CAPACITY);
        let session = tokio::spawn(run_session(
            GatewaySession::new(settings),
            connector,
            events_tx,
            shutdown.clone(),
        ));

        let dispatcher = EventDispatcher::new(
            self.bus.clone(),
            self.sender.clone(),
            self.config.bot.ignore_self,
        );
        let pump = tokio::spawn(pump(
            events_rx,
            dispatcher,
            self.lifecycle.clone(),
            Arc::clone(&self.self_user),
        ));

        BotHandle {
            shutdown,
            session,
            pump,
        }
    }

    /// Invoke a named action with JSON arguments.
    pub async fn apply_action(&self, name: &str, args: Value) -> Result<Value, ActionError> {
        self.actions.apply(self, name, args).await
    }

    pub async fn send_guild_message(
        &self,
        channel_id: impl Into<String>,
        message: impl Into<Sendable>,
        source: Option<&str>,
    ) -> Result<Value, SendError> {
        let target = Target::Channel(channel_id.into());
        self.sender.send_message(target, message.into(), source).await
    }

    pub async fn send_direct_message(
        &self,
        guild_id: impl Into<String>,
        message: impl Into<Sendable>,
        source: Option<&str>,
    ) -> Result<Value, SendError> {
        let target = Target::Direct(guild_id.into());
        self.sender.send_message(target, message.into(), source).await
    }

    pub async fn send_group_message(
        &self,
        group_id: impl Into<String>,
        message: impl Into<Sendable>,
        source: Option<&str>,
    ) -> Result<Value, SendError> {
        let target = Target::Group(group_id.into());
        self.sender.send_message(target, message.into(), source).await
    }

    pub async fn send_private_message(
        &self,
        user_id: impl Into<String>,
        message: impl Into<Sendable>,
        source: Option<&str>,
    ) -> Result<Value, SendError> {
        let target = Target::User(user_id.into());
        self.sender.send_message(target, message.into(), source).await
    }

    pub async fn guild_list(&self) -> Vec<GuildInfo> {
        self.api().guild_list().await
    }

    pub async fn guild_member_list(&self, guild_id: &str) -> Vec<MemberInfo> {
        self.api().guild_member_list(guild_id).await
    }
}

/// Routes session output: lifecycle events are rebroadcast, dispatches go
/// through the dispatcher. READY teaches the dispatcher its own id before
/// any later dispatch is handled.
async fn pump(
    mut events: mpsc::Receiver<SessionEvent>,
    mut dispatcher: EventDispatcher,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    self_user: Arc<RwLock<Option<SelfUser>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Lifecycle(event) => {
                if let LifecycleEvent::Ready { self_user: user, .. } = &event {
                    info!(user_id = %user.id, username = %user.username, "Bot ready");
                    dispatcher.set_self_id(&user.id);
                    *self_user.write().await = Some(user.clone());
                }
                if lifecycle.send(event).is_err() {
                    debug!("No lifecycle subscribers");
                }
            }
            SessionEvent::Dispatch(frame) => {
                dispatcher.handle(frame);
            }
        }
    }
    debug!("Session event stream ended");
}

// ============================================================================
// BotHandle
// ============================================================================

/// A running bot. Dropping the handle leaves the tasks running; call
/// [`BotHandle::shutdown`] to stop them.
#[derive(Debug)]
pub struct BotHandle {
    shutdown: CancellationToken,
    session: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl BotHandle {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the session and wait for both tasks to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait until the session ends on its own (dead) or is shut down.
    pub async fn join(self) {
        let _ = self.session.await;
        let _ = self.pump.await;
    }
}
