//! Event dispatch.
//!
//! Raw gateway dispatches are renamed to canonical dotted names, turned into
//! [`CanonicalEvent`]s (message-shaped ones go through the codec), filtered
//! for self-echo, and published on the [`EventBus`].

mod bus;
pub mod names;

pub use bus::EventBus;

use std::sync::Arc;

use cordgate_protocol::{MessageElement, Sendable, unix_seconds, value_to_string};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::codec;
use crate::sender::{MessageSender, SendError, Target};
use crate::session::DispatchFrame;

/// Permission every message sender has.
const BASE_PERMISSION: &str = "normal";

// ============================================================================
// CanonicalEvent
// ============================================================================

/// A platform-agnostic inbound event.
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    pub event_id: String,
    /// Full canonical name, e.g. `message.guild.create`.
    pub name: String,
    pub post_type: String,
    pub detail_type: String,
    pub sub_type: String,
    /// Raw dispatch fields.
    pub payload: Map<String, Value>,
    pub message: Option<MessageEvent>,
}

impl CanonicalEvent {
    pub fn new(event_id: String, name: &str, payload: Map<String, Value>) -> Self {
        let mut segments = name.split(names::SEPARATOR);
        let post_type = segments.next().unwrap_or_default().to_string();
        let detail_type = segments.next().unwrap_or_default().to_string();
        let sub_type = segments.collect::<Vec<_>>().join(".");
        Self {
            event_id,
            name: name.to_string(),
            post_type,
            detail_type,
            sub_type,
            payload,
            message: None,
        }
    }

    /// The acting user, if the event has one.
    pub fn user_id(&self) -> Option<&str> {
        if let Some(message) = &self.message {
            return Some(&message.user_id);
        }
        self.payload
            .get("author")
            .and_then(|a| a.get("id"))
            .or_else(|| self.payload.get("user_id"))
            .and_then(Value::as_str)
    }

    /// Flat JSON view for downstream subscribers: raw fields, then the
    /// canonical type fields, then message fields.
    pub fn to_json(&self) -> Value {
        let mut map = self.payload.clone();
        map.insert("event_id".to_string(), json!(self.event_id));
        map.insert("post_type".to_string(), json!(self.post_type));
        map.insert(format!("{}_type", self.post_type), json!(self.detail_type));
        map.insert("sub_type".to_string(), json!(self.sub_type));
        if let Some(message) = &self.message {
            message.write_json(&mut map);
        }
        Value::Object(map)
    }
}

// ============================================================================
// MessageEvent
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Guild,
    Direct,
    Group,
    Private,
}

impl MessageKind {
    fn from_detail(detail: &str) -> Option<Self> {
        match detail {
            "guild" => Some(MessageKind::Guild),
            "direct" => Some(MessageKind::Direct),
            "group" => Some(MessageKind::Group),
            "private" => Some(MessageKind::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenderInfo {
    pub user_id: String,
    pub user_name: String,
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_openid: Option<String>,
}

/// Replies to the conversation a message came from.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    sender: MessageSender,
    target: Target,
    source_id: String,
}

impl ReplyHandle {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub async fn reply(&self, message: impl Into<Sendable>) -> Result<Value, SendError> {
        self.sender
            .send_message(self.target.clone(), message.into(), Some(&self.source_id))
            .await
    }
}

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub kind: MessageKind,
    pub message_id: String,
    pub user_id: String,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub group_id: Option<String>,
    pub elements: Vec<MessageElement>,
    pub brief: String,
    pub sender: SenderInfo,
    pub timestamp: Option<i64>,
    pub reply: ReplyHandle,
}

impl MessageEvent {
    pub async fn reply(&self, message: impl Into<Sendable>) -> Result<Value, SendError> {
        self.reply.reply(message).await
    }

    fn write_json(&self, map: &mut Map<String, Value>) {
        map.insert("message_type".to_string(), json!(self.kind));
        map.insert("message".to_string(), json!(self.elements));
        map.insert("raw_message".to_string(), json!(self.brief));
        map.insert("id".to_string(), json!(self.message_id));
        map.insert("message_id".to_string(), json!(self.message_id));
        map.insert("user_id".to_string(), json!(self.user_id));
        map.insert("sender".to_string(), json!(self.sender));
        map.insert("timestamp".to_string(), json!(self.timestamp));
        for (key, value) in [
            ("guild_id", &self.guild_id),
            ("channel_id", &self.channel_id),
            ("group_id", &self.group_id),
        ] {
            if let Some(value) = value {
                map.insert(key.to_string(), json!(value));
            }
        }
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .filter(|v| !v.is_null())
        .map(value_to_string)
        .filter(|s| !s.is_empty())
}

fn nested_field(map: &Map<String, Value>, outer: &str, key: &str) -> Option<String> {
    map.get(outer)
        .and_then(Value::as_object)
        .and_then(|inner| string_field(inner, key))
}

// ============================================================================
// EventDispatcher
// ============================================================================

pub struct EventDispatcher {
    bus: EventBus,
    sender: MessageSender,
    ignore_self: bool,
    self_id: Option<String>,
}

impl EventDispatcher {
    pub fn new(bus: EventBus, sender: MessageSender, ignore_self: bool) -> Self {
        Self {
            bus,
            sender,
            ignore_self,
            self_id: None,
        }
    }

    /// The bot's own user id, learned from READY.
    pub fn set_self_id(&mut self, id: impl Into<String>) {
        self.self_id = Some(id.into());
    }

    /// Build, filter and publish one dispatch. Returns the published event,
    /// or `None` when it was dropped.
    pub fn handle(&self, frame: DispatchFrame) -> Option<Arc<CanonicalEvent>> {
        let Value::Object(payload) = frame.data else {
            debug!(event = %frame.event_type, "Dropping dispatch without object body");
            return None;
        };
        let canonical = names::map(&frame.event_type);
        let event = self.build(frame.event_id.unwrap_or_default(), canonical, payload);

        if self.is_self_echo(&event) {
            debug!(event = %event.name, "Dropping self-authored event");
            return None;
        }

        let event = Arc::new(event);
        self.bus.publish(Arc::clone(&event));
        Some(event)
    }

    fn is_self_echo(&self, event: &CanonicalEvent) -> bool {
        self.ignore_self
            && self.self_id.is_some()
            && event.user_id() == self.self_id.as_deref()
    }

    /// Turn a raw dispatch body into a canonical event.
    ///
    /// Guild message names without a `guild_id` are direct messages and are
    /// renamed accordingly.
    pub fn build(
        &self,
        event_id: String,
        canonical: &str,
        mut payload: Map<String, Value>,
    ) -> CanonicalEvent {
        let guild_prefix = "message.guild";
        let renamed;
        let mut name = canonical;
        if let Some(rest) = canonical.strip_prefix(guild_prefix)
            && string_field(&payload, "guild_id").is_none()
        {
            renamed = format!("message.direct{rest}");
            name = &renamed;
        }

        let kind = name
            .strip_prefix("message.")
            .and_then(|rest| rest.split(names::SEPARATOR).next())
            .and_then(MessageKind::from_detail);
        let is_delete = name.ends_with(".delete");

        let message = match kind {
            Some(kind) if !is_delete => Some(self.message_event(kind, &mut payload)),
            _ => None,
        };

        let mut event = CanonicalEvent::new(event_id, name, payload);
        event.message = message;
        event
    }

    fn message_event(&self, kind: MessageKind, payload: &mut Map<String, Value>) -> MessageEvent {
        let parsed = codec::parse(payload);

        let user_id = nested_field(payload, "author", "id").unwrap_or_default();
        let message_id = string_field(payload, "event_id")
            .or_else(|| string_field(payload, "id"))
            .unwrap_or_default();
        let guild_id = string_field(payload, "guild_id");
        let channel_id = string_field(payload, "channel_id");
        let group_id =
            string_field(payload, "group_openid").or_else(|| string_field(payload, "group_id"));
        let user_openid = nested_field(payload, "author", "user_openid")
            .or_else(|| nested_field(payload, "author", "member_openid"));

        let mut permissions = vec![BASE_PERMISSION.to_string()];
        if let Some(Value::Array(roles)) = payload.get("member").and_then(|m| m.get("roles")) {
            permissions.extend(roles.iter().map(value_to_string));
        }

        let target = match kind {
            MessageKind::Guild => Target::Channel(channel_id.clone().unwrap_or_default()),
            MessageKind::Direct => match &guild_id {
                Some(guild_id) => Target::Direct(guild_id.clone()),
                None => Target::Channel(channel_id.clone().unwrap_or_default()),
            },
            MessageKind::Group => Target::Group(group_id.clone().unwrap_or_default()),
            MessageKind::Private => Target::User(user_openid.clone().unwrap_or(user_id.clone())),
        };
        info!("recv {target}: {}", parsed.brief);

        MessageEvent {
            kind,
            sender: SenderInfo {
                user_id: user_id.clone(),
                user_name: nested_field(payload, "author", "username").unwrap_or_default(),
                permissions,
                user_openid,
            },
            timestamp: string_field(payload, "timestamp").and_then(|ts| unix_seconds(&ts)),
            reply: ReplyHandle {
                sender: self.sender.clone(),
                target,
                source_id: message_id.clone(),
            },
            message_id,
            user_id,
            guild_id,
            channel_id,
            group_id,
            elements: parsed.elements,
            brief: parsed.brief,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use std::time::Duration;

    fn dispatcher(ignore_self: bool) -> (EventDispatcher, EventBus) {
        let api = ApiClient::new("tok", "https://api.example.test", Duration::from_secs(1), None)
            .unwrap();
        let bus = EventBus::new();
        let mut dispatcher =
            EventDispatcher::new(bus.clone(), MessageSender::new(api), ignore_self);
        dispatcher.set_self_id("bot1");
        (dispatcher, bus)
    }

    fn frame(event_type: &str, data: Value) -> DispatchFrame {
        DispatchFrame {
            event_type: event_type.to_string(),
            event_id: Some("ev1".to_string()),
            sequence: Some(3),
            data,
        }
    }

    fn guild_message(author: &str) -> Value {
        json!({
            "id": "m1",
            "guild_id": "g1",
            "channel_id": "c1",
            "content": "hi <@!u2>",
            "author": {"id": author, "username": "alice"},
            "member": {"roles": ["admin"]},
            "mentions": [{"id": "u2", "username": "bob"}],
            "timestamp": "2024-01-01T00:00:10+00:00"
        })
    }

    #[test]
    fn test_guild_message_event() {
        let (dispatcher, _bus) = dispatcher(true);
        let event = dispatcher
            .handle(frame("MESSAGE_CREATE", guild_message("u1")))
            .unwrap();

        assert_eq!(event.name, "message.guild.create");
        assert_eq!(event.post_type, "message");
        assert_eq!(event.detail_type, "guild");
        assert_eq!(event.sub_type, "create");

        let message = event.message.as_ref().unwrap();
        assert_eq!(message.kind, MessageKind::Guild);
        assert_eq!(message.user_id, "u1");
        assert_eq!(message.message_id, "m1");
        assert_eq!(message.brief, "hi <at,user_id=u2,username=bob>");
        assert_eq!(message.sender.permissions, vec!["normal", "admin"]);
        assert_eq!(message.timestamp, Some(1704067210));
        assert_eq!(message.reply.target(), &Target::Channel("c1".to_string()));
        assert!(!event.payload.contains_key("mentions"));
    }

    #[test]
    fn test_to_json_shape() {
        let (dispatcher, _bus) = dispatcher(true);
        let event = dispatcher
            .handle(frame("MESSAGE_CREATE", guild_message("u1")))
            .unwrap();
        let json = event.to_json();

        assert_eq!(json["event_id"], "ev1");
        assert_eq!(json["post_type"], "message");
        assert_eq!(json["message_type"], "guild");
        assert_eq!(json["sub_type"], "create");
        assert_eq!(json["raw_message"], "hi <at,user_id=u2,username=bob>");
        assert_eq!(json["message"][1]["type"], "at");
        assert_eq!(json["sender"]["user_name"], "alice");
        assert_eq!(json["content"], "hi <@!u2>");
    }

    #[test]
    fn test_guild_message_without_guild_is_direct() {
        let (dispatcher, _bus) = dispatcher(true);
        let event = dispatcher
            .handle(frame(
                "MESSAGE_CREATE",
                json!({"id": "m2", "channel_id": "dm1", "content": "yo", "author": {"id": "u1"}}),
            ))
            .unwrap();
        assert_eq!(event.name, "message.direct.create");
        let message = event.message.as_ref().unwrap();
        assert_eq!(message.kind, MessageKind::Direct);
        assert_eq!(message.reply.target(), &Target::Channel("dm1".to_string()));
    }

    #[test]
    fn test_direct_message_with_guild_replies_to_dms() {
        let (dispatcher, _bus) = dispatcher(true);
        let event = dispatcher
            .handle(frame(
                "DIRECT_MESSAGE_CREATE",
                json!({"id": "m3", "guild_id": "dg", "content": "x", "author": {"id": "u1"}}),
            ))
            .unwrap();
        let message = event.message.as_ref().unwrap();
        assert_eq!(message.reply.target(), &Target::Direct("dg".to_string()));
    }

    #[test]
    fn test_group_and_private_targets() {
        let (dispatcher, _bus) = dispatcher(true);
        let group = dispatcher
            .handle(frame(
                "GROUP_AT_MESSAGE_CREATE",
                json!({"id": "m4", "group_openid": "grp", "content": "x",
                       "author": {"id": "u1", "member_openid": "mo"}}),
            ))
            .unwrap();
        assert_eq!(
            group.message.as_ref().unwrap().reply.target(),
            &Target::Group("grp".to_string())
        );

        let private = dispatcher
            .handle(frame(
                "C2C_MESSAGE_CREATE",
                json!({"id": "m5", "content": "x", "author": {"id": "u1", "user_openid": "uo"}}),
            ))
            .unwrap();
        assert_eq!(
            private.message.as_ref().unwrap().reply.target(),
            &Target::User("uo".to_string())
        );
    }

    #[tokio::test]
    async fn test_self_echo_is_suppressed() {
        let (dispatcher, bus) = dispatcher(true);
        let mut rx = bus.subscribe("message", 4);
        assert!(
            dispatcher
                .handle(frame("MESSAGE_CREATE", guild_message("bot1")))
                .is_none()
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_self_echo_delivered_when_disabled() {
        let (dispatcher, bus) = dispatcher(false);
        let mut rx = bus.subscribe("message", 4);
        dispatcher.handle(frame("MESSAGE_CREATE", guild_message("bot1")));
        assert_eq!(rx.recv().await.unwrap().user_id(), Some("bot1"));
    }

    #[tokio::test]
    async fn test_delivered_once_per_prefix() {
        let (dispatcher, bus) = dispatcher(true);
        let mut subs: Vec<_> = ["message", "message.guild", "message.guild.create"]
            .into_iter()
            .map(|name| bus.subscribe(name, 4))
            .collect();
        dispatcher.handle(frame("MESSAGE_CREATE", guild_message("u1")));

        for rx in &mut subs {
            assert_eq!(rx.recv().await.unwrap().name, "message.guild.create");
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_unknown_event_is_system() {
        let (dispatcher, _bus) = dispatcher(true);
        let event = dispatcher
            .handle(frame("BRAND_NEW_EVENT", json!({"user_id": "u9"})))
            .unwrap();
        assert_eq!(event.name, "system");
        assert_eq!(event.detail_type, "");
        assert!(event.message.is_none());
        assert_eq!(event.user_id(), Some("u9"));
        assert_eq!(event.to_json()["system_type"], "");
    }

    #[test]
    fn test_message_delete_has_no_message_body() {
        let (dispatcher, _bus) = dispatcher(true);
        let event = dispatcher
            .handle(frame(
                "MESSAGE_DELETE",
                json!({"id": "m1", "guild_id": "g1", "channel_id": "c1"}),
            ))
            .unwrap();
        assert_eq!(event.name, "message.guild.delete");
        assert!(event.message.is_none());
    }

    #[test]
    fn test_non_object_body_is_dropped() {
        let (dispatcher, _bus) = dispatcher(true);
        assert!(dispatcher.handle(frame("GUILD_CREATE", Value::Null)).is_none());
    }
}
