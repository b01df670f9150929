//! Named bot capabilities, invokable by string with JSON arguments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cordgate_protocol::Sendable;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::bot::Bot;
use crate::sender::{SendError, Target};

// ============================================================================
// Action
// ============================================================================

/// A capability exposed through [`ActionRegistry::apply`].
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Declared parameter names, in positional order. All are required.
    fn params(&self) -> &'static [&'static str];

    async fn call(&self, bot: &Bot, args: BoundArgs) -> Result<Value, ActionError>;
}

pub type SharedAction = Arc<dyn Action>;

// ============================================================================
// BoundArgs
// ============================================================================

/// Arguments bound to their declared names.
#[derive(Debug, Clone, Default)]
pub struct BoundArgs {
    action: String,
    values: Map<String, Value>,
}

impl BoundArgs {
    /// Bind `args` to `params`: an object by name, an array by position.
    ///
    /// A scalar is taken as the first positional argument and `null` as no
    /// arguments at all.
    pub fn bind(action: &str, params: &[&str], args: Value) -> Result<Self, ActionError> {
        let mut values = Map::new();
        match args {
            Value::Object(mut map) => {
                for param in params {
                    if let Some(value) = map.remove(*param) {
                        values.insert(param.to_string(), value);
                    }
                }
            }
            Value::Array(items) => {
                for (param, value) in params.iter().zip(items) {
                    values.insert(param.to_string(), value);
                }
            }
            Value::Null => {}
            scalar => {
                if let Some(param) = params.first() {
                    values.insert(param.to_string(), scalar);
                }
            }
        }

        if let Some(missing) = params.iter().find(|p| !values.contains_key(**p)) {
            return Err(ActionError::MissingParam {
                action: action.to_string(),
                param: missing.to_string(),
            });
        }

        Ok(Self {
            action: action.to_string(),
            values,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A parameter as an id string. Numbers are accepted and stringified.
    pub fn id(&self, name: &str) -> Result<String, ActionError> {
        match self.values.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(self.invalid(name, "expected a non-empty string")),
        }
    }

    /// A parameter as an outbound message: template text, one element or a
    /// list of either.
    pub fn message(&self, name: &str) -> Result<Sendable, ActionError> {
        let value = self.values.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| self.invalid(name, &e.to_string()))
    }

    fn invalid(&self, param: &str, reason: &str) -> ActionError {
        ActionError::InvalidParam {
            action: self.action.clone(),
            param: param.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// ActionError
// ============================================================================

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("{action}: missing parameter `{param}`")]
    MissingParam { action: String, param: String },

    #[error("{action}: invalid parameter `{param}`: {reason}")]
    InvalidParam {
        action: String,
        param: String,
        reason: String,
    },

    #[error(transparent)]
    Send(#[from] SendError),
}

// ============================================================================
// ActionRegistry
// ============================================================================

#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, SharedAction>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in action.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SendMessage::guild()));
        registry.register(Arc::new(SendMessage::direct()));
        registry.register(Arc::new(SendMessage::group()));
        registry.register(Arc::new(SendMessage::private()));
        registry.register(Arc::new(GetGuildList));
        registry.register(Arc::new(GetGuildMemberList));
        registry.register(Arc::new(GetSelfInfo));
        registry
    }

    /// Add an action, replacing any previous one with the same name.
    pub fn register(&mut self, action: SharedAction) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<&SharedAction> {
        self.actions.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up `name`, bind `args` to its parameters and call it.
    pub async fn apply(&self, bot: &Bot, name: &str, args: Value) -> Result<Value, ActionError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| ActionError::UnknownAction(name.to_string()))?;
        let args = BoundArgs::bind(name, action.params(), args)?;
        action.call(bot, args).await
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

// ============================================================================
// Built-ins
// ============================================================================

struct SendMessage {
    name: &'static str,
    params: &'static [&'static str],
    target: fn(String) -> Target,
}

impl SendMessage {
    fn guild() -> Self {
        Self {
            name: "send_guild_message",
            params: &["channel_id", "message"],
            target: Target::Channel,
        }
    }

    fn direct() -> Self {
        Self {
            name: "send_direct_message",
            params: &["guild_id", "message"],
            target: Target::Direct,
        }
    }

    fn group() -> Self {
        Self {
            name: "send_group_message",
            params: &["group_id", "message"],
            target: Target::Group,
        }
    }

    fn private() -> Self {
        Self {
            name: "send_private_message",
            params: &["user_id", "message"],
            target: Target::User,
        }
    }
}

#[async_trait]
impl Action for SendMessage {
    fn name(&self) -> &str {
        self.name
    }

    fn params(&self) -> &'static [&'static str] {
        self.params
    }

    async fn call(&self, bot: &Bot, args: BoundArgs) -> Result<Value, ActionError> {
        let target = (self.target)(args.id(self.params[0])?);
        let message = args.message("message")?;
        Ok(bot.sender().send_message(target, message, None).await?)
    }
}

struct GetGuildList;

#[async_trait]
impl Action for GetGuildList {
    fn name(&self) -> &str {
        "get_guild_list"
    }

    fn params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn call(&self, bot: &Bot, _args: BoundArgs) -> Result<Value, ActionError> {
        Ok(json!(bot.guild_list().await))
    }
}

struct GetGuildMemberList;

#[async_trait]
impl Action for GetGuildMemberList {
    fn name(&self) -> &str {
        "get_guild_member_list"
    }

    fn params(&self) -> &'static [&'static str] {
        &["guild_id"]
    }

    async fn call(&self, bot: &Bot, args: BoundArgs) -> Result<Value, ActionError> {
        let guild_id = args.id("guild_id")?;
        Ok(json!(bot.guild_member_list(&guild_id).await))
    }
}

struct GetSelfInfo;

#[async_trait]
impl Action for GetSelfInfo {
    fn name(&self) -> &str {
        "get_self_info"
    }

    fn params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn call(&self, bot: &Bot, _args: BoundArgs) -> Result<Value, ActionError> {
        Ok(match bot.self_info().await {
            Some(user) => json!({
                "user_id": user.id,
                "user_name": user.username,
                "status": user.status,
            }),
            None => Value::Null,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
