//! Cordgate - gateway adapter for real-time chat bots.
//!
//! Maintains the gateway session, turns dispatches into canonical events for
//! subscribers, and transcodes messages between the platform's inline tag
//! syntax and structured elements.

pub mod actions;
pub mod api;
pub mod bot;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod intents;
pub mod sender;
pub mod session;

pub use bot::{Bot, BotHandle};
pub use config::Config;
