//! Platform-agnostic message elements.
//!
//! A message is an ordered sequence of [`MessageElement`]s. Every element has
//! a `type` and, besides its typed field, an open attribute map: platform
//! payloads routinely carry extra fields (a mention's `username`, an
//! attachment's `width`) that must survive the trip to subscribers.
//!
//! On the wire an element is a flat JSON object:
//!
//! ```json
//! {"type": "at", "user_id": "123", "username": "bob"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Extra attributes carried by an element.
pub type Attrs = Map<String, Value>;

// ============================================================================
// MessageElement
// ============================================================================

/// One element of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", try_from = "Value")]
pub enum MessageElement {
    Text { text: String },
    At { user_id: String, attrs: Attrs },
    Face { id: String, attrs: Attrs },
    Link { channel_id: String, attrs: Attrs },
    Image { file: String, attrs: Attrs },
    Audio { file: String, attrs: Attrs },
    Video { file: String, attrs: Attrs },
    Markdown { attrs: Attrs },
    Keyboard { attrs: Attrs },
    Button { attrs: Attrs },
    Ark { attrs: Attrs },
    Embed { attrs: Attrs },
    Reply { id: String, attrs: Attrs },
}

impl MessageElement {
    pub fn text(text: impl Into<String>) -> Self {
        MessageElement::Text { text: text.into() }
    }

    pub fn at(user_id: impl Into<String>) -> Self {
        MessageElement::At {
            user_id: user_id.into(),
            attrs: Attrs::new(),
        }
    }

    pub fn face(id: impl Into<String>) -> Self {
        MessageElement::Face {
            id: id.into(),
            attrs: Attrs::new(),
        }
    }

    pub fn link(channel_id: impl Into<String>) -> Self {
        MessageElement::Link {
            channel_id: channel_id.into(),
            attrs: Attrs::new(),
        }
    }

    pub fn image(file: impl Into<String>) -> Self {
        MessageElement::Image {
            file: file.into(),
            attrs: Attrs::new(),
        }
    }

    pub fn reply(id: impl Into<String>) -> Self {
        MessageElement::Reply {
            id: id.into(),
            attrs: Attrs::new(),
        }
    }

    /// Build an element from its kind and a flat attribute map.
    ///
    /// The typed field (`text`, `user_id`, `id`, `channel_id`, `file`) is
    /// moved out of `attrs`; a missing one becomes the empty string. Returns
    /// `None` for unknown kinds.
    pub fn from_parts(kind: &str, mut attrs: Attrs) -> Option<Self> {
        let element = match kind {
            "text" => MessageElement::Text {
                text: take(&mut attrs, "text"),
            },
            "at" => MessageElement::At {
                user_id: take(&mut attrs, "user_id"),
                attrs,
            },
            "face" => MessageElement::Face {
                id: take(&mut attrs, "id"),
                attrs,
            },
            "link" => MessageElement::Link {
                channel_id: take(&mut attrs, "channel_id"),
                attrs,
            },
            "image" => MessageElement::Image {
                file: take(&mut attrs, "file"),
                attrs,
            },
            "audio" => MessageElement::Audio {
                file: take(&mut attrs, "file"),
                attrs,
            },
            "video" => MessageElement::Video {
                file: take(&mut attrs, "file"),
                attrs,
            },
            "reply" => MessageElement::Reply {
                id: take(&mut attrs, "id"),
                attrs,
            },
            "markdown" => MessageElement::Markdown { attrs },
            "keyboard" => MessageElement::Keyboard { attrs },
            "button" => MessageElement::Button { attrs },
            "ark" => MessageElement::Ark { attrs },
            "embed" => MessageElement::Embed { attrs },
            _ => return None,
        };
        Some(element)
    }

    /// The element's `type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageElement::Text { .. } => "text",
            MessageElement::At { .. } => "at",
            MessageElement::Face { .. } => "face",
            MessageElement::Link { .. } => "link",
            MessageElement::Image { .. } => "image",
            MessageElement::Audio { .. } => "audio",
            MessageElement::Video { .. } => "video",
            MessageElement::Markdown { .. } => "markdown",
            MessageElement::Keyboard { .. } => "keyboard",
            MessageElement::Button { .. } => "button",
            MessageElement::Ark { .. } => "ark",
            MessageElement::Embed { .. } => "embed",
            MessageElement::Reply { .. } => "reply",
        }
    }

    /// The typed field as `(key, value)`, if the kind has one.
    fn key_field(&self) -> Option<(&'static str, &str)> {
        match self {
            MessageElement::Text { text } => Some(("text", text)),
            MessageElement::At { user_id, .. } => Some(("user_id", user_id)),
            MessageElement::Face { id, .. } | MessageElement::Reply { id, .. } => Some(("id", id)),
            MessageElement::Link { channel_id, .. } => Some(("channel_id", channel_id)),
            MessageElement::Image { file, .. }
            | MessageElement::Audio { file, .. }
            | MessageElement::Video { file, .. } => Some(("file", file)),
            _ => None,
        }
    }

    /// Extra attributes (always empty for text).
    pub fn attrs(&self) -> Option<&Attrs> {
        match self {
            MessageElement::Text { .. } => None,
            MessageElement::At { attrs, .. }
            | MessageElement::Face { attrs, .. }
            | MessageElement::Link { attrs, .. }
            | MessageElement::Image { attrs, .. }
            | MessageElement::Audio { attrs, .. }
            | MessageElement::Video { attrs, .. }
            | MessageElement::Markdown { attrs }
            | MessageElement::Keyboard { attrs }
            | MessageElement::Button { attrs }
            | MessageElement::Ark { attrs }
            | MessageElement::Embed { attrs }
            | MessageElement::Reply { attrs, .. } => Some(attrs),
        }
    }

    /// Render the element for logs: text verbatim, anything else as
    /// `<kind,key=val,...>`.
    pub fn brief(&self) -> String {
        if let MessageElement::Text { text } = self {
            return text.clone();
        }
        let mut parts = vec![self.kind().to_string()];
        if let Some((key, value)) = self.key_field() {
            parts.push(format!("{key}={value}"));
        }
        if let Some(attrs) = self.attrs() {
            parts.extend(
                attrs
                    .iter()
                    .map(|(k, v)| format!("{k}={}", value_to_string(v))),
            );
        }
        format!("<{}>", parts.join(","))
    }

    /// Everything except the `type`, as a JSON object.
    pub fn data(&self) -> Attrs {
        let mut map = self.attrs().cloned().unwrap_or_default();
        if let Some((key, value)) = self.key_field() {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
        map
    }
}

impl From<MessageElement> for Value {
    fn from(element: MessageElement) -> Self {
        let mut map = Attrs::new();
        map.insert("type".to_string(), Value::String(element.kind().to_string()));
        map.extend(element.data());
        Value::Object(map)
    }
}

impl TryFrom<Value> for MessageElement {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err("message element must be an object".to_string());
        };
        let kind = match map.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err("message element is missing a string `type`".to_string()),
        };
        MessageElement::from_parts(&kind, map)
            .ok_or_else(|| format!("unknown message element type: {kind}"))
    }
}

fn take(attrs: &mut Attrs, key: &str) -> String {
    attrs
        .remove(key)
        .map(|v| value_to_string(&v))
        .unwrap_or_default()
}

/// Stringify an attribute value. Strings are taken verbatim, everything
/// else renders as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Sendable
// ============================================================================

/// One item of an outbound message: raw template text or a structured element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Text(String),
    Element(MessageElement),
}

/// Anything that can be sent: a single segment or a sequence of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sendable {
    One(Segment),
    Many(Vec<Segment>),
}

impl Sendable {
    /// Flatten into an ordered segment list.
    pub fn into_segments(self) -> Vec<Segment> {
        match self {
            Sendable::One(segment) => vec![segment],
            Sendable::Many(segments) => segments,
        }
    }
}

impl From<&str> for Sendable {
    fn from(text: &str) -> Self {
        Sendable::One(Segment::Text(text.to_string()))
    }
}

impl From<String> for Sendable {
    fn from(text: String) -> Self {
        Sendable::One(Segment::Text(text))
    }
}

impl From<MessageElement> for Sendable {
    fn from(element: MessageElement) -> Self {
        Sendable::One(Segment::Element(element))
    }
}

impl From<Vec<MessageElement>> for Sendable {
    fn from(elements: Vec<MessageElement>) -> Self {
        Sendable::Many(elements.into_iter().map(Segment::Element).collect())
    }
}

impl From<Vec<Segment>> for Sendable {
    fn from(segments: Vec<Segment>) -> Self {
        Sendable::Many(segments)
    }
}
