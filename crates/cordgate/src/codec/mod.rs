//! Inbound message codec.
//!
//! Turns a raw message payload (content string, reply reference, mention list
//! and attachments) into an ordered [`MessageElement`] sequence plus a
//! log-oriented brief. Parsing is total: anything unrecognized degrades to
//! text.

mod grammar;

pub use grammar::{Token, tokenize, trim_quote};

use cordgate_protocol::{Attrs, MessageElement, value_to_string};
use serde_json::{Map, Value};

/// Result of parsing one message payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parsed {
    pub elements: Vec<MessageElement>,
    pub brief: String,
}

impl Parsed {
    fn push(&mut self, element: MessageElement) {
        self.brief.push_str(&element.brief());
        self.elements.push(element);
    }

    fn push_literal(&mut self, text: &str) {
        self.brief.push_str(text);
        self.elements.push(MessageElement::text(text));
    }
}

/// Parse a raw message payload.
///
/// `mentions` and `attachments` are removed from `payload` so they are not
/// duplicated when the payload is merged into the canonical event.
pub fn parse(payload: &mut Map<String, Value>) -> Parsed {
    let mut parsed = Parsed::default();

    if let Some(id) = reply_reference(payload) {
        parsed.push(MessageElement::reply(id));
    }

    let mentions = match payload.remove("mentions") {
        Some(Value::Array(list)) => list,
        _ => Vec::new(),
    };
    let content = payload
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    scan(content, &mentions, &mut parsed);

    if let Some(Value::Array(attachments)) = payload.remove("attachments") {
        for attachment in attachments {
            if let Value::Object(map) = attachment {
                parsed.push(attachment_element(map));
            }
        }
    }

    parsed
}

/// Parse a template string with the inbound grammar and no mention list.
pub fn parse_template(template: &str) -> Vec<MessageElement> {
    let mut parsed = Parsed::default();
    scan(template, &[], &mut parsed);
    parsed.elements
}

fn scan(content: &str, mentions: &[Value], parsed: &mut Parsed) {
    for token in tokenize(content) {
        match token {
            Token::Text(text) | Token::Quoted(text) => parsed.push_literal(text),
            Token::Tag(tag) => match grammar::resolve_tag(tag, mentions) {
                Some(element) => parsed.push(element),
                None => parsed.push_literal(tag),
            },
        }
    }
}

fn reply_reference(payload: &Map<String, Value>) -> Option<String> {
    let id = payload.get("message_reference")?.get("message_id")?;
    match id {
        Value::Null => None,
        other => Some(value_to_string(other)),
    }
}

/// Map one attachment to an element typed by its MIME major type.
fn attachment_element(mut data: Attrs) -> MessageElement {
    let content_type = data
        .remove("content_type")
        .map(|v| value_to_string(&v))
        .unwrap_or_default();
    let major = content_type.split('/').next().unwrap_or_default();

    let source = ["src", "url"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .unwrap_or_default();
    let url = if source.starts_with("http") {
        source.to_string()
    } else {
        format!("https://{source}")
    };

    if !matches!(major, "image" | "audio" | "video") {
        return MessageElement::text(url);
    }
    data.insert("file".to_string(), Value::String(url));
    MessageElement::from_parts(major, data).unwrap_or_else(|| MessageElement::text(String::new()))
}
