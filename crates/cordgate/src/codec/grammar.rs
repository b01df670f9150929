//! Inline tag grammar.
//!
//! Message content mixes plain text, quoted spans and bracketed tags:
//!
//! ```text
//! hello <at,user_id=42> "a <b> c" <faceType,faceId=1>
//! ```
//!
//! The scanner finds the leftmost quoted span or tag, emits the text before
//! it, and continues after it. Quoted spans are opaque so that angle brackets
//! typed inside quotes are never read as tags. A tag needs at least one
//! character between `<` and `>`.

use cordgate_protocol::{Attrs, MessageElement};
use serde_json::Value;

/// Paired quote styles treated as opaque text.
const QUOTES: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('`', '`'),
    ('\u{201C}', '\u{201D}'),
    ('\u{2018}', '\u{2019}'),
];

/// Tag kinds the parser turns into elements. Anything else stays literal.
const TAG_KINDS: &[&str] = &[
    "text", "face", "at", "image", "video", "audio", "markdown", "button", "link", "reply", "ark",
    "embed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Plain text between matches.
    Text(&'a str),
    /// A quoted span, quotes included.
    Quoted(&'a str),
    /// A tag, brackets included.
    Tag(&'a str),
}

/// Split `input` into text, quoted spans and tags. Never fails.
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut cursor = 0;
    let mut pos = 0;

    while pos < input.len() {
        let Some(c) = input[pos..].chars().next() else {
            break;
        };
        let after = pos + c.len_utf8();

        if let Some(end) = match_at(input, c, after) {
            if cursor < pos {
                tokens.push(Token::Text(&input[cursor..pos]));
            }
            let span = &input[pos..end];
            tokens.push(if c == '<' {
                Token::Tag(span)
            } else {
                Token::Quoted(span)
            });
            cursor = end;
            pos = end;
        } else {
            pos = after;
        }
    }

    if cursor < input.len() {
        tokens.push(Token::Text(&input[cursor..]));
    }
    tokens
}

/// End offset of a quoted span or tag opened by `c`, whose body starts at
/// `after`, if one matches.
fn match_at(input: &str, c: char, after: usize) -> Option<usize> {
    if c == '<' {
        let close = input[after..].find('>')?;
        return (close > 0).then_some(after + close + 1);
    }
    let (_, closer) = QUOTES.iter().find(|(open, _)| *open == c)?;
    let close = input[after..].find(*closer)?;
    Some(after + close + closer.len_utf8())
}

/// Strip one pair of matching surrounding quotes.
pub fn trim_quote(value: &str) -> &str {
    let mut chars = value.chars();
    let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
        return value;
    };
    if QUOTES.iter().any(|(open, close)| *open == first && *close == last) {
        &value[first.len_utf8()..value.len() - last.len_utf8()]
    } else {
        value
    }
}

/// `word:number`, e.g. `emoji:12`.
fn face_shorthand(kind: &str) -> Option<&str> {
    let (word, number) = kind.split_once(':')?;
    let is_word = !word.is_empty() && word.bytes().all(|b| b.is_ascii_lowercase());
    let is_number = !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit());
    (is_word && is_number).then_some(number)
}

/// Parse `key=val` attribute strings. Keys are lower-cased and values lose
/// their surrounding quotes.
fn parse_attrs<'a>(attrs: impl Iterator<Item = &'a str>) -> Attrs {
    let mut map = Attrs::new();
    for attr in attrs {
        let (key, value) = attr.split_once('=').unwrap_or((attr, ""));
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        map.insert(key, Value::String(trim_quote(value).to_string()));
    }
    map
}

fn single(key: &str, value: &str) -> Attrs {
    let mut map = Attrs::new();
    map.insert(key.to_string(), Value::String(value.to_string()));
    map
}

/// Attributes for a mention of `id`: the matching entry of `mentions` with
/// `id` renamed to `user_id`, or just the id when it is not listed.
fn mention_attrs(id: &str, mentions: &[Value]) -> Attrs {
    let found = mentions
        .iter()
        .filter_map(Value::as_object)
        .find(|m| m.get("id").and_then(Value::as_str) == Some(id));
    match found {
        Some(mention) => mention
            .iter()
            .map(|(k, v)| {
                let key = if k == "id" { "user_id" } else { k.as_str() };
                (key.to_string(), v.clone())
            })
            .collect(),
        None => single("user_id", id),
    }
}

/// Resolve a tag (brackets included) into an element.
///
/// Returns `None` when the kind is not recognized; the caller keeps the
/// original text.
pub fn resolve_tag(tag: &str, mentions: &[Value]) -> Option<MessageElement> {
    let body = tag.strip_prefix('<')?.strip_suffix('>')?;
    let mut parts = body.split(',');
    let raw_kind = parts.next().unwrap_or_default();

    let (kind, attrs) = if raw_kind.starts_with("faceType") {
        let renamed: Vec<String> = parts.map(|a| a.replacen("faceId", "id", 1)).collect();
        ("face", parse_attrs(renamed.iter().map(String::as_str)))
    } else if let Some(target) = raw_kind.strip_prefix('@') {
        if target == "everyone" {
            ("at", single("user_id", "all"))
        } else {
            let id = target.strip_prefix('!').unwrap_or(target);
            if id.is_empty() {
                return None;
            }
            ("at", mention_attrs(id, mentions))
        }
    } else if let Some(channel_id) = raw_kind.strip_prefix('#') {
        if channel_id.is_empty() {
            return None;
        }
        ("link", single("channel_id", channel_id))
    } else if let Some(id) = face_shorthand(raw_kind) {
        ("face", single("id", id))
    } else {
        (raw_kind, parse_attrs(parts))
    };

    if !TAG_KINDS.contains(&kind) {
        return None;
    }
    MessageElement::from_parts(kind, attrs)
}
