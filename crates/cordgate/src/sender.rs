//! Outbound message encoding.
//!
//! [`MessageEncoder`] turns a [`Sendable`] into the REST payload for one
//! target without touching the network; [`MessageSender`] delivers it.

use std::fmt;

use cordgate_protocol::{Attrs, MessageElement, Segment, Sendable};
use rand::Rng;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiClient, ApiError};
use crate::codec;

/// Buttons per keyboard row.
const ROW_WIDTH: usize = 5;

const FILE_TYPE_IMAGE: u8 = 1;
const FILE_TYPE_VIDEO: u8 = 2;
const FILE_TYPE_AUDIO: u8 = 3;

const MSG_TYPE_MARKDOWN: u8 = 2;
const MSG_TYPE_ARK: u8 = 3;
const MSG_TYPE_EMBED: u8 = 4;
const MSG_TYPE_MEDIA: u8 = 7;

// ============================================================================
// Target
// ============================================================================

/// The two REST surfaces. The secondary one lives under `/v2` and handles
/// media through a separate file endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiSurface {
    Primary,
    Secondary,
}

/// Where a message goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Channel(String),
    Direct(String),
    Group(String),
    User(String),
}

impl Target {
    pub fn base_path(&self) -> String {
        match self {
            Target::Channel(id) => format!("/channels/{id}"),
            Target::Direct(id) => format!("/dms/{id}"),
            Target::Group(id) => format!("/v2/groups/{id}"),
            Target::User(id) => format!("/v2/users/{id}"),
        }
    }

    pub fn surface(&self) -> ApiSurface {
        match self {
            Target::Channel(_) | Target::Direct(_) => ApiSurface::Primary,
            Target::Group(_) | Target::User(_) => ApiSurface::Secondary,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Channel(id) => write!(f, "Channel({id})"),
            Target::Direct(id) => write!(f, "Direct({id})"),
            Target::Group(id) => write!(f, "Group({id})"),
            Target::User(id) => write!(f, "User({id})"),
        }
    }
}

// ============================================================================
// Encoded message
// ============================================================================

/// How an encoded message is delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// POST the payload to `/messages`.
    Message,
    /// POST this body to `/files`; the platform sends it as the message.
    File(Map<String, Value>),
    /// POST this body to `/files`, embed the returned `file_info` as
    /// `media`, then POST the payload to `/messages`.
    UploadThenMessage(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedMessage {
    pub target: Target,
    pub payload: Map<String, Value>,
    pub delivery: Delivery,
    /// Log rendering in the inbound tag grammar.
    pub brief: String,
}

// ============================================================================
// MessageEncoder
// ============================================================================

pub struct MessageEncoder {
    target: Target,
    payload: Map<String, Value>,
    content: String,
    buttons: Vec<Value>,
    upload: Option<Map<String, Value>>,
    reply_to: Option<String>,
    brief: String,
}

impl MessageEncoder {
    /// Encode `message` for `target`. `source` is the id of the message being
    /// replied to, if any; a reply element in the message overrides it.
    pub fn encode(target: Target, message: Sendable, source: Option<&str>) -> EncodedMessage {
        let mut payload = Map::new();
        payload.insert(
            "msg_seq".to_string(),
            json!(rand::rng().random_range(1..1_000_000)),
        );

        let mut encoder = Self {
            target,
            payload,
            content: String::new(),
            buttons: Vec::new(),
            upload: None,
            reply_to: source.map(str::to_string),
            brief: String::new(),
        };

        for segment in message.into_segments() {
            match segment {
                Segment::Text(template) => {
                    for element in codec::parse_template(&template) {
                        encoder.push(element);
                    }
                }
                Segment::Element(element) => encoder.push(element),
            }
        }
        encoder.finish()
    }

    fn secondary(&self) -> bool {
        self.target.surface() == ApiSurface::Secondary
    }

    fn push(&mut self, element: MessageElement) {
        self.brief.push_str(&element.brief());

        match element {
            MessageElement::Text { text } => self.content.push_str(&text),
            MessageElement::At { user_id, .. } => {
                let who = if user_id == "all" {
                    "everyone"
                } else {
                    user_id.as_str()
                };
                self.content.push_str(&format!("<@{who}>"));
            }
            MessageElement::Link { channel_id, .. } => {
                self.content.push_str(&format!("<#{channel_id}>"));
            }
            MessageElement::Face { id, .. } => {
                self.content.push_str(&format!("<emoji:{id}>"));
            }
            MessageElement::Reply { id, .. } => self.reply_to = Some(id),
            MessageElement::Image { file, .. } => self.push_media(file, FILE_TYPE_IMAGE),
            MessageElement::Video { file, .. } => self.push_media(file, FILE_TYPE_VIDEO),
            MessageElement::Audio { file, .. } => self.push_media(file, FILE_TYPE_AUDIO),
            MessageElement::Markdown { attrs } => {
                self.payload.insert("markdown".to_string(), Value::Object(attrs));
                self.payload
                    .insert("msg_type".to_string(), json!(MSG_TYPE_MARKDOWN));
            }
            MessageElement::Keyboard { attrs } => {
                self.payload.insert("keyboard".to_string(), Value::Object(attrs));
                self.payload
                    .insert("msg_type".to_string(), json!(MSG_TYPE_MARKDOWN));
            }
            MessageElement::Button { attrs } => self.buttons.push(Value::Object(attrs)),
            MessageElement::Ark { attrs } => self.push_template("ark", MSG_TYPE_ARK, attrs),
            MessageElement::Embed { attrs } => self.push_template("embed", MSG_TYPE_EMBED, attrs),
        }
    }

    fn push_media(&mut self, file: String, file_type: u8) {
        let url = if file.starts_with("http") {
            file
        } else {
            format!("http://{file}")
        };
        if self.secondary() {
            let mut upload = Map::new();
            upload.insert("file_type".to_string(), json!(file_type));
            upload.insert("url".to_string(), json!(url));
            self.upload = Some(upload);
        } else {
            self.payload.insert("image".to_string(), json!(url));
        }
    }

    /// Ark and embed are exclusive payload modes of the primary surface.
    fn push_template(&mut self, key: &str, msg_type: u8, attrs: Attrs) {
        if self.secondary() {
            debug!(kind = key, target = %self.target, "Dropping element unsupported on target");
            return;
        }
        for other in ["ark", "embed"] {
            self.payload.remove(other);
        }
        self.payload.insert(key.to_string(), Value::Object(attrs));
        self.payload.insert("msg_type".to_string(), json!(msg_type));
    }

    fn is_richer(&self) -> bool {
        !self.content.trim().is_empty()
            || ["markdown", "keyboard", "ark", "embed"]
                .iter()
                .any(|key| self.payload.contains_key(*key))
    }

    fn finish(mut self) -> EncodedMessage {
        if !self.buttons.is_empty() {
            let rows: Vec<Value> = keyboard_rows(std::mem::take(&mut self.buttons))
                .into_iter()
                .map(|row| json!({ "buttons": row }))
                .collect();
            self.payload
                .insert("keyboard".to_string(), json!({ "content": { "rows": rows } }));
        }

        if let Some(id) = &self.reply_to {
            self.payload.insert("msg_id".to_string(), json!(id));
        }

        let delivery = match self.upload.take() {
            None => Delivery::Message,
            Some(mut upload) if self.reply_to.is_some() || self.is_richer() => {
                upload.insert("srv_send_msg".to_string(), json!(false));
                if self.content.is_empty() {
                    self.content.push(' ');
                }
                self.payload
                    .insert("msg_type".to_string(), json!(MSG_TYPE_MEDIA));
                Delivery::UploadThenMessage(upload)
            }
            Some(mut upload) => {
                upload.insert("srv_send_msg".to_string(), json!(true));
                Delivery::File(upload)
            }
        };

        self.payload
            .insert("content".to_string(), Value::String(self.content));
        EncodedMessage {
            target: self.target,
            payload: self.payload,
            delivery,
            brief: self.brief,
        }
    }
}

/// Lay buttons out in rows of [`ROW_WIDTH`]. A button that carries its own
/// `buttons` array is a complete row: it closes the current row and is
/// passed through as-is.
fn keyboard_rows(buttons: Vec<Value>) -> Vec<Vec<Value>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();

    for button in buttons {
        if let Some(Value::Array(full_row)) = button.get("buttons") {
            if !row.is_empty() {
                rows.push(std::mem::take(&mut row));
            }
            rows.push(full_row.clone());
            continue;
        }
        if row.len() == ROW_WIDTH {
            rows.push(std::mem::take(&mut row));
        }
        row.push(button);
    }
    if !row.is_empty() {
        rows.push(row);
    }
    rows
}

// ============================================================================
// MessageSender
// ============================================================================

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("file upload response has no file_info")]
    MissingFileInfo,
}

/// Delivers encoded messages. Failures are returned as-is, with no retry.
#[derive(Debug, Clone)]
pub struct MessageSender {
    api: ApiClient,
}

impl MessageSender {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Encode and deliver `message`, logging its brief.
    pub async fn send_message(
        &self,
        target: Target,
        message: Sendable,
        source: Option<&str>,
    ) -> Result<Value, SendError> {
        let encoded = MessageEncoder::encode(target, message, source);
        let brief = encoded.brief.clone();
        let target = encoded.target.clone();
        let result = self.send(encoded).await?;
        info!("send to {target}: {brief}");
        Ok(result)
    }

    pub async fn send(&self, encoded: EncodedMessage) -> Result<Value, SendError> {
        let base = encoded.target.base_path();
        let messages = format!("{base}/messages");
        let files = format!("{base}/files");
        let mut payload = encoded.payload;

        match encoded.delivery {
            Delivery::Message => {}
            Delivery::File(body) => {
                return Ok(self.api.post_json(&files, &Value::Object(body)).await?);
            }
            Delivery::UploadThenMessage(body) => {
                let uploaded = self.api.post_json(&files, &Value::Object(body)).await?;
                let file_info = uploaded
                    .get("file_info")
                    .cloned()
                    .ok_or(SendError::MissingFileInfo)?;
                payload.insert("media".to_string(), json!({ "file_info": file_info }));
            }
        }
        Ok(self.api.post_json(&messages, &Value::Object(payload)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// Method, path and JSON body of one request seen by [`http_stub`].
    type Request = (String, String, Value);

    /// Answer one request per connection with the next canned response,
    /// recording each request. The recorder closes once every response has
    /// been served.
    async fn http_stub(
        responses: Vec<(u16, Value)>,
    ) -> (String, mpsc::UnboundedReceiver<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                tx.send(request).unwrap();
                let body = body.to_string();
                let response = format!(
                    "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (base, rx)
    }

    async fn read_request(socket: &mut TcpStream) -> Request {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-request");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next().unwrap().split(' ');
        let method = request_line.next().unwrap().to_string();
        let path = request_line.next().unwrap().to_string();
        let length = lines
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .map(|(_, value)| value.trim().parse::<usize>().unwrap())
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-body");
            buf.extend_from_slice(&chunk[..n]);
        }
        let body =
            serde_json::from_slice(&buf[head_end..head_end + length]).unwrap_or(Value::Null);
        (method, path, body)
    }

    fn sender(base: &str) -> MessageSender {
        let api = ApiClient::new("tok", base, Duration::from_secs(5), None).unwrap();
        MessageSender::new(api)
    }

    async fn requests(mut rx: mpsc::UnboundedReceiver<Request>) -> Vec<Request> {
        let mut seen = Vec::new();
        while let Some(request) = rx.recv().await {
            seen.push(request);
        }
        seen
    }

    fn encode(target: Target, message: impl Into<Sendable>) -> EncodedMessage {
        MessageEncoder::encode(target, message.into(), None)
    }

    fn content(encoded: &EncodedMessage) -> &str {
        encoded.payload["content"].as_str().unwrap()
    }

    fn button(id: &str) -> MessageElement {
        let mut attrs = Attrs::new();
        attrs.insert("id".to_string(), json!(id));
        MessageElement::Button { attrs }
    }

    #[test]
    fn test_brief_round_trips_parsed_tags() {
        let source = "hello <at,user_id=42> world <face,id=1> <link,channel_id=7>";
        let mut raw = Map::new();
        raw.insert("content".to_string(), json!(source));
        let parsed = codec::parse(&mut raw);

        let encoded = encode(Target::Channel("c1".to_string()), parsed.elements);
        assert_eq!(encoded.brief, source);
        assert_eq!(content(&encoded), "hello <@42> world <emoji:1> <#7>");
        assert_eq!(encoded.delivery, Delivery::Message);
    }

    #[test]
    fn test_reply_round_trip() {
        let mut raw = Map::new();
        raw.insert("content".to_string(), json!("ok"));
        raw.insert("message_reference".to_string(), json!({"message_id": "m1"}));
        let parsed = codec::parse(&mut raw);

        let encoded = encode(Target::Channel("c1".to_string()), parsed.elements);
        assert_eq!(encoded.brief, parsed.brief);
        assert_eq!(encoded.payload["msg_id"], "m1");
    }

    #[test]
    fn test_string_templates_match_structured_elements() {
        let from_string = encode(Target::Channel("c".to_string()), "hi <at,user_id=all>");
        let from_elements = encode(
            Target::Channel("c".to_string()),
            vec![MessageElement::text("hi "), MessageElement::at("all")],
        );
        assert_eq!(content(&from_string), "hi <@everyone>");
        assert_eq!(content(&from_string), content(&from_elements));
        assert_eq!(from_string.brief, from_elements.brief);
    }

    #[test]
    fn test_msg_seq_in_range() {
        let encoded = encode(Target::Channel("c".to_string()), "x");
        let seq = encoded.payload["msg_seq"].as_u64().unwrap();
        assert!((1..1_000_000).contains(&seq));
    }

    #[test]
    fn test_source_sets_msg_id() {
        let encoded = MessageEncoder::encode(
            Target::Direct("g1".to_string()),
            "pong".into(),
            Some("src1"),
        );
        assert_eq!(encoded.payload["msg_id"], "src1");
        assert_eq!(encoded.target.base_path(), "/dms/g1");
    }

    #[test]
    fn test_primary_surface_inlines_image() {
        let encoded = encode(
            Target::Channel("c".to_string()),
            MessageElement::image("cdn.example.test/a.png"),
        );
        assert_eq!(encoded.payload["image"], "http://cdn.example.test/a.png");
        assert_eq!(encoded.delivery, Delivery::Message);
    }

    #[test]
    fn test_secondary_surface_media_only_goes_to_files() {
        let encoded = encode(
            Target::Group("g".to_string()),
            MessageElement::image("https://cdn.example.test/a.png"),
        );
        match &encoded.delivery {
            Delivery::File(body) => {
                assert_eq!(body["file_type"], 1);
                assert_eq!(body["url"], "https://cdn.example.test/a.png");
                assert_eq!(body["srv_send_msg"], true);
            }
            other => panic!("expected file delivery, got {other:?}"),
        }
    }

    #[test]
    fn test_secondary_surface_media_with_text_is_embedded() {
        let encoded = encode(
            Target::User("u".to_string()),
            vec![
                MessageElement::text("look"),
                MessageElement::Video {
                    file: "https://cdn.example.test/v.mp4".to_string(),
                    attrs: Attrs::new(),
                },
            ],
        );
        match &encoded.delivery {
            Delivery::UploadThenMessage(body) => {
                assert_eq!(body["file_type"], 2);
                assert_eq!(body["srv_send_msg"], false);
            }
            other => panic!("expected upload then message, got {other:?}"),
        }
        assert_eq!(encoded.payload["msg_type"], 7);
        assert_eq!(content(&encoded), "look");
    }

    #[test]
    fn test_secondary_surface_reply_media_gets_placeholder_content() {
        let encoded = MessageEncoder::encode(
            Target::Group("g".to_string()),
            MessageElement::image("https://x/a.png").into(),
            Some("m1"),
        );
        assert!(matches!(encoded.delivery, Delivery::UploadThenMessage(_)));
        assert_eq!(content(&encoded), " ");
    }

    #[test]
    fn test_ark_and_embed_are_exclusive_and_primary_only() {
        let mut attrs = Attrs::new();
        attrs.insert("template_id".to_string(), json!(23));
        let ark = MessageElement::Ark { attrs };
        let embed = MessageElement::Embed { attrs: Attrs::new() };

        let encoded = encode(Target::Channel("c".to_string()), vec![ark.clone(), embed]);
        assert_eq!(encoded.payload["msg_type"], 4);
        assert!(encoded.payload.contains_key("embed"));
        assert!(!encoded.payload.contains_key("ark"));

        let encoded = encode(Target::Group("g".to_string()), ark);
        assert!(!encoded.payload.contains_key("ark"));
        assert!(!encoded.payload.contains_key("msg_type"));
    }

    #[test]
    fn test_markdown_sets_msg_type() {
        let mut attrs = Attrs::new();
        attrs.insert("content".to_string(), json!("# hi"));
        let encoded = encode(
            Target::Channel("c".to_string()),
            MessageElement::Markdown { attrs },
        );
        assert_eq!(encoded.payload["msg_type"], 2);
        assert_eq!(encoded.payload["markdown"]["content"], "# hi");
    }

    #[test]
    fn test_keyboard_rows_of_five() {
        let buttons: Vec<MessageElement> = (0..7).map(|i| button(&i.to_string())).collect();
        let encoded = encode(Target::Channel("c".to_string()), buttons);
        let rows = encoded.payload["keyboard"]["content"]["rows"]
            .as_array()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["buttons"].as_array().unwrap().len(), 5);
        assert_eq!(rows[1]["buttons"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_full_row_button_passes_through() {
        let mut full = Attrs::new();
        full.insert("buttons".to_string(), json!([{"id": "x"}, {"id": "y"}]));
        let encoded = encode(
            Target::Channel("c".to_string()),
            vec![button("a"), MessageElement::Button { attrs: full }, button("b")],
        );
        let rows = encoded.payload["keyboard"]["content"]["rows"]
            .as_array()
            .unwrap();
        assert_eq!(
            rows,
            &vec![
                json!({"buttons": [{"id": "a"}]}),
                json!({"buttons": [{"id": "x"}, {"id": "y"}]}),
                json!({"buttons": [{"id": "b"}]}),
            ]
        );
    }

    #[tokio::test]
    async fn test_text_posts_to_messages() {
        let (base, rx) = http_stub(vec![(200, json!({ "id": "m9" }))]).await;
        let result = sender(&base)
            .send_message(Target::Channel("c1".to_string()), "hi".into(), None)
            .await
            .unwrap();
        assert_eq!(result, json!({ "id": "m9" }));

        let seen = requests(rx).await;
        assert_eq!(seen.len(), 1);
        let (method, path, body) = &seen[0];
        assert_eq!(method, "POST");
        assert_eq!(path, "/channels/c1/messages");
        assert_eq!(body["content"], "hi");
    }

    #[tokio::test]
    async fn test_file_delivery_posts_only_to_files() {
        let (base, rx) = http_stub(vec![(200, json!({ "id": "f1" }))]).await;
        let encoded = encode(
            Target::Group("g1".to_string()),
            MessageElement::image("https://cdn.example.test/a.png"),
        );
        assert!(matches!(encoded.delivery, Delivery::File(_)));
        sender(&base).send(encoded).await.unwrap();

        let seen = requests(rx).await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, "/v2/groups/g1/files");
        assert_eq!(seen[0].2["srv_send_msg"], true);
    }

    #[tokio::test]
    async fn test_upload_then_message_embeds_file_info() {
        let (base, rx) = http_stub(vec![
            (200, json!({ "file_info": "FILE-INFO" })),
            (200, json!({ "id": "m1" })),
        ])
        .await;
        let encoded = encode(
            Target::User("u1".to_string()),
            vec![
                MessageElement::text("look"),
                MessageElement::image("https://cdn.example.test/a.png"),
            ],
        );
        let result = sender(&base).send(encoded).await.unwrap();
        assert_eq!(result["id"], "m1");

        let seen = requests(rx).await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, "/v2/users/u1/files");
        assert_eq!(seen[0].2["srv_send_msg"], false);
        assert_eq!(seen[1].1, "/v2/users/u1/messages");
        assert_eq!(seen[1].2["media"], json!({ "file_info": "FILE-INFO" }));
        assert_eq!(seen[1].2["msg_type"], 7);
        assert_eq!(seen[1].2["content"], "look");
    }

    #[tokio::test]
    async fn test_upload_without_file_info_fails() {
        let (base, rx) = http_stub(vec![(200, json!({}))]).await;
        let encoded = MessageEncoder::encode(
            Target::Group("g1".to_string()),
            MessageElement::image("https://cdn.example.test/a.png").into(),
            Some("m0"),
        );
        let err = sender(&base).send(encoded).await.unwrap_err();
        assert!(matches!(err, SendError::MissingFileInfo));
        assert_eq!(requests(rx).await.len(), 1);
    }

    #[tokio::test]
    async fn test_api_error_is_returned_without_retry() {
        let (base, rx) = http_stub(vec![(500, json!({ "message": "boom" }))]).await;
        let err = sender(&base)
            .send_message(Target::Direct("g1".to_string()), "hi".into(), None)
            .await
            .unwrap_err();
        match err {
            SendError::Api(ApiError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let seen = requests(rx).await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, "/dms/g1/messages");
    }

    #[test]
    fn test_target_paths() {
        assert_eq!(Target::Channel("1".into()).base_path(), "/channels/1");
        assert_eq!(Target::Group("2".into()).base_path(), "/v2/groups/2");
        assert_eq!(Target::User("3".into()).base_path(), "/v2/users/3");
        assert_eq!(Target::Direct("4".into()).to_string(), "Direct(4)");
    }
}
