//! Core types for Duplex: the typed vocabulary shared by model sessions,
//! the event loop, and applications.
//!
//! Model providers emit loosely-shaped JSON records discriminated by a `type`
//! tag. Here they become a closed [`ModelEvent`] enum with an `Other` arm, so
//! the dispatcher can match exhaustively while still forwarding event kinds
//! it does not know about.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ─────────────────────────────────────────────
// Event type tags
// ─────────────────────────────────────────────

/// `type` tag of an interruption event.
pub const INTERRUPTION_EVENT: &str = "bidirectional_interruption";
/// `type` tag of a (possibly partial) tool-use event.
pub const TOOL_USE_EVENT: &str = "tool_use_stream";
/// `type` tag of a transcript event.
pub const TRANSCRIPT_EVENT: &str = "bidirectional_transcript_stream";
/// `type` tag of an audio output chunk.
pub const AUDIO_STREAM_EVENT: &str = "bidirectional_audio_stream";

// ─────────────────────────────────────────────
// Conversation messages
// ─────────────────────────────────────────────

/// Who produced a message or transcript.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversation history entry, `{"role": ..., "content": ...}`.
///
/// History is replayed verbatim to the model session on (re)connect.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

/// Tool description handed to the model session on connect.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool input (`{"type": "object", ...}`).
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        ToolSpec {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A complete tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

impl ToolUse {
    pub fn new(tool_use_id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ToolUse {
            tool_use_id: tool_use_id.into(),
            name: name.into(),
            input,
        }
    }
}

/// A tool invocation as it is being streamed by the provider.
///
/// Any field may still be missing while deltas arrive. `input` is either a
/// JSON object or the JSON text of one.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartialToolUse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl PartialToolUse {
    /// The finished [`ToolUse`], if name, id, and input are all present.
    pub fn complete(&self) -> Option<ToolUse> {
        let id = self.tool_use_id.as_deref().filter(|s| !s.is_empty())?;
        let name = self.name.as_deref().filter(|s| !s.is_empty())?;
        let input = match self.input.as_ref()? {
            Value::Null => return None,
            // Streamed JSON text is only usable once it parses.
            Value::String(raw) => serde_json::from_str::<Value>(raw).ok()?,
            other => other.clone(),
        };
        Some(ToolUse::new(id, name, input))
    }
}

impl From<ToolUse> for PartialToolUse {
    fn from(tool_use: ToolUse) -> Self {
        PartialToolUse {
            tool_use_id: Some(tool_use.tool_use_id),
            name: Some(tool_use.name),
            input: Some(tool_use.input),
        }
    }
}

/// Outcome of a tool invocation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    Success,
    Error,
}

/// Result sent back into the model session for one tool use.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_use_id: String,
    pub status: ToolResultStatus,
    pub content: String,
}

impl ToolResult {
    pub fn success(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ToolResult {
            tool_use_id: tool_use_id.into(),
            status: ToolResultStatus::Success,
            content: content.into(),
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ToolResult {
            tool_use_id: tool_use_id.into(),
            status: ToolResultStatus::Error,
            content: content.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolResultStatus::Error
    }
}

// ─────────────────────────────────────────────
// Model output events
// ─────────────────────────────────────────────

/// The user started speaking/typing over the model's response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InterruptionEvent {
    pub reason: String,
}

/// A tool invocation being assembled by the provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolUseStreamEvent {
    pub current_tool_use: PartialToolUse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Value>,
}

/// Speech-to-text (user) or text/speech output (assistant).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEvent {
    pub source: Role,
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

/// A chunk of audio output, base64-encoded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AudioStreamEvent {
    pub audio: String,
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// An event produced by the model session.
///
/// Serializes to the provider's flat `{"type": ..., ...fields}` shape. A record
/// with an unknown tag, or a known tag whose fields do not parse, becomes
/// [`ModelEvent::Other`] and is kept verbatim.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelEvent {
    Interruption(InterruptionEvent),
    ToolUse(ToolUseStreamEvent),
    Transcript(TranscriptEvent),
    AudioStream(AudioStreamEvent),
    Other(Value),
}

impl ModelEvent {
    /// Interruption event with the given reason.
    pub fn interruption(reason: impl Into<String>) -> Self {
        ModelEvent::Interruption(InterruptionEvent {
            reason: reason.into(),
        })
    }

    /// Tool-use event carrying a complete invocation.
    pub fn tool_use(tool_use: ToolUse) -> Self {
        ModelEvent::ToolUse(ToolUseStreamEvent {
            current_tool_use: tool_use.into(),
            delta: None,
        })
    }

    /// Transcript event.
    pub fn transcript(source: Role, text: impl Into<String>, is_final: bool) -> Self {
        ModelEvent::Transcript(TranscriptEvent {
            source,
            text: text.into(),
            is_final,
        })
    }

    /// Audio chunk event.
    pub fn audio(audio: impl Into<String>, format: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        ModelEvent::AudioStream(AudioStreamEvent {
            audio: audio.into(),
            format: format.into(),
            sample_rate,
            channels,
        })
    }

    /// The `type` tag of this event (`"unknown"` for untagged records).
    pub fn event_type(&self) -> &str {
        match self {
            ModelEvent::Interruption(_) => INTERRUPTION_EVENT,
            ModelEvent::ToolUse(_) => TOOL_USE_EVENT,
            ModelEvent::Transcript(_) => TRANSCRIPT_EVENT,
            ModelEvent::AudioStream(_) => AUDIO_STREAM_EVENT,
            ModelEvent::Other(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }

    /// Classify a raw provider record.
    pub fn from_value(value: Value) -> Self {
        let parsed = match value.get("type").and_then(Value::as_str) {
            Some(INTERRUPTION_EVENT) => serde_json::from_value(value.clone())
                .ok()
                .map(ModelEvent::Interruption),
            Some(TOOL_USE_EVENT) => serde_json::from_value(value.clone())
                .ok()
                .map(ModelEvent::ToolUse),
            Some(TRANSCRIPT_EVENT) => serde_json::from_value(value.clone())
                .ok()
                .map(ModelEvent::Transcript),
            Some(AUDIO_STREAM_EVENT) => serde_json::from_value(value.clone())
                .ok()
                .map(ModelEvent::AudioStream),
            _ => None,
        };
        parsed.unwrap_or(ModelEvent::Other(value))
    }

    /// Flat JSON representation with the `type` tag inlined.
    pub fn to_value(&self) -> Value {
        let body = match self {
            ModelEvent::Interruption(e) => serde_json::to_value(e),
            ModelEvent::ToolUse(e) => serde_json::to_value(e),
            ModelEvent::Transcript(e) => serde_json::to_value(e),
            ModelEvent::AudioStream(e) => serde_json::to_value(e),
            ModelEvent::Other(value) => return value.clone(),
        };
        let mut body = body.unwrap_or_else(|_| Value::Object(Default::default()));
        if let Value::Object(ref mut map) = body {
            map.insert("type".into(), Value::String(self.event_type().to_string()));
        }
        body
    }
}

impl Serialize for ModelEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ModelEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ModelEvent::from_value)
    }
}

// ─────────────────────────────────────────────
// Application input
// ─────────────────────────────────────────────

/// Audio input payload, `{audioData, format, sampleRate, channels}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioInput {
    /// Base64-encoded audio bytes.
    pub audio_data: String,
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Image input payload, `{imageData, mimeType, encoding}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    pub image_data: String,
    pub mime_type: String,
    /// Encoding of `image_data` (e.g. `"base64"`).
    pub encoding: String,
}

/// Anything an application can send into a live conversation.
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    Text(String),
    Audio(AudioInput),
    Image(ImageInput),
}

impl InputEvent {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InputEvent::Text(_) => "text",
            InputEvent::Audio(_) => "audio",
            InputEvent::Image(_) => "image",
        }
    }
}

impl From<&str> for InputEvent {
    fn from(text: &str) -> Self {
        InputEvent::Text(text.to_string())
    }
}

impl From<String> for InputEvent {
    fn from(text: String) -> Self {
        InputEvent::Text(text)
    }
}

impl From<AudioInput> for InputEvent {
    fn from(audio: AudioInput) -> Self {
        InputEvent::Audio(audio)
    }
}

impl From<ImageInput> for InputEvent {
    fn from(image: ImageInput) -> Self {
        InputEvent::Image(image)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Messages ──

    #[test]
    fn test_user_message_serialization() {
        let json = serde_json::to_value(Message::user("Hello world")).unwrap();
        assert_eq!(json, json!({"role": "user", "content": "Hello world"}));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    // ── Event classification ──

    #[test]
    fn test_classify_interruption() {
        let event = ModelEvent::from_value(json!({
            "type": "bidirectional_interruption",
            "reason": "user_speech"
        }));
        assert_eq!(event, ModelEvent::interruption("user_speech"));
        assert_eq!(event.event_type(), INTERRUPTION_EVENT);
    }

    #[test]
    fn test_classify_tool_use() {
        let event = ModelEvent::from_value(json!({
            "type": "tool_use_stream",
            "current_tool_use": {
                "name": "calculator",
                "toolUseId": "tool-123",
                "input": {"expression": "2+2"}
            }
        }));
        let ModelEvent::ToolUse(stream) = event else {
            panic!("expected tool use event");
        };
        let tool_use = stream.current_tool_use.complete().unwrap();
        assert_eq!(tool_use.name, "calculator");
        assert_eq!(tool_use.tool_use_id, "tool-123");
        assert_eq!(tool_use.input["expression"], "2+2");
    }

    #[test]
    fn test_classify_transcript() {
        let event = ModelEvent::from_value(json!({
            "type": "bidirectional_transcript_stream",
            "source": "user",
            "text": "Hello world",
            "is_final": true
        }));
        assert_eq!(event, ModelEvent::transcript(Role::User, "Hello world", true));
    }

    #[test]
    fn test_classify_audio() {
        let event = ModelEvent::from_value(json!({
            "type": "bidirectional_audio_stream",
            "audio": "base64data",
            "format": "pcm",
            "sample_rate": 16000,
            "channels": 1
        }));
        assert_eq!(event, ModelEvent::audio("base64data", "pcm", 16000, 1));
    }

    #[test]
    fn test_unknown_type_kept_verbatim() {
        let raw = json!({"type": "usage_metrics", "inputTokens": 12});
        let event = ModelEvent::from_value(raw.clone());
        assert_eq!(event.event_type(), "usage_metrics");
        assert_eq!(event.to_value(), raw);
    }

    #[test]
    fn test_malformed_known_type_becomes_other() {
        // transcript without text
        let raw = json!({"type": "bidirectional_transcript_stream", "source": "user"});
        let event = ModelEvent::from_value(raw.clone());
        assert!(matches!(event, ModelEvent::Other(_)));
        assert_eq!(event.event_type(), TRANSCRIPT_EVENT);
    }

    #[test]
    fn test_untagged_record_is_other() {
        let event = ModelEvent::from_value(json!("just a string"));
        assert_eq!(event.event_type(), "unknown");
    }

    #[test]
    fn test_to_value_inlines_type_tag() {
        let value = ModelEvent::transcript(Role::Assistant, "4", true).to_value();
        assert_eq!(value["type"], TRANSCRIPT_EVENT);
        assert_eq!(value["source"], "assistant");
        assert_eq!(value["is_final"], true);
    }

    #[test]
    fn test_tool_use_event_wire_shape() {
        let event = ModelEvent::tool_use(ToolUse::new("t1", "calculator", json!({"x": 1})));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], TOOL_USE_EVENT);
        assert_eq!(value["current_tool_use"]["toolUseId"], "t1");
        assert!(value.get("delta").is_none());
    }

    // ── Partial tool use ──

    #[test]
    fn test_partial_tool_use_incomplete() {
        let partial = PartialToolUse {
            tool_use_id: Some("t1".into()),
            name: Some("calculator".into()),
            input: None,
        };
        assert!(partial.complete().is_none());

        let no_id = PartialToolUse {
            tool_use_id: Some(String::new()),
            name: Some("calculator".into()),
            input: Some(json!({})),
        };
        assert!(no_id.complete().is_none());
    }

    #[test]
    fn test_partial_tool_use_string_input() {
        let half = PartialToolUse {
            tool_use_id: Some("t1".into()),
            name: Some("calculator".into()),
            input: Some(json!("{\"operation\": \"ad")),
        };
        assert!(half.complete().is_none());

        let whole = PartialToolUse {
            input: Some(json!("{\"operation\": \"add\"}")),
            ..half
        };
        assert_eq!(whole.complete().unwrap().input, json!({"operation": "add"}));
    }

    // ── Tool results ──

    #[test]
    fn test_tool_result_serialization() {
        let result = ToolResult::error("t9", "boom");
        assert!(result.is_error());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, json!({"toolUseId": "t9", "status": "error", "content": "boom"}));
    }

    // ── Inputs ──

    #[test]
    fn test_audio_input_camel_case() {
        let audio: AudioInput = serde_json::from_value(json!({
            "audioData": "AAAA",
            "format": "pcm",
            "sampleRate": 16000,
            "channels": 1
        }))
        .unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(InputEvent::from(audio).kind(), "audio");
    }

    #[test]
    fn test_input_from_str() {
        assert_eq!(InputEvent::from("hi"), InputEvent::Text("hi".into()));
    }
}
