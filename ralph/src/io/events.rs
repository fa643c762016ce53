//! Decoding of the agent's structured event stream (`--output-format stream-json`).
//!
//! One JSON object per line. Lines that fail to decode are counted and skipped;
//! a partial or corrupted stream never fails the iteration.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// A decoded event, reduced to the kinds the loop cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    AssistantText(String),
    ToolUse { name: String, input: Value },
    ToolResult { content: String, is_error: bool },
    /// Final summary line emitted when the agent session ends.
    Result { text: String, is_error: bool },
}

/// Result of decoding a captured stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedStream {
    pub events: Vec<AgentEvent>,
    /// Non-empty lines that were not valid event JSON.
    pub malformed_lines: usize,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Assistant {
        message: WireMessage,
    },
    User {
        message: WireMessage,
    },
    Result {
        #[serde(default)]
        result: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: WireContent,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireContent {
    Blocks(Vec<WireBlock>),
    Text(String),
}

impl Default for WireContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Decode every line of a captured stream.
pub fn decode_stream(bytes: &[u8]) -> DecodedStream {
    let mut decoded = DecodedStream::default();
    for line in bytes.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<WireEvent>(line) {
            Ok(event) => push_event(&mut decoded.events, event),
            Err(err) => {
                debug!(err = %err, "skipping malformed stream line");
                decoded.malformed_lines += 1;
            }
        }
    }
    decoded
}

fn push_event(events: &mut Vec<AgentEvent>, event: WireEvent) {
    match event {
        WireEvent::Assistant { message } => match message.content {
            WireContent::Text(text) => events.push(AgentEvent::AssistantText(text)),
            WireContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        WireBlock::Text { text } => events.push(AgentEvent::AssistantText(text)),
                        WireBlock::ToolUse { name, input } => {
                            events.push(AgentEvent::ToolUse { name, input });
                        }
                        WireBlock::ToolResult { .. } | WireBlock::Other => {}
                    }
                }
            }
        },
        WireEvent::User { message } => {
            if let WireContent::Blocks(blocks) = message.content {
                for block in blocks {
                    if let WireBlock::ToolResult { content, is_error } = block {
                        events.push(AgentEvent::ToolResult {
                            content: flatten_content(&content),
                            is_error,
                        });
                    }
                }
            }
        }
        WireEvent::Result { result, is_error } => events.push(AgentEvent::Result {
            text: result,
            is_error,
        }),
        WireEvent::Other => {}
    }
}

/// Tool results carry either a string or a list of `{type: text, text}` parts.
fn flatten_content(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

impl DecodedStream {
    /// All assistant text, in order, one paragraph per event.
    pub fn assistant_text(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                AgentEvent::AssistantText(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Human-readable transcript for debug capture.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            match event {
                AgentEvent::AssistantText(text) => {
                    out.push_str(text);
                    out.push_str("\n\n");
                }
                AgentEvent::ToolUse { name, input } => {
                    out.push_str(&format!("[tool] {name} {input}\n"));
                }
                AgentEvent::ToolResult { content, is_error } => {
                    let label = if *is_error { "tool error" } else { "tool result" };
                    out.push_str(&format!("[{label}] {}\n", first_line(content)));
                }
                AgentEvent::Result { text, is_error } => {
                    let label = if *is_error { "result (error)" } else { "result" };
                    out.push_str(&format!("[{label}] {text}\n"));
                }
            }
        }
        if self.malformed_lines > 0 {
            out.push_str(&format!("[{} malformed lines skipped]\n", self.malformed_lines));
        }
        out
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
