//! Messages and their `text/event-stream` wire framing.
//!
//! A [`Message`] is what callers hand to [`crate::Channel::send`]; a [`Frame`]
//! is the immutable wire text that ends up on every connection and in the
//! replay history.
use axum::body::Bytes;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

const PING: &[u8] = b":\n";

/// Payload of a message.
///
/// Structured values are only meaningful on the wire when the channel has
/// `json_encode` enabled; otherwise they are rendered with their `Debug`
/// representation, which is deliberately opaque.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Text(String),
    Binary(Vec<u8>),
    Value(Value),
}

impl Data {
    /// Renders the payload as the text that goes into `data:` lines.
    pub fn render(&self, json_encode: bool) -> Cow<'_, str> {
        match (self, json_encode) {
            (Data::Text(text), false) => Cow::Borrowed(text),
            (Data::Text(text), true) => Cow::Owned(Value::from(text.as_str()).to_string()),
            (Data::Binary(bytes), false) => String::from_utf8_lossy(bytes),
            (Data::Binary(bytes), true) => {
                Cow::Owned(Value::from(String::from_utf8_lossy(bytes)).to_string())
            }
            (Data::Value(value), true) => Cow::Owned(value.to_string()),
            (Data::Value(value), false) => match value {
                Value::Null => Cow::Borrowed(""),
                Value::String(text) => Cow::Borrowed(text),
                Value::Bool(_) | Value::Number(_) => Cow::Owned(value.to_string()),
                Value::Array(_) | Value::Object(_) => Cow::Owned(format!("{value:?}")),
            },
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Data::Text(String::new())
    }
}

impl From<&str> for Data {
    fn from(text: &str) -> Self {
        Data::Text(text.to_owned())
    }
}

impl From<String> for Data {
    fn from(text: String) -> Self {
        Data::Text(text)
    }
}

impl From<Vec<u8>> for Data {
    fn from(bytes: Vec<u8>) -> Self {
        Data::Binary(bytes)
    }
}

// JSON strings and nulls are plain text; keeping them as `Text` means they
// frame identically whichever way they were built.
impl From<Value> for Data {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Data::default(),
            Value::String(text) => Data::Text(text),
            other => Data::Value(other),
        }
    }
}

impl<'de> Deserialize<'de> for Data {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Data::from)
    }
}

/// A logical event to broadcast.
///
/// Ids and retry values of zero are treated as absent: such messages are
/// delivered live but never recorded in history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub data: Data,
    #[serde(default, deserialize_with = "positive")]
    pub id: Option<u64>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "positive")]
    pub retry: Option<u64>,
}

impl Message {
    pub fn new(data: impl Into<Data>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_retry(mut self, retry_millis: u64) -> Self {
        self.retry = Some(retry_millis);
        self
    }

    /// The id this message is addressable by, if any.
    pub fn event_id(&self) -> Option<u64> {
        self.id.filter(|id| *id > 0)
    }

    /// Frames the message as `event`, `retry`, `id` and `data` lines followed
    /// by the blank line that terminates an event. Never fails.
    pub fn frame(&self, json_encode: bool) -> Frame {
        let mut output = String::new();

        if let Some(event) = &self.event {
            output.push_str("event: ");
            output.push_str(event);
            output.push('\n');
        }

        if let Some(retry) = self.retry.filter(|retry| *retry > 0) {
            output.push_str(&format!("retry: {retry}\n"));
        }

        if let Some(id) = self.event_id() {
            output.push_str(&format!("id: {id}\n"));
        }

        push_data_lines(&mut output, &self.data.render(json_encode));

        Frame::from(output)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::new(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::new(text)
    }
}

/// Splits `text` on any line terminator and emits one `data:` line per line,
/// closing the event with a blank line.
fn push_data_lines(output: &mut String, text: &str) {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = normalized.split('\n').peekable();

    while let Some(line) = lines.next() {
        output.push_str("data: ");
        output.push_str(line);
        output.push_str(if lines.peek().is_none() { "\n\n" } else { "\n" });
    }
}

fn positive<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<i64>::deserialize(deserializer)?;
    Ok(value.filter(|v| *v > 0).map(|v| v as u64))
}

/// Immutable, cheaply clonable wire text.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// The keep-alive comment sent by the ping timer.
    pub fn ping() -> Self {
        Frame(Bytes::from_static(PING))
    }

    /// A bare `retry:` line, used when the reconnection delay changes.
    pub fn retry(retry_millis: u64) -> Self {
        Frame::from(format!("retry: {retry_millis}\n"))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame(Bytes::from(text))
    }
}

impl From<&'static str> for Frame {
    fn from(text: &'static str) -> Self {
        Frame(Bytes::from_static(text.as_bytes()))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Frame").field(&self.text()).finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text())
    }
}
