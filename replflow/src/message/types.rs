//! Protocol message types.

use super::StreamKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a [`SyncMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// A data record.
    Record,
    /// A checkpoint.
    State,
    /// Errors, analytics, and stream status.
    Trace,
    /// Connector log output.
    Log,
    /// Connector control requests.
    Control,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record => write!(f, "RECORD"),
            Self::State => write!(f, "STATE"),
            Self::Trace => write!(f, "TRACE"),
            Self::Log => write!(f, "LOG"),
            Self::Control => write!(f, "CONTROL"),
        }
    }
}

/// One protocol unit exchanged with a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    /// A data record.
    Record(RecordMessage),
    /// A checkpoint.
    State(StateMessage),
    /// A trace (error, analytics, stream status).
    Trace(TraceMessage),
    /// A log line.
    Log(LogMessage),
    /// A control request.
    Control(ControlMessage),
}

impl SyncMessage {
    /// Returns the kind of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Record(_) => MessageKind::Record,
            Self::State(_) => MessageKind::State,
            Self::Trace(_) => MessageKind::Trace,
            Self::Log(_) => MessageKind::Log,
            Self::Control(_) => MessageKind::Control,
        }
    }

    /// Creates a record message.
    #[must_use]
    pub fn record(stream: StreamKey, data: serde_json::Value) -> Self {
        Self::Record(RecordMessage {
            stream,
            data,
            emitted_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Creates a per-stream state message.
    #[must_use]
    pub fn stream_state(stream: StreamKey, data: serde_json::Value) -> Self {
        Self::State(StateMessage {
            stream: Some(stream),
            data,
        })
    }

    /// Creates a global state message.
    #[must_use]
    pub fn global_state(data: serde_json::Value) -> Self {
        Self::State(StateMessage { stream: None, data })
    }

    /// Creates a stream status trace.
    #[must_use]
    pub fn stream_status(stream: StreamKey, status: StreamStatus) -> Self {
        Self::Trace(TraceMessage::new(TracePayload::StreamStatus(StreamStatusTrace {
            stream,
            status,
        })))
    }

    /// Creates an error trace.
    #[must_use]
    pub fn error_trace(message: impl Into<String>, failure_type: Option<TraceFailureType>) -> Self {
        Self::Trace(TraceMessage::new(TracePayload::Error(ErrorTrace {
            message: message.into(),
            internal_message: None,
            stack_trace: None,
            failure_type,
        })))
    }

    /// Creates a log message.
    #[must_use]
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log(LogMessage {
            level,
            message: message.into(),
        })
    }

    /// Returns the stream this message belongs to, when it names one.
    #[must_use]
    pub fn stream(&self) -> Option<&StreamKey> {
        match self {
            Self::Record(record) => Some(&record.stream),
            Self::State(state) => state.stream.as_ref(),
            Self::Trace(trace) => match &trace.payload {
                TracePayload::StreamStatus(status) => Some(&status.stream),
                TracePayload::Error(_) | TracePayload::Analytics(_) => None,
            },
            Self::Log(_) | Self::Control(_) => None,
        }
    }
}

/// A data record belonging to one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    /// The owning stream.
    pub stream: StreamKey,
    /// The record payload.
    pub data: serde_json::Value,
    /// Epoch milliseconds at which the source emitted the record.
    pub emitted_at: i64,
}

impl RecordMessage {
    /// Returns the serialized size of the payload in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        serde_json::to_vec(&self.data).map_or(0, |bytes| bytes.len() as u64)
    }
}

/// A checkpoint for one stream, or for all streams when `stream` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    /// The stream this checkpoint covers; `None` for a global checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamKey>,
    /// Opaque connector state.
    pub data: serde_json::Value,
}

/// A trace message with its emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMessage {
    /// Epoch milliseconds at which the trace was emitted.
    pub emitted_at: i64,
    /// The trace payload.
    pub payload: TracePayload,
}

impl TraceMessage {
    /// Creates a trace stamped with the current time.
    #[must_use]
    pub fn new(payload: TracePayload) -> Self {
        Self {
            emitted_at: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }
}

/// The sub-kinds of trace messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trace_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TracePayload {
    /// A connector-reported error.
    Error(ErrorTrace),
    /// A connector analytics event.
    Analytics(AnalyticsTrace),
    /// A stream lifecycle update.
    StreamStatus(StreamStatusTrace),
}

/// Failure classification reported by connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceFailureType {
    /// Configuration error.
    ConfigError,
    /// System error.
    SystemError,
    /// Transient error.
    TransientError,
}

/// An error reported by a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTrace {
    /// User-facing message.
    pub message: String,
    /// Operator-facing message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    /// Connector stack trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Failure classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<TraceFailureType>,
}

/// An analytics event reported by a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsTrace {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Optional value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Lifecycle status of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    /// The stream started.
    Started,
    /// The stream is producing data.
    Running,
    /// The stream finished successfully.
    Complete,
    /// The stream stopped before completing.
    Incomplete,
}

/// A stream lifecycle update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatusTrace {
    /// The stream.
    pub stream: StreamKey,
    /// The new status.
    pub status: StreamStatus,
}

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    /// Trace.
    Trace,
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Warn.
    Warn,
    /// Error.
    Error,
    /// Fatal.
    Fatal,
}

/// A log line emitted by a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Severity.
    pub level: LogLevel,
    /// The log text.
    pub message: String,
}

/// A control message asking the platform to persist a new connector config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Epoch milliseconds at which the message was emitted.
    pub emitted_at: i64,
    /// The updated connector configuration.
    pub connector_config: serde_json::Value,
}
