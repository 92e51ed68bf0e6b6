use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Name of an output stream surfaced to the client.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// One request from the protocol layer, framed as a line of JSON on stdin.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelRequest {
    Execute {
        code: String,
        #[serde(default)]
        silent: bool,
        #[serde(default)]
        allow_stdin: bool,
    },
    Complete {
        code: String,
        cursor_pos: usize,
    },
    Inspect {
        code: String,
        cursor_pos: usize,
    },
    IsComplete {
        code: String,
    },
    History,
    Shutdown {
        #[serde(default)]
        restart: bool,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    Incomplete,
}

/// Structured reply to one request. Execution failures never surface here;
/// they are conveyed through [`SideMessage`]s, and the status stays `ok`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelReply {
    ExecuteResult {
        status: ReplyStatus,
        execution_count: u64,
    },
    CompleteResult {
        status: ReplyStatus,
        matches: Vec<String>,
        cursor_start: usize,
        cursor_end: usize,
    },
    InspectResult {
        status: ReplyStatus,
        found: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        html: Option<String>,
    },
    IsCompleteResult {
        status: Completeness,
    },
    HistoryResult {
        status: ReplyStatus,
        history: Vec<String>,
    },
    ShutdownResult {
        status: ReplyStatus,
        restart: bool,
    },
    Error {
        message: String,
    },
}

/// Side-channel message emitted while a request is being handled: stream
/// text or a rendered display artifact. Binary artifact payloads are
/// base64-encoded strings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideMessage {
    Stream { name: StreamName, text: String },
    DisplayData { mime_type: String, data: String },
}

impl SideMessage {
    pub fn stdout(text: impl Into<String>) -> Self {
        SideMessage::Stream {
            name: StreamName::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        SideMessage::Stream {
            name: StreamName::Stderr,
            text: text.into(),
        }
    }
}

/// Sink for side-channel messages. Execution runs on a blocking thread while
/// wrapper capture forwards chunks from pipe reader threads, so senders must
/// be shareable across threads.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: SideMessage);
}

static STDOUT_WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Serializes a value as one line of JSON on stdout. Replies and side
/// messages share this writer so lines never interleave.
pub fn write_json_line<T: Serialize>(value: &T) {
    let Ok(text) = serde_json::to_string(value) else {
        return;
    };
    let _guard = STDOUT_WRITE_LOCK.lock().unwrap();
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    let _ = writeln!(stdout, "{text}");
    let _ = stdout.flush();
}

/// [`MessageSink`] that writes each side message to stdout as JSON lines.
pub struct StdoutMessageWriter;

impl MessageSink for StdoutMessageWriter {
    fn send(&self, message: SideMessage) {
        write_json_line(&message);
    }
}
