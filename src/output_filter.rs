use std::sync::Arc;

use crate::engine::OutputSink;
use crate::protocol::{MessageSink, SideMessage, StreamName};

const BACKSPACE: char = '\u{8}';

/// Engine wrapper noise emitted around guest errors; redundant for notebook
/// clients, so it never reaches them.
const BOILERPLATE: [&str; 2] = ["Error using eval\n", "the MATLAB function has been cancelled\n"];

/// Normalizes one chunk of raw engine output: resolves terminal-style
/// backspaces, rewrites carriage returns as newlines (progress redraws have
/// no notebook analogue), then strips known engine boilerplate.
pub fn normalize_output(text: &str) -> String {
    let mut text = if memchr::memchr(8, text.as_bytes()).is_some() {
        resolve_backspaces(text)
    } else {
        text.to_string()
    };
    if memchr::memchr(b'\r', text.as_bytes()).is_some() {
        text = text.replace('\r', "\n");
    }
    for phrase in BOILERPLATE {
        if text.contains(phrase) {
            text = text.replace(phrase, "");
        }
    }
    text
}

/// Each backspace erases the immediately preceding character unless that
/// character is a newline or another backspace, applied until no such pair
/// remains. `"abc\u{8}d"` becomes `"abd"`.
fn resolve_backspaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == BACKSPACE {
            match out.chars().next_back() {
                Some(prev) if prev != '\n' && prev != BACKSPACE => {
                    out.pop();
                }
                _ => out.push(ch),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Output sink that normalizes every chunk and forwards it to the client as
/// a stream message. Forwarding is suppressed entirely for silent requests
/// and for chunks that normalize to nothing.
pub struct StreamSink {
    name: StreamName,
    silent: bool,
    messages: Arc<dyn MessageSink>,
}

impl StreamSink {
    pub fn new(name: StreamName, silent: bool, messages: Arc<dyn MessageSink>) -> Self {
        Self {
            name,
            silent,
            messages,
        }
    }
}

impl OutputSink for StreamSink {
    fn write(&self, text: &str) {
        if self.silent {
            return;
        }
        let text = normalize_output(text);
        if text.is_empty() {
            return;
        }
        self.messages.send(SideMessage::Stream {
            name: self.name,
            text,
        });
    }
}
