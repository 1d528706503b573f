//! Scripted in-memory instrument for tests and dry runs.

use crate::instrument_link::{InstrumentLink, LinkError};
use std::collections::VecDeque;
use std::time::Duration;

/// One scripted response, consumed by the next read.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Text(String),
    Binary(Vec<u8>),
    Timeout,
    /// The read times out, but the text arrives afterwards and is returned by
    /// the next read unless the input is cleared first.
    Late(String),
    Disconnected,
}

/// [`InstrumentLink`] that answers reads from a queue and records every write.
///
/// An exhausted queue behaves like an instrument that stopped answering: each
/// further read times out.
#[derive(Debug, Default)]
pub struct MockLink {
    replies: VecDeque<MockReply>,
    late: VecDeque<String>,
    written: Vec<String>,
    writes_before_failure: Option<usize>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = MockReply>,
    {
        Self {
            replies: replies.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Queue one text reply per value, formatted the way a meter prints it.
    pub fn with_readings(readings: &[f64]) -> Self {
        Self::with_replies(readings.iter().map(|r| MockReply::Text(format!("{r:E}"))))
    }

    pub fn push_reply(&mut self, reply: MockReply) {
        self.replies.push_back(reply);
    }

    pub fn push_text(&mut self, text: &str) {
        self.push_reply(MockReply::Text(text.to_string()));
    }

    /// Accept `count` more writes, then report the connection as lost.
    pub fn fail_writes_after(&mut self, count: usize) {
        self.writes_before_failure = Some(count);
    }

    /// Commands written so far, without terminators.
    pub fn written(&self) -> &[String] {
        &self.written
    }

    /// Scripted replies not consumed yet, including late ones still buffered.
    pub fn pending_replies(&self) -> usize {
        self.replies.len() + self.late.len()
    }

    fn next_reply(&mut self) -> MockReply {
        if let Some(text) = self.late.pop_front() {
            return MockReply::Text(text);
        }
        match self.replies.pop_front() {
            Some(MockReply::Late(text)) => {
                self.late.push_back(text);
                MockReply::Timeout
            }
            Some(reply) => reply,
            None => MockReply::Timeout,
        }
    }
}

fn reply_error(reply: &MockReply) -> LinkError {
    match reply {
        MockReply::Disconnected => LinkError::ConnectionLost("mock instrument disconnected".to_string()),
        _ => LinkError::Timeout {
            waited: Duration::ZERO,
        },
    }
}

impl InstrumentLink for MockLink {
    fn write(&mut self, command: &str) -> Result<(), LinkError> {
        if let Some(remaining) = self.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(LinkError::ConnectionLost(format!(
                    "mock instrument rejected write {command:?}"
                )));
            }
            *remaining -= 1;
        }
        self.written.push(command.to_string());
        Ok(())
    }

    fn read(&mut self) -> Result<String, LinkError> {
        match self.next_reply() {
            MockReply::Text(text) => Ok(text.trim().to_string()),
            MockReply::Binary(bytes) => Ok(String::from_utf8(bytes)?.trim().to_string()),
            other => Err(reply_error(&other)),
        }
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, LinkError> {
        match self.next_reply() {
            MockReply::Binary(bytes) => Ok(bytes),
            MockReply::Text(text) => Ok(text.into_bytes()),
            other => Err(reply_error(&other)),
        }
    }

    fn clear_input(&mut self) -> Result<(), LinkError> {
        self.late.clear();
        Ok(())
    }
}
