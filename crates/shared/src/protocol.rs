use serde::{Deserialize, Serialize};

use crate::{error::ProtocolError, phase::Phase};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Running,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorResult {
    pub content: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// One incremental update for one phase of one turn, as delivered by the
/// response stream. `phase` stays a raw string so unknown names survive
/// decoding and can be dropped by the merge step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub phase: String,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_results: Option<Vec<VectorResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_results: Option<Vec<WebResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamEvent {
    pub fn new(phase: Phase, status: PhaseStatus) -> Self {
        Self {
            phase: phase.wire_name().to_string(),
            status,
            content: None,
            provider: None,
            model_name: None,
            vector_results: None,
            web_results: None,
            error: None,
        }
    }

    pub fn running(phase: Phase, content: impl Into<String>) -> Self {
        Self::new(phase, PhaseStatus::Running).with_content(content)
    }

    pub fn complete(phase: Phase, content: impl Into<String>) -> Self {
        Self::new(phase, PhaseStatus::Complete).with_content(content)
    }

    pub fn failed(phase: Phase, error: impl Into<String>) -> Self {
        let mut event = Self::new(phase, PhaseStatus::Error);
        event.error = Some(error.into());
        event
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_source(mut self, provider: impl Into<String>, model_name: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_vector_results(mut self, results: Vec<VectorResult>) -> Self {
        self.vector_results = Some(results);
        self
    }

    pub fn with_web_results(mut self, results: Vec<WebResult>) -> Self {
        self.web_results = Some(results);
        self
    }

    pub fn resolved_phase(&self) -> Result<Phase, ProtocolError> {
        Phase::from_wire(&self.phase).ok_or_else(|| ProtocolError::UnknownPhase(self.phase.clone()))
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }
        Ok(serde_json::from_str(raw)?)
    }
}

/// Result of feeding one line to a [`StreamDecoder`].
#[derive(Debug)]
pub enum StreamFrame {
    Event(StreamEvent),
    /// Nothing to emit yet: a blank line, an SSE comment or non-data field,
    /// or a `data:` line that continues an unfinished event.
    Skip,
    /// The `[DONE]` sentinel.
    Done,
}

/// Line decoder for NDJSON and SSE bodies.
///
/// Bare lines are NDJSON and decode on their own. Consecutive `data:` lines
/// are joined with `\n` until they form a complete JSON value, so an event
/// split over several `data:` lines is emitted once it closes. A blank line
/// ends the SSE event and reports whatever is still incomplete.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    data: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Result<StreamFrame, ProtocolError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return self.flush();
        }
        if trimmed.starts_with(':') {
            return Ok(StreamFrame::Skip);
        }

        match trimmed.strip_prefix("data:") {
            Some(payload) => self.push_data(payload.trim()),
            None if is_sse_field(trimmed) => Ok(StreamFrame::Skip),
            None => StreamEvent::from_json(trimmed).map(StreamFrame::Event),
        }
    }

    /// Ends the current SSE event. Buffered data that never formed a
    /// complete value is returned as an error and discarded.
    pub fn flush(&mut self) -> Result<StreamFrame, ProtocolError> {
        if self.data.is_empty() {
            return Ok(StreamFrame::Skip);
        }
        let data = std::mem::take(&mut self.data);
        StreamEvent::from_json(&data).map(StreamFrame::Event)
    }

    pub fn has_pending(&self) -> bool {
        !self.data.is_empty()
    }

    fn push_data(&mut self, payload: &str) -> Result<StreamFrame, ProtocolError> {
        if self.data.is_empty() {
            if payload.is_empty() {
                return Ok(StreamFrame::Skip);
            }
            if payload == "[DONE]" {
                return Ok(StreamFrame::Done);
            }
        } else {
            self.data.push('\n');
        }
        self.data.push_str(payload);

        match StreamEvent::from_json(&self.data) {
            Ok(event) => {
                self.data.clear();
                Ok(StreamFrame::Event(event))
            }
            Err(ProtocolError::Malformed(err)) if err.is_eof() => Ok(StreamFrame::Skip),
            Err(err) => {
                let continued = self.data.len() > payload.len();
                self.data.clear();
                if continued {
                    // The unfinished prefix was junk; give this line a fresh start.
                    return self.push_data(payload);
                }
                Err(err)
            }
        }
    }
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}
