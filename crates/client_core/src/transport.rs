//! Event-source adapters that turn a byte stream into ordered phase events.
//!
//! The decoder accepts NDJSON and SSE framing, including events split over
//! several `data:` lines. Malformed lines are logged and dropped; a transport error ends the stream with an `Err` item.

use std::{collections::VecDeque, fmt::Display, pin::Pin};

use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use reqwest::{header::ACCEPT, Client};
use serde::Serialize;
use shared::{
    domain::TurnId,
    error::ProtocolError,
    protocol::{StreamDecoder, StreamEvent, StreamFrame},
};
use tracing::{debug, warn};
use url::Url;

use crate::error::{CoreError, CoreResult};

pub type EventStream = BoxStream<'static, CoreResult<StreamEvent>>;

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(&self, turn_id: TurnId, prompt: &str) -> CoreResult<EventStream>;
}

pub struct MissingEventSource;

#[async_trait]
impl EventSource for MissingEventSource {
    async fn open(&self, turn_id: TurnId, _prompt: &str) -> CoreResult<EventStream> {
        Err(CoreError::SourceUnavailable(format!(
            "no event source configured for turn {turn_id}"
        )))
    }
}

#[derive(Debug, Serialize)]
struct TurnRequest<'a> {
    turn_id: i64,
    message: &'a str,
}

/// Posts the prompt and streams the response body as phase events.
pub struct HttpEventSource {
    http: Client,
    endpoint: Url,
}

impl HttpEventSource {
    pub fn new(endpoint: Url) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    pub fn with_client(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn open(&self, turn_id: TurnId, prompt: &str) -> CoreResult<EventStream> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(ACCEPT, "text/event-stream, application/x-ndjson")
            .json(&TurnRequest {
                turn_id: turn_id.0,
                message: prompt,
            })
            .send()
            .await?
            .error_for_status()?;
        debug!(%turn_id, endpoint = %self.endpoint, "opened phase event stream");
        Ok(decode_event_stream(response.bytes_stream()).boxed())
    }
}

/// Replays a recorded NDJSON/SSE log, ignoring the prompt.
pub struct ReplayEventSource {
    log: String,
}

impl ReplayEventSource {
    pub fn new(log: impl Into<String>) -> Self {
        Self { log: log.into() }
    }
}

#[async_trait]
impl EventSource for ReplayEventSource {
    async fn open(&self, turn_id: TurnId, _prompt: &str) -> CoreResult<EventStream> {
        debug!(%turn_id, bytes = self.log.len(), "replaying recorded event log");
        let chunk: Result<Vec<u8>, std::convert::Infallible> = Ok(self.log.clone().into_bytes());
        Ok(decode_event_stream(stream::iter([chunk])).boxed())
    }
}

/// Splits byte chunks into lines, tolerating lines and UTF-8 sequences
/// that straddle chunk boundaries.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

struct DecodeState<S> {
    chunks: Pin<Box<S>>,
    lines: LineBuffer,
    decoder: StreamDecoder,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn accept(&mut self, line: &str) {
        if self.finished {
            return;
        }
        let frame = self.decoder.push_line(line);
        self.handle(frame);
    }

    fn finish(&mut self) {
        if let Some(line) = self.lines.finish() {
            self.accept(&line);
        }
        if !self.finished {
            let frame = self.decoder.flush();
            self.handle(frame);
        }
        self.finished = true;
    }

    fn handle(&mut self, frame: Result<StreamFrame, ProtocolError>) {
        match frame {
            Ok(StreamFrame::Event(event)) => self.ready.push_back(event),
            Ok(StreamFrame::Skip) => {}
            Ok(StreamFrame::Done) => self.finished = true,
            Err(err) => warn!(error = %err, "dropping malformed stream line"),
        }
    }
}

pub fn decode_event_stream<S, B, E>(chunks: S) -> impl Stream<Item = CoreResult<StreamEvent>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = DecodeState {
        chunks: Box::pin(chunks),
        lines: LineBuffer::default(),
        decoder: StreamDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    for line in state.lines.push(chunk.as_ref()) {
                        state.accept(&line);
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(CoreError::Transport(err.to_string())), state));
                }
                None => state.finish(),
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
