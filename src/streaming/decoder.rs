use serde::Deserialize;

/// A decoded unit from the wire. Any number of `Delta`s precede exactly one
/// terminal event (`CompletedStreaming`, `CompletedFull`, `Cancelled` or
/// `Error`).
#[derive(Clone, PartialEq, Debug)]
pub enum StreamEvent {
    /// Incremental assistant text. Carries the session id when the server
    /// attaches one to the chunk.
    Delta {
        text: String,
        session_id: Option<String>,
    },
    /// Streaming provider finished; content already arrived as deltas.
    CompletedStreaming {
        message_id: Option<String>,
        session_id: Option<String>,
    },
    /// Non-streaming provider: the entire response plus the completion flag
    /// in a single payload. Routed to the typing animator, never appended
    /// incrementally.
    CompletedFull {
        content: String,
        message_id: Option<String>,
        session_id: Option<String>,
    },
    /// Server-side cancellation. Not a completion: no success side effects.
    Cancelled,
    Error(String),
}

/// Accumulates arbitrary byte fragments and yields the payload of each
/// complete `data: <payload>` line. Lines without the prefix are ignored.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim().to_string();
            self.buffer.drain(..pos + 1);
            if let Some(payload) = line.strip_prefix("data: ") {
                payloads.push(payload.to_string());
            }
        }
        payloads
    }
}

/// Wire shape of a chat stream payload. The duck-typed field combinations of
/// the server (`content`+`done` together or apart, `cancelled`, `error`) are
/// resolved here, once, into `StreamEvent` variants.
#[derive(Deserialize)]
struct StreamPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    cancelled: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message_id: Option<IdValue>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Server message ids arrive as JSON numbers or strings; normalize at the
/// boundary so `finalize` stays the single id-adoption point.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    Num(i64),
    Text(String),
}

impl IdValue {
    fn into_string(self) -> String {
        match self {
            IdValue::Num(n) => n.to_string(),
            IdValue::Text(s) => s,
        }
    }
}

/// Parses a raw chat byte stream into `StreamEvent`s. After a terminal event
/// the decoder stops yielding; trailing payloads are dropped.
#[derive(Default)]
pub struct StreamDecoder {
    lines: SseLineBuffer,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for payload in self.lines.push(chunk) {
            if self.finished {
                break;
            }
            if payload == "[DONE]" {
                events.push(StreamEvent::CompletedStreaming {
                    message_id: None,
                    session_id: None,
                });
                self.finished = true;
                continue;
            }
            let parsed: StreamPayload = match serde_json::from_str(&payload) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("skipping malformed stream payload: {e}");
                    continue;
                }
            };
            if let Some(error) = parsed.error {
                events.push(StreamEvent::Error(error));
                self.finished = true;
                continue;
            }
            if parsed.cancelled.unwrap_or(false) {
                events.push(StreamEvent::Cancelled);
                self.finished = true;
                continue;
            }
            let message_id = parsed.message_id.map(IdValue::into_string);
            match (parsed.content, parsed.done.unwrap_or(false)) {
                (Some(content), true) => {
                    events.push(StreamEvent::CompletedFull {
                        content,
                        message_id,
                        session_id: parsed.session_id,
                    });
                    self.finished = true;
                }
                (Some(content), false) => {
                    events.push(StreamEvent::Delta {
                        text: content,
                        session_id: parsed.session_id,
                    });
                }
                (None, true) => {
                    events.push(StreamEvent::CompletedStreaming {
                        message_id,
                        session_id: parsed.session_id,
                    });
                    self.finished = true;
                }
                // Keep-alive or metadata-only payload.
                (None, false) => {}
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut StreamDecoder, chunks: &[&str]) -> Vec<StreamEvent> {
        chunks
            .iter()
            .flat_map(|c| decoder.push_chunk(c.as_bytes()))
            .collect()
    }

    #[test]
    fn test_delta_sequence_then_done() {
        let mut decoder = StreamDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[
                "data: {\"content\": \"Hel\"}\n",
                "data: {\"content\": \"lo\", \"session_id\": \"s1\"}\n",
                "data: {\"done\": true, \"message_id\": 42}\n",
            ],
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta {
                    text: "Hel".into(),
                    session_id: None
                },
                StreamEvent::Delta {
                    text: "lo".into(),
                    session_id: Some("s1".into())
                },
                StreamEvent::CompletedStreaming {
                    message_id: Some("42".into()),
                    session_id: None
                },
            ]
        );
    }

    #[test]
    fn test_mid_line_fragmentation() {
        let mut decoder = StreamDecoder::new();
        let mut events = decoder.push_chunk(b"data: {\"cont");
        assert!(events.is_empty());
        events.extend(decoder.push_chunk(b"ent\": \"abc\"}\ndata: {\"do"));
        assert_eq!(
            events,
            vec![StreamEvent::Delta {
                text: "abc".into(),
                session_id: None
            }]
        );
        events.extend(decoder.push_chunk(b"ne\": true}\n"));
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            StreamEvent::CompletedStreaming {
                message_id: None,
                session_id: None
            }
        );
    }

    #[test]
    fn test_content_and_done_together_routes_to_full_completion() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push_chunk(
            b"data: {\"content\": \"Hello world\", \"done\": true, \"message_id\": \"m-9\", \"session_id\": \"s-2\"}\n",
        );
        assert_eq!(
            events,
            vec![StreamEvent::CompletedFull {
                content: "Hello world".into(),
                message_id: Some("m-9".into()),
                session_id: Some("s-2".into()),
            }]
        );
    }

    #[test]
    fn test_cancelled_flag_is_not_a_completion() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push_chunk(b"data: {\"done\": true, \"cancelled\": true}\n");
        assert_eq!(events, vec![StreamEvent::Cancelled]);
    }

    #[test]
    fn test_error_field_aborts_decoding() {
        let mut decoder = StreamDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[
                "data: {\"error\": \"model not loaded\"}\n",
                "data: {\"content\": \"late\"}\n",
            ],
        );
        assert_eq!(events, vec![StreamEvent::Error("model not loaded".into())]);
    }

    #[test]
    fn test_malformed_payload_is_skipped_not_fatal() {
        let mut decoder = StreamDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[
                "data: {not json}\n",
                "data: {\"content\": \"ok\"}\n",
            ],
        );
        assert_eq!(
            events,
            vec![StreamEvent::Delta {
                text: "ok".into(),
                session_id: None
            }]
        );
    }

    #[test]
    fn test_unframed_lines_are_ignored() {
        let mut decoder = StreamDecoder::new();
        let events = decode_all(
            &mut decoder,
            &[": keep-alive\n\n", "event: ping\n", "data: {\"content\": \"x\"}\n"],
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_done_sentinel() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push_chunk(b"data: [DONE]\n");
        assert_eq!(
            events,
            vec![StreamEvent::CompletedStreaming {
                message_id: None,
                session_id: None
            }]
        );
    }
}
