use std::collections::BTreeMap;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::services::storage::LocalStorage;
use crate::streaming::decoder::SseLineBuffer;

const KEY_DOWNLOADS: &str = "arena_downloads_v1";

/// One progress report from a model pull stream.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct PullProgress {
    pub status: String,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl PullProgress {
    pub fn percent(&self) -> Option<u8> {
        match (self.completed, self.total) {
            (Some(completed), Some(total)) if total > 0 => {
                Some(((completed.min(total) * 100) / total) as u8)
            }
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum PullEvent {
    Progress(PullProgress),
    Success,
    Error(String),
}

#[derive(Deserialize)]
struct PullPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// Parses a model pull byte stream. Same `data:` line framing as the chat
/// stream; `status: "success"` or `status: "error"` terminates.
#[derive(Default)]
pub struct PullDecoder {
    lines: SseLineBuffer,
    finished: bool,
}

impl PullDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<PullEvent> {
        let mut events = Vec::new();
        for payload in self.lines.push(chunk) {
            if self.finished {
                break;
            }
            let parsed: PullPayload = match serde_json::from_str(&payload) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("skipping malformed pull payload: {e}");
                    continue;
                }
            };
            if let Some(error) = parsed.error {
                events.push(PullEvent::Error(error));
                self.finished = true;
                continue;
            }
            match parsed.status.as_deref() {
                Some("success") => {
                    events.push(PullEvent::Success);
                    self.finished = true;
                }
                Some("error") => {
                    events.push(PullEvent::Error("download failed".to_string()));
                    self.finished = true;
                }
                Some(status) => events.push(PullEvent::Progress(PullProgress {
                    status: status.to_string(),
                    completed: parsed.completed,
                    total: parsed.total,
                })),
                None => {}
            }
        }
        events
    }
}

/// Drive a pull stream to completion, reporting each progress event.
/// Generic over the stream so tests can feed canned chunks.
pub async fn run_pull<S, B, E, F>(stream: S, mut on_progress: F) -> Result<(), String>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    F: FnMut(PullProgress),
{
    futures_util::pin_mut!(stream);
    let mut decoder = PullDecoder::new();
    while let Some(item) = stream.next().await {
        let chunk = item.map_err(|e| e.to_string())?;
        for event in decoder.push_chunk(chunk.as_ref()) {
            match event {
                PullEvent::Progress(progress) => on_progress(progress),
                PullEvent::Success => return Ok(()),
                PullEvent::Error(message) => return Err(message),
            }
        }
    }
    // The server closed the stream without a verdict; treat as success so a
    // finished pull is not reported as failed.
    Ok(())
}

/// In-flight downloads by model name, persisted so an interrupted page can
/// show which pulls were running. Loaded once at startup and saved on every
/// mutation, never read back ad hoc.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct DownloadTracker {
    active: BTreeMap<String, PullProgress>,
}

impl DownloadTracker {
    pub fn load() -> Self {
        LocalStorage::get(KEY_DOWNLOADS).unwrap_or_default()
    }

    pub fn save(&self) {
        LocalStorage::set(KEY_DOWNLOADS, self);
    }

    pub fn begin(&mut self, model: &str) {
        self.active.insert(model.to_string(), PullProgress::default());
    }

    pub fn update(&mut self, model: &str, progress: PullProgress) {
        self.active.insert(model.to_string(), progress);
    }

    pub fn finish(&mut self, model: &str) {
        self.active.remove(model);
    }

    pub fn is_active(&self, model: &str) -> bool {
        self.active.contains_key(model)
    }

    pub fn progress(&self, model: &str) -> Option<&PullProgress> {
        self.active.get(model)
    }

    pub fn active_models(&self) -> impl Iterator<Item = &str> {
        self.active.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;

    fn chunks(lines: &[&str]) -> impl Stream<Item = Result<Vec<u8>, Infallible>> {
        futures::stream::iter(
            lines
                .iter()
                .map(|l| Ok(l.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_progress_then_success() {
        let mut decoder = PullDecoder::new();
        let events: Vec<_> = [
            "data: {\"status\": \"downloading\", \"completed\": 50, \"total\": 200}\n",
            "data: {\"status\": \"success\"}\n",
        ]
        .iter()
        .flat_map(|c| decoder.push_chunk(c.as_bytes()))
        .collect();
        assert_eq!(
            events,
            vec![
                PullEvent::Progress(PullProgress {
                    status: "downloading".into(),
                    completed: Some(50),
                    total: Some(200),
                }),
                PullEvent::Success,
            ]
        );
    }

    #[test]
    fn test_error_status_terminates() {
        let mut decoder = PullDecoder::new();
        let events = decoder.push_chunk(b"data: {\"error\": \"manifest unknown\"}\n");
        assert_eq!(events, vec![PullEvent::Error("manifest unknown".into())]);
        assert!(decoder
            .push_chunk(b"data: {\"status\": \"downloading\"}\n")
            .is_empty());
    }

    #[test]
    fn test_percent_needs_a_nonzero_total() {
        let progress = PullProgress {
            status: "downloading".into(),
            completed: Some(150),
            total: Some(200),
        };
        assert_eq!(progress.percent(), Some(75));
        let unknown = PullProgress {
            status: "pulling manifest".into(),
            completed: None,
            total: None,
        };
        assert_eq!(unknown.percent(), None);
    }

    #[test]
    fn test_run_pull_reports_each_progress_step() {
        let mut seen = Vec::new();
        let result = block_on(run_pull(
            chunks(&[
                "data: {\"status\": \"pulling manifest\"}\n",
                "data: {\"status\": \"downloading\", \"completed\": 10, \"total\": 100}\n",
                "data: {\"status\": \"success\"}\n",
            ]),
            |p| seen.push(p.status.clone()),
        ));
        assert!(result.is_ok());
        assert_eq!(seen, vec!["pulling manifest", "downloading"]);
    }

    #[test]
    fn test_run_pull_surfaces_stream_error() {
        let result = block_on(run_pull(
            chunks(&["data: {\"status\": \"error\"}\n"]),
            |_| {},
        ));
        assert_eq!(result, Err("download failed".to_string()));
    }

    #[test]
    fn test_tracker_round_trip() {
        let mut tracker = DownloadTracker::default();
        tracker.begin("llama3");
        assert!(tracker.is_active("llama3"));
        tracker.update(
            "llama3",
            PullProgress {
                status: "downloading".into(),
                completed: Some(1),
                total: Some(4),
            },
        );
        assert_eq!(tracker.progress("llama3").unwrap().percent(), Some(25));
        tracker.finish("llama3");
        assert!(!tracker.is_active("llama3"));
    }
}
