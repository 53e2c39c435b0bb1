use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use yew::Callback;

use crate::models::{ChatRequest, Message, Role, UploadedFile};
use crate::services::api::ApiService;
use crate::streaming::animator::{self, TypingAnimation};
use crate::streaming::cancel::{CancellationController, PendingSend};
use crate::streaming::decoder::{StreamDecoder, StreamEvent};
use crate::streaming::reducer::StreamingReducer;

/// The only fault that crosses the orchestrator boundary: the caller must
/// drop its stored identity and re-authenticate. Everything else is surfaced
/// as a visible assistant message.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ChatError {
    #[error("user not found")]
    UserNotFound,
}

/// What a finished stream asks the caller to do next.
enum StreamOutcome {
    /// Natural completion; the tracked message is already finalized.
    Completed { session_id: Option<String> },
    /// Non-streaming provider: play the full payload through the animator.
    Animate {
        content: String,
        message_id: Option<String>,
        session_id: Option<String>,
    },
    /// Server acknowledged a cancellation. No success side effects.
    CancelledByServer,
    /// Our token fired mid-stream (user cancel or a newer send). The message
    /// list already belongs to someone else; write nothing.
    Aborted,
    Errored(String),
}

struct StagedResend {
    text: String,
    file: Option<UploadedFile>,
}

/// Ties a logical chat session (id, model, history) to repeated streaming
/// exchanges. Owns session-id adoption, user-turn echoing, regeneration and
/// the completion side effects (session/file list refresh via `on_complete`).
pub struct SessionOrchestrator {
    api: ApiService,
    user_id: i64,
    model: RefCell<String>,
    session_id: RefCell<Option<String>>,
    reducer: Rc<RefCell<StreamingReducer>>,
    control: RefCell<CancellationController>,
    loading: Callback<bool>,
    on_complete: Callback<()>,
}

impl SessionOrchestrator {
    pub fn new(
        api: ApiService,
        user_id: i64,
        model: String,
        reducer: Rc<RefCell<StreamingReducer>>,
        loading: Callback<bool>,
        on_complete: Callback<()>,
    ) -> Self {
        Self {
            api,
            user_id,
            model: RefCell::new(model),
            session_id: RefCell::new(None),
            reducer,
            control: RefCell::new(CancellationController::new()),
            loading,
            on_complete,
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.borrow().clone()
    }

    pub fn model(&self) -> String {
        self.model.borrow().clone()
    }

    /// The model may change between sessions but never mid-stream.
    pub fn set_model(&self, model: String) {
        if !self.control.borrow().in_flight() {
            *self.model.borrow_mut() = model;
        }
    }

    /// Session ids are adopted one-way: the first response that carries one
    /// wins and later responses never overwrite it.
    fn adopt_session(&self, session_id: &str) {
        let mut current = self.session_id.borrow_mut();
        if current.is_none() {
            *current = Some(session_id.to_string());
        }
    }

    /// Abort the in-flight request and finalize the partial message as
    /// cancelled. Returns the original input for restoration.
    pub fn cancel(&self) -> Option<PendingSend> {
        self.loading.emit(false);
        self.control
            .borrow_mut()
            .cancel(&mut self.reducer.borrow_mut())
    }

    /// Start a fresh conversation: silently drop anything in flight.
    pub fn new_chat(&self) {
        self.control.borrow_mut().disarm();
        self.reducer.borrow_mut().clear();
        *self.session_id.borrow_mut() = None;
        self.loading.emit(false);
    }

    /// Load an existing session's history. Returns the model the session was
    /// recorded with, so the caller can switch the picker.
    pub async fn load_history(&self, session_id: &str) -> Option<String> {
        match self.api.get_chat_history(self.user_id, Some(session_id)).await {
            Ok(history) => {
                self.control.borrow_mut().disarm();
                self.reducer.borrow_mut().replace_all(history.messages);
                *self.session_id.borrow_mut() = Some(session_id.to_string());
                if let Some(model) = &history.session_model {
                    *self.model.borrow_mut() = model.clone();
                }
                history.session_model
            }
            Err(e) => {
                log::error!("failed to load chat history: {e}");
                None
            }
        }
    }

    pub async fn send_message(
        self: Rc<Self>,
        text: &str,
        file: Option<UploadedFile>,
        skip_user_echo: bool,
    ) -> Result<(), ChatError> {
        let trimmed = text.trim();
        if trimmed.is_empty() && file.is_none() {
            return Ok(());
        }

        // Abort any previous request before arming the new one.
        let token = self.arm_request(trimmed, file.clone());

        if !skip_user_echo {
            let content = if trimmed.is_empty() {
                file.as_ref()
                    .map(|f| format!("File: {}", f.filename))
                    .unwrap_or_default()
            } else {
                trimmed.to_string()
            };
            let images = file.as_ref().map(|f| f.images.clone());
            self.reducer
                .borrow_mut()
                .push_user(Message::user(content, images));
        }
        self.loading.emit(true);

        let message = self
            .control
            .borrow()
            .pending()
            .map(|p| p.text.clone())
            .unwrap_or_else(|| trimmed.to_string());
        let request = ChatRequest {
            user_id: self.user_id,
            message,
            model: self.model.borrow().clone(),
            session_id: self.session_id.borrow().clone(),
            images: file.map(|f| f.images).filter(|i| !i.is_empty()),
        };

        let response = match self.api.send_message(&request).await {
            Ok(r) => r,
            Err(e) => {
                if token.load(Ordering::Relaxed) {
                    return Ok(());
                }
                self.resolve(StreamOutcome::Errored(e.to_string()), token);
                return Ok(());
            }
        };
        // Cancelled while awaiting headers: the controller already wrote the
        // cancellation state.
        if token.load(Ordering::Relaxed) {
            return Ok(());
        }
        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::NOT_FOUND {
                self.control.borrow_mut().fail(&token);
                self.loading.emit(false);
                return Err(ChatError::UserNotFound);
            }
            self.resolve(StreamOutcome::Errored(format!("HTTP error {status}")), token);
            return Ok(());
        }

        self.control.borrow_mut().mark_streaming();
        let outcome = self.process_stream(response.bytes_stream(), &token).await;
        self.resolve(outcome, token);
        Ok(())
    }

    /// Abort whatever is in flight and arm the new request. The superseded
    /// stream loop exits without touching the list, so the message it left
    /// streaming is closed out here; exactly one generation is ever live.
    fn arm_request(&self, text: &str, file: Option<UploadedFile>) -> Arc<AtomicBool> {
        let token = self.control.borrow_mut().arm(text, file);
        self.reducer.borrow_mut().finalize(None);
        token
    }

    /// Truncate at `message_index` and re-send the preceding user turn
    /// without echoing it again. A silent no-op when the preceding entry is
    /// not a user message.
    pub async fn regenerate(self: Rc<Self>, message_index: usize) -> Result<(), ChatError> {
        let Some(staged) = self.prepare_regenerate(message_index) else {
            return Ok(());
        };
        self.send_message(&staged.text, staged.file, true).await
    }

    fn prepare_regenerate(&self, message_index: usize) -> Option<StagedResend> {
        let staged = {
            let reducer = self.reducer.borrow();
            let messages = reducer.messages();
            if message_index == 0 || message_index > messages.len() {
                return None;
            }
            let previous = &messages[message_index - 1];
            if previous.role != Role::User {
                return None;
            }
            StagedResend {
                text: previous.content.clone(),
                file: previous.images.clone().map(|images| UploadedFile {
                    filename: String::new(),
                    images,
                }),
            }
        };
        self.reducer.borrow_mut().truncate(message_index);
        Some(staged)
    }

    /// Consume the response byte stream and apply decoded events in receipt
    /// order. Generic over the stream so tests can feed canned chunks.
    async fn process_stream<S, B, E>(&self, stream: S, token: &Arc<AtomicBool>) -> StreamOutcome
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        futures_util::pin_mut!(stream);
        let mut decoder = StreamDecoder::new();
        let mut started = false;
        let mut seen_session: Option<String> = None;

        while let Some(item) = stream.next().await {
            if token.load(Ordering::Relaxed) {
                return StreamOutcome::Aborted;
            }
            let chunk = match item {
                Ok(c) => c,
                Err(e) => {
                    if token.load(Ordering::Relaxed) {
                        return StreamOutcome::Aborted;
                    }
                    return StreamOutcome::Errored(e.to_string());
                }
            };
            for event in decoder.push_chunk(chunk.as_ref()) {
                match event {
                    StreamEvent::Delta { text, session_id } => {
                        if let Some(sid) = session_id {
                            seen_session.get_or_insert(sid);
                        }
                        let mut reducer = self.reducer.borrow_mut();
                        if !started {
                            started = true;
                            let model = self.model.borrow().clone();
                            let sid = seen_session
                                .clone()
                                .or_else(|| self.session_id.borrow().clone());
                            reducer.begin_assistant(&text, &model, sid.as_deref());
                            drop(reducer);
                            self.loading.emit(false);
                        } else {
                            reducer.append_delta(&text, seen_session.as_deref());
                        }
                    }
                    StreamEvent::CompletedFull {
                        content,
                        message_id,
                        session_id,
                    } => {
                        return StreamOutcome::Animate {
                            content,
                            message_id,
                            session_id: session_id.or(seen_session),
                        };
                    }
                    StreamEvent::CompletedStreaming {
                        message_id,
                        session_id,
                    } => {
                        self.reducer.borrow_mut().finalize(message_id.as_deref());
                        return StreamOutcome::Completed {
                            session_id: session_id.or(seen_session),
                        };
                    }
                    StreamEvent::Cancelled => return StreamOutcome::CancelledByServer,
                    StreamEvent::Error(message) => return StreamOutcome::Errored(message),
                }
            }
        }
        // Stream ended without a terminal event; close out what arrived.
        self.reducer.borrow_mut().finalize(None);
        StreamOutcome::Completed {
            session_id: seen_session,
        }
    }

    fn resolve(self: Rc<Self>, outcome: StreamOutcome, token: Arc<AtomicBool>) {
        match outcome {
            StreamOutcome::Aborted => {}
            StreamOutcome::Completed { session_id } => {
                if let Some(sid) = &session_id {
                    self.adopt_session(sid);
                }
                self.control.borrow_mut().complete(&token);
                self.loading.emit(false);
                self.on_complete.emit(());
            }
            StreamOutcome::CancelledByServer => {
                self.reducer.borrow_mut().finalize_cancelled();
                self.control.borrow_mut().release(&token);
                self.loading.emit(false);
            }
            StreamOutcome::Errored(message) => {
                {
                    let mut reducer = self.reducer.borrow_mut();
                    reducer.finalize(None);
                    reducer.push_error(format!(
                        "An error occurred: {message}\n\nCheck that the server is running and the model is downloaded."
                    ));
                }
                self.control.borrow_mut().fail(&token);
                self.loading.emit(false);
            }
            StreamOutcome::Animate {
                content,
                message_id,
                session_id,
            } => {
                self.control.borrow_mut().mark_animating();
                let model = self.model.borrow().clone();
                let sid = session_id
                    .clone()
                    .or_else(|| self.session_id.borrow().clone());
                let animation = TypingAnimation::begin(
                    &mut self.reducer.borrow_mut(),
                    &content,
                    &model,
                    sid.as_deref(),
                    message_id,
                );
                self.loading.emit(false);

                let reducer = Rc::clone(&self.reducer);
                let done_token = token.clone();
                let this = Rc::clone(&self);
                let on_done = Callback::from(move |_| {
                    if let Some(sid) = &session_id {
                        this.adopt_session(sid);
                    }
                    this.control.borrow_mut().complete(&done_token);
                    this.on_complete.emit(());
                });
                animator::spawn(animation, reducer, token, on_done);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;

    fn orchestrator() -> (Rc<SessionOrchestrator>, Rc<RefCell<Vec<Message>>>) {
        let latest: Rc<RefCell<Vec<Message>>> = Rc::default();
        let sink = latest.clone();
        let reducer = Rc::new(RefCell::new(StreamingReducer::new(Callback::from(
            move |messages| *sink.borrow_mut() = messages,
        ))));
        let orchestrator = Rc::new(SessionOrchestrator::new(
            ApiService::new("http://localhost:8000"),
            1,
            "llama3".into(),
            reducer,
            Callback::noop(),
            Callback::noop(),
        ));
        (orchestrator, latest)
    }

    fn chunks(lines: &[&str]) -> impl Stream<Item = Result<Vec<u8>, Infallible>> {
        futures::stream::iter(
            lines
                .iter()
                .map(|l| Ok(l.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    fn fresh_token() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_deltas_accumulate_and_stream_completes() {
        let (orch, _) = orchestrator();
        let token = fresh_token();
        let outcome = block_on(orch.process_stream(
            chunks(&[
                "data: {\"content\": \"The \", \"session_id\": \"s-1\"}\n",
                "data: {\"content\": \"answer\"}\n",
                "data: {\"done\": true, \"message_id\": 7}\n",
            ]),
            &token,
        ));

        let reducer = orch.reducer.borrow();
        let message = reducer.messages().last().unwrap();
        assert_eq!(message.content, "The answer");
        assert_eq!(message.streaming_complete, Some(true));
        assert_eq!(message.id.as_deref(), Some("7"));
        match outcome {
            StreamOutcome::Completed { session_id } => {
                assert_eq!(session_id.as_deref(), Some("s-1"))
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn test_session_id_is_adopted_one_way() {
        let (orch, _) = orchestrator();
        orch.adopt_session("first");
        orch.adopt_session("second");
        assert_eq!(orch.session_id().as_deref(), Some("first"));
    }

    #[test]
    fn test_full_payload_routes_to_animator() {
        let (orch, _) = orchestrator();
        let token = fresh_token();
        let outcome = block_on(orch.process_stream(
            chunks(&["data: {\"content\": \"Hello world\", \"done\": true, \"message_id\": \"m1\"}\n"]),
            &token,
        ));
        match outcome {
            StreamOutcome::Animate { content, message_id, .. } => {
                assert_eq!(content, "Hello world");
                assert_eq!(message_id.as_deref(), Some("m1"));
                // Nothing was appended incrementally.
                assert!(orch.reducer.borrow().messages().is_empty());
            }
            _ => panic!("expected animator routing"),
        }
    }

    #[test]
    fn test_server_cancellation_is_not_treated_as_success() {
        let (orch, _) = orchestrator();
        let token = orch.control.borrow_mut().arm("question", None);
        let outcome = block_on(orch.process_stream(
            chunks(&[
                "data: {\"content\": \"partial\"}\n",
                "data: {\"done\": true, \"cancelled\": true}\n",
            ]),
            &token,
        ));
        assert!(matches!(outcome, StreamOutcome::CancelledByServer));
        Rc::clone(&orch).resolve(outcome, token);

        let reducer = orch.reducer.borrow();
        let message = reducer.messages().last().unwrap();
        assert_eq!(message.content, "partial");
        assert_eq!(message.is_cancelled, Some(true));
        // Pending input is retained so the host can restore it.
        assert_eq!(orch.control.borrow().pending().unwrap().text, "question");
    }

    #[test]
    fn test_server_error_finalizes_partial_and_appends_error_message() {
        let (orch, _) = orchestrator();
        let token = orch.control.borrow_mut().arm("q", None);
        let outcome = block_on(orch.process_stream(
            chunks(&[
                "data: {\"content\": \"half\"}\n",
                "data: {\"error\": \"model crashed\"}\n",
            ]),
            &token,
        ));
        Rc::clone(&orch).resolve(outcome, token);

        let reducer = orch.reducer.borrow();
        let messages = reducer.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].streaming_complete, Some(true));
        assert!(messages[1].content.contains("model crashed"));
        assert!(orch.control.borrow().pending().is_none());
    }

    #[test]
    fn test_superseded_stream_writes_nothing() {
        let (orch, _) = orchestrator();
        let old_token = orch.arm_request("first", None);
        // A newer send aborts the previous request.
        let new_token = orch.arm_request("second", None);
        let outcome = block_on(orch.process_stream(
            chunks(&["data: {\"content\": \"stale\"}\n"]),
            &old_token,
        ));
        assert!(matches!(outcome, StreamOutcome::Aborted));
        assert!(orch.reducer.borrow().messages().is_empty());

        // The new request streams normally and exactly one assistant message
        // ends up tracked.
        let outcome = block_on(orch.process_stream(
            chunks(&["data: {\"content\": \"fresh\"}\n"]),
            &new_token,
        ));
        assert!(matches!(outcome, StreamOutcome::Completed { .. }));
        assert_eq!(orch.reducer.borrow().messages().len(), 1);
    }

    #[test]
    fn test_supersede_after_first_delta_finalizes_stale_message() {
        let (orch, _) = orchestrator();
        let old_token = orch.arm_request("first", None);
        let new_token: Rc<RefCell<Option<Arc<AtomicBool>>>> = Rc::default();

        // A newer send arms the controller between chunks of the old stream.
        let interleaved = chunks(&["data: {\"content\": \"partial answer\"}\n"]).chain(
            futures::stream::once({
                let orch = Rc::clone(&orch);
                let new_token = new_token.clone();
                async move {
                    *new_token.borrow_mut() = Some(orch.arm_request("second", None));
                    Ok::<_, Infallible>(b"data: {\"content\": \" stale\"}\n".to_vec())
                }
            }),
        );
        let outcome = block_on(orch.process_stream(interleaved, &old_token));
        assert!(matches!(outcome, StreamOutcome::Aborted));

        // The old message is closed out, not left streaming forever.
        {
            let reducer = orch.reducer.borrow();
            assert_eq!(reducer.messages().len(), 1);
            assert_eq!(reducer.messages()[0].content, "partial answer");
            assert_eq!(reducer.messages()[0].streaming_complete, Some(true));
        }

        let new_token = new_token.borrow_mut().take().unwrap();
        let outcome = block_on(orch.process_stream(
            chunks(&["data: {\"content\": \"fresh\"}\n", "data: {\"done\": true}\n"]),
            &new_token,
        ));
        assert!(matches!(outcome, StreamOutcome::Completed { .. }));
        let reducer = orch.reducer.borrow();
        assert_eq!(reducer.messages().len(), 2);
        assert_eq!(reducer.messages()[1].content, "fresh");
        assert!(reducer
            .messages()
            .iter()
            .all(|m| m.streaming_complete != Some(false)));
    }

    #[test]
    fn test_regenerate_truncates_and_stages_previous_user_turn() {
        let (orch, _) = orchestrator();
        orch.reducer.borrow_mut().replace_all(vec![
            Message::user("U0".into(), None),
            Message::error("A0".into()),
            Message::user("U1".into(), None),
            Message::error("A1".into()),
        ]);

        let staged = orch.prepare_regenerate(3).unwrap();
        assert_eq!(staged.text, "U1");
        let reducer = orch.reducer.borrow();
        assert_eq!(reducer.messages().len(), 3);
        assert_eq!(reducer.messages()[2].content, "U1");
        assert_eq!(reducer.messages()[2].role, Role::User);
    }

    #[test]
    fn test_regenerate_is_a_noop_when_previous_turn_is_not_user() {
        let (orch, _) = orchestrator();
        orch.reducer.borrow_mut().replace_all(vec![
            Message::user("U0".into(), None),
            Message::error("A0".into()),
            Message::error("A1".into()),
        ]);
        assert!(orch.prepare_regenerate(2).is_none());
        assert!(orch.prepare_regenerate(0).is_none());
        assert_eq!(orch.reducer.borrow().messages().len(), 3);
    }

    #[test]
    fn test_stream_ending_without_terminal_event_still_finalizes() {
        let (orch, _) = orchestrator();
        let token = fresh_token();
        let outcome = block_on(orch.process_stream(
            chunks(&["data: {\"content\": \"dangling\"}\n"]),
            &token,
        ));
        assert!(matches!(outcome, StreamOutcome::Completed { .. }));
        let reducer = orch.reducer.borrow();
        assert_eq!(reducer.messages()[0].streaming_complete, Some(true));
        assert_eq!(reducer.tracked_index(), None);
    }
}
