use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::UploadedFile;
use crate::streaming::reducer::StreamingReducer;

/// Substituted when a message is sent with an attachment but no text.
pub const DESCRIBE_FILE_PROMPT: &str = "Please describe this file.";

/// The user input captured at send time, kept around so a cancelled request
/// can be restored into the input box.
#[derive(Clone, PartialEq, Debug)]
pub struct PendingSend {
    pub text: String,
    pub file: Option<UploadedFile>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RequestPhase {
    Idle,
    Sending,
    Streaming,
    Animating,
}

/// Coordinates abort propagation for the single in-flight request.
///
/// Each request gets its own `Arc<AtomicBool>` abort token; deferred
/// callbacks (stream loops, animation ticks) hold a clone and check it before
/// touching shared state, since an old callback is never destroyed, only
/// silenced. Arming a new request aborts the previous token, so at most one
/// request is live at a time.
pub struct CancellationController {
    token: Option<Arc<AtomicBool>>,
    pending: Option<PendingSend>,
    phase: RequestPhase,
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationController {
    pub fn new() -> Self {
        Self {
            token: None,
            pending: None,
            phase: RequestPhase::Idle,
        }
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn in_flight(&self) -> bool {
        self.token.is_some()
    }

    /// Whether `token` belongs to the request this controller currently owns.
    pub fn is_current(&self, token: &Arc<AtomicBool>) -> bool {
        self.token.as_ref().is_some_and(|t| Arc::ptr_eq(t, token))
    }

    /// Abort whatever is in flight and arm a new request, capturing the input
    /// for potential restoration. Returns the new request's abort token.
    pub fn arm(&mut self, text: &str, file: Option<UploadedFile>) -> Arc<AtomicBool> {
        if let Some(previous) = self.token.take() {
            previous.store(true, Ordering::Relaxed);
        }
        let text = if text.is_empty() && file.is_some() {
            DESCRIBE_FILE_PROMPT.to_string()
        } else {
            text.to_string()
        };
        self.pending = Some(PendingSend { text, file });
        let token = Arc::new(AtomicBool::new(false));
        self.token = Some(token.clone());
        self.phase = RequestPhase::Sending;
        token
    }

    pub fn mark_streaming(&mut self) {
        if self.token.is_some() {
            self.phase = RequestPhase::Streaming;
        }
    }

    pub fn mark_animating(&mut self) {
        if self.token.is_some() {
            self.phase = RequestPhase::Animating;
        }
    }

    /// User-initiated cancellation. Fires and clears the abort token (a later
    /// unrelated cancel is a no-op), finalizes the partial message in place
    /// or synthesizes a placeholder when nothing had been appended yet, and
    /// returns the original input. The pending record is retained so the
    /// caller may offer restoration.
    pub fn cancel(&mut self, reducer: &mut StreamingReducer) -> Option<PendingSend> {
        let token = self.token.take()?;
        token.store(true, Ordering::Relaxed);
        reducer.finalize_cancelled();
        self.phase = RequestPhase::Idle;
        self.pending.clone()
    }

    /// Silent teardown, used when the surrounding conversation is being
    /// replaced. Aborts the token without writing any cancellation state.
    pub fn disarm(&mut self) {
        if let Some(token) = self.token.take() {
            token.store(true, Ordering::Relaxed);
        }
        self.pending = None;
        self.phase = RequestPhase::Idle;
    }

    /// Server-side cancellation: release the request without touching the
    /// pending record.
    pub fn release(&mut self, token: &Arc<AtomicBool>) {
        if self.is_current(token) {
            self.token = None;
            self.phase = RequestPhase::Idle;
        }
    }

    /// Natural completion: the captured input is no longer needed.
    pub fn complete(&mut self, token: &Arc<AtomicBool>) {
        if self.is_current(token) {
            self.token = None;
            self.pending = None;
            self.phase = RequestPhase::Idle;
        }
    }

    /// Non-cancellation failure: also drops the captured input.
    pub fn fail(&mut self, token: &Arc<AtomicBool>) {
        if self.is_current(token) {
            self.token = None;
            self.pending = None;
            self.phase = RequestPhase::Idle;
        }
    }

    pub fn pending(&self) -> Option<&PendingSend> {
        self.pending.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::streaming::reducer::CANCELLED_NOTICE;
    use yew::Callback;

    fn reducer() -> StreamingReducer {
        StreamingReducer::new(Callback::from(|_| {}))
    }

    #[test]
    fn test_cancel_before_first_delta_synthesizes_placeholder() {
        let mut r = reducer();
        r.push_user(Message::user("question".into(), None));
        let mut c = CancellationController::new();
        c.arm("question", None);

        let restored = c.cancel(&mut r).unwrap();
        assert_eq!(restored.text, "question");
        let m = r.messages().last().unwrap();
        assert_eq!(m.content, CANCELLED_NOTICE);
        assert_eq!(m.is_cancelled, Some(true));
        assert_eq!(c.phase(), RequestPhase::Idle);
    }

    #[test]
    fn test_cancel_mid_stream_preserves_partial_content() {
        let mut r = reducer();
        let mut c = CancellationController::new();
        let token = c.arm("q", None);
        c.mark_streaming();
        r.begin_assistant("", "m", None);
        r.append_delta("The answer is ", None);

        c.cancel(&mut r);
        assert!(token.load(Ordering::Relaxed));
        let m = r.messages().last().unwrap();
        assert_eq!(m.content, "The answer is");
        assert_eq!(m.is_cancelled, Some(true));
        assert_eq!(r.tracked_index(), None);
    }

    #[test]
    fn test_second_cancel_is_a_noop() {
        let mut r = reducer();
        let mut c = CancellationController::new();
        c.arm("q", None);
        assert!(c.cancel(&mut r).is_some());
        let before = r.messages().len();
        assert!(c.cancel(&mut r).is_none());
        assert_eq!(r.messages().len(), before);
    }

    #[test]
    fn test_arming_aborts_exactly_the_previous_token() {
        let mut c = CancellationController::new();
        let first = c.arm("one", None);
        let second = c.arm("two", None);
        assert!(first.load(Ordering::Relaxed));
        assert!(!second.load(Ordering::Relaxed));
        assert!(c.is_current(&second));
        assert!(!c.is_current(&first));
    }

    #[test]
    fn test_pending_survives_cancel_but_not_completion() {
        let mut r = reducer();
        let mut c = CancellationController::new();
        let token = c.arm("draft text", None);
        c.cancel(&mut r);
        assert_eq!(c.pending().unwrap().text, "draft text");

        let token2 = c.arm("next", None);
        drop(token);
        c.complete(&token2);
        assert!(c.pending().is_none());
    }

    #[test]
    fn test_failure_clears_pending() {
        let mut c = CancellationController::new();
        let token = c.arm("q", None);
        c.fail(&token);
        assert!(c.pending().is_none());
        assert!(!c.in_flight());
    }

    #[test]
    fn test_stale_token_cannot_complete_the_new_request() {
        let mut c = CancellationController::new();
        let old = c.arm("one", None);
        let new = c.arm("two", None);
        c.complete(&old);
        assert!(c.in_flight());
        assert!(c.is_current(&new));
        assert_eq!(c.pending().unwrap().text, "two");
    }

    #[test]
    fn test_empty_text_with_file_captures_describe_prompt() {
        let mut c = CancellationController::new();
        c.arm(
            "",
            Some(UploadedFile {
                filename: "cat.png".into(),
                images: vec!["…".into()],
            }),
        );
        assert_eq!(c.pending().unwrap().text, DESCRIBE_FILE_PROMPT);
    }
}
