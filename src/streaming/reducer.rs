use yew::Callback;

use crate::models::{Message, Role};

/// Shown in place of an empty partial response when generation is cancelled.
pub const CANCELLED_NOTICE: &str = "Generation was cancelled.";

/// The only code path allowed to append or mutate messages belonging to an
/// in-flight generation.
///
/// Every mutation replaces the whole list through `on_change` (a clone is
/// emitted each time) so the reactive layer never observes in-place edits.
/// The index of the in-flight assistant message is tracked for O(1) updates;
/// a scan from the tail is kept as a defensive fallback but only messages
/// still marked as actively streaming qualify, so history-loaded entries can
/// never be hit.
pub struct StreamingReducer {
    messages: Vec<Message>,
    tracked: Option<usize>,
    on_change: Callback<Vec<Message>>,
}

impl StreamingReducer {
    pub fn new(on_change: Callback<Vec<Message>>) -> Self {
        Self {
            messages: Vec::new(),
            tracked: None,
            on_change,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tracked_index(&self) -> Option<usize> {
        self.tracked
    }

    fn emit(&self) {
        self.on_change.emit(self.messages.clone());
    }

    /// Replace the entire list, e.g. when loading a session from history.
    /// Nothing is tracked afterwards.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.tracked = None;
        self.messages = messages;
        self.emit();
    }

    pub fn clear(&mut self) {
        self.replace_all(Vec::new());
    }

    pub fn push_user(&mut self, message: Message) {
        self.messages.push(message);
        self.emit();
    }

    pub fn push_error(&mut self, text: String) {
        self.messages.push(Message::error(text));
        self.emit();
    }

    /// Append a fresh in-flight assistant message and start tracking it.
    pub fn begin_assistant(&mut self, initial: &str, model: &str, session_id: Option<&str>) {
        let mut message = Message::assistant_streaming(model, session_id);
        message.content = initial.to_string();
        self.tracked = Some(self.messages.len());
        self.messages.push(message);
        self.emit();
    }

    fn target_index(&self) -> Option<usize> {
        self.tracked
            .filter(|&i| i < self.messages.len() && self.messages[i].is_streaming())
            .or_else(|| {
                self.messages
                    .iter()
                    .rposition(|m| m.role == Role::Assistant && m.is_streaming())
            })
    }

    /// Concatenate a delta onto the tracked message. No other message is
    /// disturbed; a no-op when nothing is streaming.
    pub fn append_delta(&mut self, text: &str, session_id: Option<&str>) {
        let Some(index) = self.target_index() else {
            return;
        };
        let message = &mut self.messages[index];
        message.content.push_str(text);
        if message.session_id.is_none() {
            message.session_id = session_id.map(str::to_string);
        }
        self.emit();
    }

    /// Replace the tracked message's content outright. Used by the typing
    /// animator, which reveals prefixes rather than appending.
    pub fn set_content(&mut self, text: &str) {
        let Some(index) = self.target_index() else {
            return;
        };
        self.messages[index].content = text.to_string();
        self.emit();
    }

    /// Mark the tracked message complete, optionally adopting the
    /// server-issued id. Idempotent: once the tracked index is cleared and no
    /// message is streaming, a second call does nothing.
    pub fn finalize(&mut self, server_message_id: Option<&str>) {
        let Some(index) = self.target_index() else {
            return;
        };
        let message = &mut self.messages[index];
        message.streaming_complete = Some(true);
        if let Some(id) = server_message_id {
            message.id = Some(id.to_string());
        }
        self.tracked = None;
        self.emit();
    }

    /// Finalize due to cancellation. Preserves trimmed partial content, or
    /// substitutes the fixed notice when nothing had arrived; synthesizes a
    /// fresh message when no generation was being tracked at all.
    pub fn finalize_cancelled(&mut self) {
        match self.target_index() {
            Some(index) => {
                let message = &mut self.messages[index];
                let trimmed = message.content.trim().to_string();
                message.content = if trimmed.is_empty() {
                    CANCELLED_NOTICE.to_string()
                } else {
                    trimmed
                };
                message.streaming_complete = Some(true);
                message.is_cancelled = Some(true);
            }
            None => {
                self.messages.push(Message::cancelled(CANCELLED_NOTICE.to_string()));
            }
        }
        self.tracked = None;
        self.emit();
    }

    /// Drop everything at and after `index`, for regeneration.
    pub fn truncate(&mut self, index: usize) {
        if index < self.messages.len() {
            self.messages.truncate(index);
            self.tracked = None;
            self.emit();
        }
    }
}
