use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use yew::Callback;

use crate::models::{DebateMessage, DebateParticipant, DebateSession, DebateTurnRequest};
use crate::services::api::ApiService;
use crate::streaming::decoder::{StreamDecoder, StreamEvent};

pub const DEFAULT_MAX_ROUNDS: u32 = 3;
const MAX_ROUNDS_CEILING: u32 = 10;

/// Where the debate currently stands. Rounds and turns are 1-based; a turn
/// indexes into the participant order within its round.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DebateState {
    pub round: u32,
    pub turn: u32,
    pub finished: bool,
}

impl DebateState {
    fn opening() -> Self {
        Self {
            round: 1,
            turn: 1,
            finished: false,
        }
    }
}

/// The state is always derived from the recorded messages rather than
/// counted locally, so a reload lands exactly where the debate left off.
pub fn derive_state(
    messages: &[DebateMessage],
    participant_count: u32,
    max_rounds: u32,
) -> DebateState {
    let last = messages
        .iter()
        .filter(|m| m.id.is_some())
        .max_by_key(|m| (m.round_number, m.turn_number));
    match last {
        None => DebateState::opening(),
        Some(m) => advance(
            DebateState {
                round: m.round_number,
                turn: m.turn_number,
                finished: false,
            },
            participant_count,
            max_rounds,
        ),
    }
}

/// Step to the next turn, rolling into the next round after the last
/// participant and finishing once the final round's last turn is done.
pub fn advance(state: DebateState, participant_count: u32, max_rounds: u32) -> DebateState {
    if state.finished {
        return state;
    }
    if state.turn < participant_count.max(1) {
        return DebateState {
            turn: state.turn + 1,
            ..state
        };
    }
    if state.round >= max_rounds {
        return DebateState {
            finished: true,
            ..state
        };
    }
    DebateState {
        round: state.round + 1,
        turn: 1,
        finished: false,
    }
}

pub fn clamp_max_rounds(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_MAX_ROUNDS)
        .clamp(1, MAX_ROUNDS_CEILING)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NoticeKind {
    Info,
    Error,
}

/// A transient banner for the debate view.
#[derive(Clone, PartialEq, Debug)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

enum TurnOutcome {
    Completed { message_id: Option<String> },
    Aborted,
    Cancelled,
    Errored(String),
}

/// Drives a multi-model debate turn by turn. Each turn streams through the
/// same wire protocol as a chat exchange, accumulated into a temporary
/// message (`id: None`) that receives its server id on completion.
pub struct DebateCoordinator {
    api: ApiService,
    debate_id: i64,
    participants: Vec<DebateParticipant>,
    max_rounds: u32,
    state: RefCell<DebateState>,
    messages: RefCell<Vec<DebateMessage>>,
    token: RefCell<Option<Arc<AtomicBool>>>,
    on_messages: Callback<Vec<DebateMessage>>,
    on_state: Callback<DebateState>,
    on_notice: Callback<Notice>,
}

impl DebateCoordinator {
    pub fn new(
        api: ApiService,
        debate: &DebateSession,
        on_messages: Callback<Vec<DebateMessage>>,
        on_state: Callback<DebateState>,
        on_notice: Callback<Notice>,
    ) -> Self {
        let mut participants = debate.participants.clone();
        participants.sort_by_key(|p| p.participant_order);
        let max_rounds =
            clamp_max_rounds(debate.config.as_ref().and_then(|c| c.max_rounds));
        Self {
            api,
            debate_id: debate.id,
            participants,
            max_rounds,
            state: RefCell::new(DebateState::opening()),
            messages: RefCell::new(Vec::new()),
            token: RefCell::new(None),
            on_messages,
            on_state,
            on_notice,
        }
    }

    pub fn state(&self) -> DebateState {
        *self.state.borrow()
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn current_participant(&self) -> Option<&DebateParticipant> {
        let state = self.state.borrow();
        if state.finished {
            return None;
        }
        self.participants.get(state.turn as usize - 1)
    }

    fn emit_messages(&self) {
        self.on_messages.emit(self.messages.borrow().clone());
    }

    fn set_state(&self, state: DebateState) {
        *self.state.borrow_mut() = state;
        self.on_state.emit(state);
    }

    fn notice(&self, kind: NoticeKind, text: impl Into<String>) {
        self.on_notice.emit(Notice {
            kind,
            text: text.into(),
        });
    }

    pub async fn load_messages(&self) {
        match self.api.get_debate_messages(self.debate_id, None).await {
            Ok(messages) => {
                let state = derive_state(
                    &messages,
                    self.participants.len() as u32,
                    self.max_rounds,
                );
                *self.messages.borrow_mut() = messages;
                self.emit_messages();
                self.set_state(state);
            }
            Err(e) => {
                log::error!("failed to load debate messages: {e}");
                self.notice(NoticeKind::Error, "Could not load debate messages.");
            }
        }
    }

    /// Run the next participant's turn. No-ops while a turn is already
    /// streaming or after the debate has finished.
    pub async fn send_turn(self: Rc<Self>, moderator_prompt: Option<String>) {
        if self.token.borrow().is_some() {
            return;
        }
        let state = self.state();
        if state.finished {
            self.notice(NoticeKind::Info, "The debate has concluded.");
            return;
        }
        let Some(participant) = self.current_participant().cloned() else {
            return;
        };

        let token = Arc::new(AtomicBool::new(false));
        *self.token.borrow_mut() = Some(token.clone());

        // Temporary message; it receives the server id on completion.
        self.messages.borrow_mut().push(DebateMessage {
            id: None,
            debate_session_id: self.debate_id,
            participant_id: participant.id,
            content: String::new(),
            round_number: state.round,
            turn_number: state.turn,
            message_type: None,
        });
        self.emit_messages();

        let request = DebateTurnRequest {
            debate_session_id: self.debate_id,
            participant_id: participant.id,
            round_number: state.round,
            turn_number: state.turn,
            moderator_prompt,
        };
        let outcome = match self.api.send_debate_turn(&request).await {
            Ok(response) => {
                self.process_turn_stream(response.bytes_stream(), &token)
                    .await
            }
            Err(e) => TurnOutcome::Errored(e.to_string()),
        };
        self.resolve_turn(outcome, &token).await;
    }

    async fn resolve_turn(&self, outcome: TurnOutcome, token: &Arc<AtomicBool>) {
        if !self
            .token
            .borrow()
            .as_ref()
            .is_some_and(|t| Arc::ptr_eq(t, token))
        {
            return;
        }
        *self.token.borrow_mut() = None;
        match outcome {
            TurnOutcome::Aborted | TurnOutcome::Cancelled => {
                self.discard_temp_message();
            }
            TurnOutcome::Errored(message) => {
                self.discard_temp_message();
                self.notice(NoticeKind::Error, format!("Turn failed: {message}"));
            }
            TurnOutcome::Completed { message_id } => {
                self.promote_temp_message(message_id.as_deref());
                let next = advance(
                    self.state(),
                    self.participants.len() as u32,
                    self.max_rounds,
                );
                self.set_state(next);
                if next.finished {
                    if let Err(e) = self.api.complete_debate(self.debate_id).await {
                        log::error!("failed to mark debate complete: {e}");
                    }
                    self.notice(NoticeKind::Info, "The debate has concluded.");
                }
            }
        }
    }

    async fn process_turn_stream<S, B, E>(&self, stream: S, token: &Arc<AtomicBool>) -> TurnOutcome
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        futures_util::pin_mut!(stream);
        let mut decoder = StreamDecoder::new();
        while let Some(item) = stream.next().await {
            if token.load(Ordering::Relaxed) {
                return TurnOutcome::Aborted;
            }
            let chunk = match item {
                Ok(c) => c,
                Err(e) => return TurnOutcome::Errored(e.to_string()),
            };
            for event in decoder.push_chunk(chunk.as_ref()) {
                match event {
                    StreamEvent::Delta { text, .. } => {
                        self.append_to_temp_message(&text);
                    }
                    StreamEvent::CompletedFull {
                        content,
                        message_id,
                        ..
                    } => {
                        self.set_temp_message_content(&content);
                        return TurnOutcome::Completed { message_id };
                    }
                    StreamEvent::CompletedStreaming { message_id, .. } => {
                        return TurnOutcome::Completed { message_id };
                    }
                    StreamEvent::Cancelled => return TurnOutcome::Cancelled,
                    StreamEvent::Error(message) => return TurnOutcome::Errored(message),
                }
            }
        }
        TurnOutcome::Completed { message_id: None }
    }

    fn temp_index(&self) -> Option<usize> {
        self.messages.borrow().iter().rposition(|m| m.id.is_none())
    }

    fn append_to_temp_message(&self, text: &str) {
        if let Some(index) = self.temp_index() {
            self.messages.borrow_mut()[index].content.push_str(text);
            self.emit_messages();
        }
    }

    fn set_temp_message_content(&self, content: &str) {
        if let Some(index) = self.temp_index() {
            self.messages.borrow_mut()[index].content = content.to_string();
            self.emit_messages();
        }
    }

    fn promote_temp_message(&self, message_id: Option<&str>) {
        // A completion without a usable id leaves the placeholder as-is; a
        // fabricated id could collide with a real one, and the next full
        // reload adopts the server's copy anyway.
        let Some(id) = message_id.and_then(|s| s.parse::<i64>().ok()) else {
            return;
        };
        if let Some(index) = self.temp_index() {
            self.messages.borrow_mut()[index].id = Some(id);
            self.emit_messages();
        }
    }

    fn discard_temp_message(&self) {
        if let Some(index) = self.temp_index() {
            self.messages.borrow_mut().remove(index);
            self.emit_messages();
        }
    }

    /// Stop the streaming turn and drop its temporary message.
    pub fn cancel_turn(&self) {
        if let Some(token) = self.token.borrow_mut().take() {
            token.store(true, Ordering::Relaxed);
        }
        self.discard_temp_message();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DebateConfig, DebateSession};
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;

    fn message(round: u32, turn: u32, id: Option<i64>) -> DebateMessage {
        DebateMessage {
            id,
            debate_session_id: 1,
            participant_id: turn as i64,
            content: String::new(),
            round_number: round,
            turn_number: turn,
            message_type: None,
        }
    }

    fn participant(order: u32) -> DebateParticipant {
        DebateParticipant {
            id: order as i64,
            model_name: format!("model-{order}"),
            position: None,
            participant_order: order,
        }
    }

    fn coordinator(participant_count: u32, max_rounds: u32) -> Rc<DebateCoordinator> {
        let debate = DebateSession {
            id: 1,
            title: "t".into(),
            topic: "topic".into(),
            status: "active".into(),
            participants: (1..=participant_count).map(participant).collect(),
            config: Some(DebateConfig {
                max_rounds: Some(max_rounds),
            }),
        };
        Rc::new(DebateCoordinator::new(
            ApiService::new("http://localhost:8000"),
            &debate,
            Callback::noop(),
            Callback::noop(),
            Callback::noop(),
        ))
    }

    fn chunks(lines: &[&str]) -> impl Stream<Item = Result<Vec<u8>, Infallible>> {
        futures::stream::iter(
            lines
                .iter()
                .map(|l| Ok(l.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_empty_history_starts_at_round_one_turn_one() {
        let state = derive_state(&[], 2, 3);
        assert_eq!(
            state,
            DebateState {
                round: 1,
                turn: 1,
                finished: false
            }
        );
    }

    #[test]
    fn test_state_advances_within_a_round() {
        let state = derive_state(&[message(1, 1, Some(10))], 3, 3);
        assert_eq!(state.round, 1);
        assert_eq!(state.turn, 2);
    }

    #[test]
    fn test_round_rolls_over_after_last_participant() {
        let history = vec![message(1, 1, Some(10)), message(1, 2, Some(11))];
        let state = derive_state(&history, 2, 3);
        assert_eq!(state.round, 2);
        assert_eq!(state.turn, 1);
    }

    #[test]
    fn test_debate_finishes_after_final_round() {
        let history = vec![
            message(1, 1, Some(1)),
            message(1, 2, Some(2)),
            message(2, 1, Some(3)),
            message(2, 2, Some(4)),
        ];
        let state = derive_state(&history, 2, 2);
        assert!(state.finished);
        assert_eq!(state.round, 2);
    }

    #[test]
    fn test_temporary_messages_do_not_advance_state() {
        let history = vec![message(1, 1, Some(1)), message(1, 2, None)];
        let state = derive_state(&history, 2, 3);
        assert_eq!((state.round, state.turn), (1, 2));
    }

    #[test]
    fn test_max_rounds_is_clamped() {
        assert_eq!(clamp_max_rounds(None), DEFAULT_MAX_ROUNDS);
        assert_eq!(clamp_max_rounds(Some(0)), 1);
        assert_eq!(clamp_max_rounds(Some(99)), MAX_ROUNDS_CEILING);
        assert_eq!(clamp_max_rounds(Some(5)), 5);
    }

    #[test]
    fn test_turn_stream_accumulates_into_temp_message() {
        let coordinator = coordinator(2, 3);
        coordinator.messages.borrow_mut().push(message(1, 1, None));
        let token = Arc::new(AtomicBool::new(false));
        *coordinator.token.borrow_mut() = Some(token.clone());

        let outcome = block_on(coordinator.process_turn_stream(
            chunks(&[
                "data: {\"content\": \"I open \"}\n",
                "data: {\"content\": \"with this.\"}\n",
                "data: {\"done\": true, \"message_id\": 42}\n",
            ]),
            &token,
        ));
        block_on(coordinator.resolve_turn(outcome, &token));

        let messages = coordinator.messages.borrow();
        assert_eq!(messages[0].content, "I open with this.");
        assert_eq!(messages[0].id, Some(42));
        let state = coordinator.state();
        assert_eq!((state.round, state.turn), (1, 2));
    }

    #[test]
    fn test_completion_without_server_id_never_fabricates_one() {
        let coordinator = coordinator(2, 3);
        coordinator.messages.borrow_mut().push(message(1, 1, None));
        let token = Arc::new(AtomicBool::new(false));
        *coordinator.token.borrow_mut() = Some(token.clone());

        let outcome = block_on(coordinator.process_turn_stream(
            chunks(&[
                "data: {\"content\": \"closing words\"}\n",
                "data: {\"done\": true}\n",
            ]),
            &token,
        ));
        block_on(coordinator.resolve_turn(outcome, &token));

        let messages = coordinator.messages.borrow();
        assert_eq!(messages[0].content, "closing words");
        // Unpromoted rather than given a made-up id; the next reload picks
        // up the recorded one. The turn itself still advances.
        assert_eq!(messages[0].id, None);
        let state = coordinator.state();
        assert_eq!((state.round, state.turn), (1, 2));
    }

    #[test]
    fn test_cancelled_turn_discards_temp_message() {
        let coordinator = coordinator(2, 3);
        coordinator
            .messages
            .borrow_mut()
            .push(message(1, 1, Some(7)));
        coordinator.messages.borrow_mut().push(message(1, 2, None));
        coordinator.cancel_turn();

        let messages = coordinator.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, Some(7));
    }

    #[test]
    fn test_turn_error_discards_temp_message_without_advancing() {
        let coordinator = coordinator(2, 3);
        coordinator.messages.borrow_mut().push(message(1, 1, None));
        let token = Arc::new(AtomicBool::new(false));
        *coordinator.token.borrow_mut() = Some(token.clone());

        let outcome = block_on(coordinator.process_turn_stream(
            chunks(&["data: {\"error\": \"backend gone\"}\n"]),
            &token,
        ));
        block_on(coordinator.resolve_turn(outcome, &token));

        assert!(coordinator.messages.borrow().is_empty());
        let state = coordinator.state();
        assert_eq!((state.round, state.turn), (1, 1));
    }
}
