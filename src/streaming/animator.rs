use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use yew::Callback;

use crate::streaming::reducer::StreamingReducer;

/// Reveal cadence for non-streaming providers, in milliseconds per character.
pub const TYPING_TICK_MS: i32 = 10;

/// Replays a complete response into the reducer one character per tick,
/// emulating incremental generation for providers that answer in one shot.
///
/// Each tick writes the first `n` characters as a replacement (not an
/// append), so a skipped or coalesced timer tick cannot cause drift.
pub struct TypingAnimation {
    chars: Vec<char>,
    revealed: usize,
    message_id: Option<String>,
}

impl TypingAnimation {
    /// Opens the in-flight assistant message (empty content) and captures the
    /// text to reveal.
    pub fn begin(
        reducer: &mut StreamingReducer,
        full_text: &str,
        model: &str,
        session_id: Option<&str>,
        message_id: Option<String>,
    ) -> Self {
        reducer.begin_assistant("", model, session_id);
        Self {
            chars: full_text.chars().collect(),
            revealed: 0,
            message_id,
        }
    }

    /// One timer tick. Returns true once the full text is revealed and the
    /// message has been finalized.
    pub fn tick(&mut self, reducer: &mut StreamingReducer) -> bool {
        if self.revealed < self.chars.len() {
            self.revealed += 1;
            let shown: String = self.chars[..self.revealed].iter().collect();
            reducer.set_content(&shown);
        }
        if self.revealed == self.chars.len() {
            reducer.finalize(self.message_id.as_deref());
            true
        } else {
            false
        }
    }
}

/// Drives a `TypingAnimation` on the browser's interval timer.
///
/// Every tick checks the request's abort token first: once the request is
/// cancelled or superseded the interval clears itself and never writes into
/// the list again. `on_done` fires only after a natural finish.
pub fn spawn(
    mut animation: TypingAnimation,
    reducer: Rc<RefCell<StreamingReducer>>,
    token: Arc<AtomicBool>,
    on_done: Callback<()>,
) {
    let Some(window) = web_sys::window() else {
        return;
    };
    let handle: Rc<Cell<Option<i32>>> = Rc::new(Cell::new(None));
    let handle_in_tick = handle.clone();

    let tick = Closure::wrap(Box::new(move || {
        let clear = |handle: &Cell<Option<i32>>| {
            if let (Some(window), Some(id)) = (web_sys::window(), handle.get()) {
                window.clear_interval_with_handle(id);
            }
            handle.set(None);
        };
        if token.load(Ordering::Relaxed) {
            clear(&handle_in_tick);
            return;
        }
        if animation.tick(&mut reducer.borrow_mut()) {
            clear(&handle_in_tick);
            on_done.emit(());
        }
    }) as Box<dyn FnMut()>);

    match window.set_interval_with_callback_and_timeout_and_arguments_0(
        tick.as_ref().unchecked_ref(),
        TYPING_TICK_MS,
    ) {
        Ok(id) => {
            handle.set(Some(id));
            // The interval owns the closure for the rest of the page's life.
            tick.forget();
        }
        Err(_) => log::error!("failed to schedule typing animation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yew::Callback;

    fn reducer() -> StreamingReducer {
        StreamingReducer::new(Callback::from(|_| {}))
    }

    #[test]
    fn test_reveals_exactly_len_plus_one_monotone_states() {
        let mut r = reducer();
        let full = "Hello world";
        let mut animation = TypingAnimation::begin(&mut r, full, "gemini", None, None);

        let mut states = vec![r.messages()[0].content.clone()];
        loop {
            let done = animation.tick(&mut r);
            states.push(r.messages()[0].content.clone());
            if done {
                break;
            }
        }
        assert_eq!(states.len(), full.len() + 1);
        for pair in states.windows(2) {
            assert!(pair[1].len() > pair[0].len());
            assert!(pair[1].starts_with(&pair[0]));
        }
        assert_eq!(states.last().unwrap(), full);
        assert_eq!(r.messages()[0].streaming_complete, Some(true));
    }

    #[test]
    fn test_finalize_adopts_server_id() {
        let mut r = reducer();
        let mut animation = TypingAnimation::begin(&mut r, "ab", "m", Some("s1"), Some("srv-1".into()));
        while !animation.tick(&mut r) {}
        assert_eq!(r.messages()[0].id.as_deref(), Some("srv-1"));
    }

    #[test]
    fn test_empty_payload_finalizes_on_first_tick() {
        let mut r = reducer();
        let mut animation = TypingAnimation::begin(&mut r, "", "m", None, None);
        assert!(animation.tick(&mut r));
        assert_eq!(r.messages()[0].content, "");
        assert_eq!(r.messages()[0].streaming_complete, Some(true));
    }

    #[test]
    fn test_ticks_after_finalize_do_not_corrupt_the_message() {
        let mut r = reducer();
        let mut animation = TypingAnimation::begin(&mut r, "hi", "m", None, None);
        while !animation.tick(&mut r) {}
        // An orphaned tick must be a no-op: nothing is streaming anymore.
        animation.tick(&mut r);
        assert_eq!(r.messages().len(), 1);
        assert_eq!(r.messages()[0].content, "hi");
    }

    #[test]
    fn test_multibyte_text_is_revealed_on_char_boundaries() {
        let mut r = reducer();
        let full = "héllo é";
        let mut animation = TypingAnimation::begin(&mut r, full, "m", None, None);
        let mut steps = 0;
        while !animation.tick(&mut r) {
            steps += 1;
        }
        assert_eq!(steps + 1, full.chars().count());
        assert_eq!(r.messages()[0].content, full);
    }
}
