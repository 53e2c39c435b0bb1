use wasm_bindgen::JsCast;
use web_sys::{HtmlElement, HtmlInputElement, HtmlTextAreaElement};
use yew::prelude::*;

use crate::models::{Message, Role, UploadedFile};
use crate::utils::render_markdown;

#[derive(Properties, PartialEq)]
pub struct ChatAreaProps {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub on_send: Callback<(String, Option<UploadedFile>)>,
    pub on_stop: Callback<()>,
    pub on_regenerate: Callback<usize>,
    /// Input text restored after a cancellation.
    #[prop_or_default]
    pub restored_draft: Option<String>,
}

/// Whether a generation is in progress from the UI's point of view. The
/// request loop flips `is_loading` off at the first token, so the streaming
/// and animating phases are read off the tail of the message list instead.
fn generation_in_progress(messages: &[Message], is_loading: bool) -> bool {
    is_loading || messages.last().is_some_and(|m| m.is_streaming())
}

fn read_file_as_data_url(
    file: web_sys::File,
    on_ready: Callback<UploadedFile>,
) -> Result<(), wasm_bindgen::JsValue> {
    let reader = web_sys::FileReader::new()?;
    let reader_clone = reader.clone();
    let filename = file.name();
    let onload = wasm_bindgen::closure::Closure::wrap(Box::new(move |_: web_sys::Event| {
        if let Ok(value) = reader_clone.result() {
            if let Some(data_url) = value.as_string() {
                // Strip the "data:<mime>;base64," prefix; the server wants
                // bare base64.
                let encoded = data_url
                    .split_once(',')
                    .map(|(_, b)| b.to_string())
                    .unwrap_or(data_url);
                on_ready.emit(UploadedFile {
                    filename: filename.clone(),
                    images: vec![encoded],
                });
            }
        }
    }) as Box<dyn FnMut(_)>);
    reader.set_onload(Some(onload.as_ref().unchecked_ref()));
    onload.forget();
    reader.read_as_data_url(&file)
}

#[function_component(ChatArea)]
pub fn chat_area(props: &ChatAreaProps) -> Html {
    let input_text = use_state(String::new);
    let attached_file = use_state(|| None::<UploadedFile>);
    let scroll_ref = use_node_ref();
    let is_at_bottom = use_state(|| true);

    // A cancelled send puts its text back into the input box.
    {
        let text = input_text.clone();
        use_effect_with(props.restored_draft.clone(), move |draft| {
            if let Some(draft) = draft {
                text.set(draft.clone());
            }
        });
    }

    // Auto-scroll while streaming, unless the user scrolled away.
    {
        let div_ref = scroll_ref.clone();
        let is_at_bottom_val = *is_at_bottom;
        let last_len = props.messages.last().map(|m| m.content.len()).unwrap_or(0);
        let len = props.messages.len();

        use_effect_with((len, last_len), move |_| {
            if is_at_bottom_val {
                if let Some(div) = div_ref.cast::<HtmlElement>() {
                    div.set_scroll_top(div.scroll_height());
                }
            }
        });
    }

    let on_scroll = {
        let is_at_bottom = is_at_bottom.clone();
        Callback::from(move |e: Event| {
            let div: HtmlElement = e.target_unchecked_into();
            let distance_from_bottom = div.scroll_height() - div.scroll_top() - div.client_height();
            let currently_at_bottom = distance_from_bottom < 35;
            if *is_at_bottom != currently_at_bottom {
                is_at_bottom.set(currently_at_bottom);
            }
        })
    };

    let submit = {
        let text = input_text.clone();
        let file = attached_file.clone();
        let on_send = props.on_send.clone();
        let is_at_bottom = is_at_bottom.clone();
        Callback::from(move |()| {
            if text.is_empty() && file.is_none() {
                return;
            }
            on_send.emit(((*text).clone(), (*file).clone()));
            text.set(String::new());
            file.set(None);
            is_at_bottom.set(true);
        })
    };

    let on_submit = {
        let submit = submit.clone();
        Callback::from(move |e: SubmitEvent| {
            e.prevent_default();
            submit.emit(());
        })
    };

    let on_keydown = {
        let submit = submit.clone();
        Callback::from(move |e: KeyboardEvent| {
            if e.key() == "Enter" && !e.shift_key() {
                e.prevent_default();
                submit.emit(());
            }
        })
    };

    let on_input = {
        let text = input_text.clone();
        Callback::from(move |e: InputEvent| {
            let i: HtmlTextAreaElement = e.target_unchecked_into();
            text.set(i.value());
        })
    };

    let on_file_change = {
        let attached = attached_file.clone();
        Callback::from(move |e: Event| {
            let input: HtmlInputElement = e.target_unchecked_into();
            if let Some(file) = input.files().and_then(|list| list.get(0)) {
                let attached = attached.clone();
                let on_ready = Callback::from(move |uploaded| attached.set(Some(uploaded)));
                if let Err(e) = read_file_as_data_url(file, on_ready) {
                    log::error!("failed to read attachment: {e:?}");
                }
            }
            input.set_value("");
        })
    };

    let css = r#"
        .messages-container {
            flex-grow: 1;
            overflow-y: auto;
            padding: 20px;
            display: flex;
            flex-direction: column;
            gap: 15px;
            background-color: var(--bg-main);
            scroll-behavior: smooth;
        }

        .message-row { display: flex; width: 100%; }
        .message-row.user { justify-content: flex-end; }
        .message-row.assistant { justify-content: flex-start; }

        .bubble-group { display: flex; gap: 10px; max-width: 85%; align-items: flex-end; }
        .message-row.user .bubble-group { flex-direction: row-reverse; }

        .avatar { width: 32px; height: 32px; border-radius: 50%; display: flex; align-items: center; justify-content: center; flex-shrink: 0; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
        .avatar.user { background: #555; color: white; }
        .avatar.assistant { background: var(--accent-color); color: white; }

        .msg-bubble {
            padding: 10px 15px;
            border-radius: 12px;
            font-size: 0.95rem;
            line-height: 1.5;
            box-shadow: 0 1px 2px rgba(0,0,0,0.05);
            min-width: 0;
            overflow-wrap: anywhere;
            word-break: break-word;
            max-width: 100%;
        }

        .message-row.user .msg-bubble { background-color: #e3f2fd; color: #1565c0; border-bottom-right-radius: 2px; }
        .message-row.assistant .msg-bubble { background-color: #f5f5f5; color: #333; border-bottom-left-radius: 2px; }
        .message-row.assistant .msg-bubble.cancelled { color: #999; font-style: italic; border: 1px dashed #ccc; }

        .msg-model { font-size: 0.7rem; color: #999; margin-top: 4px; }
        .msg-attachment { font-size: 0.8rem; color: #777; margin-bottom: 4px; }

        .regen-btn { opacity: 0; border: none; background: none; color: #999; cursor: pointer; padding: 2px 6px; border-radius: 4px; font-size: 0.75rem; }
        .message-row:hover .regen-btn { opacity: 1; }
        .regen-btn:hover { background: #e0e0e0; color: #333; }

        .input-wrapper { border-top: 1px solid var(--border-color); padding: 20px; display: flex; justify-content: center; background: white; position: relative; }
        .input-container { width: 100%; max-width: 900px; position: relative; display: flex; flex-direction: column; }
        .chat-input { width: 100%; padding: 12px; padding-right: 45px; border: 1px solid var(--border-color); border-radius: 8px; box-shadow: 0 2px 5px rgba(0,0,0,0.05); resize: none; font-family: inherit; outline: none; transition: border 0.2s; }
        .chat-input:focus { border-color: var(--accent-color); box-shadow: 0 0 0 2px rgba(16, 163, 127, 0.1); }
        .send-btn { position: absolute; right: 8px; bottom: 8px; background: var(--accent-color); color: white; border: none; border-radius: 4px; padding: 6px 10px; cursor: pointer; transition: opacity 0.2s; }
        .send-btn:disabled { background: #ccc; cursor: default; }
        .send-btn:hover:not(:disabled) { background: var(--accent-hover); }
        .attach-btn { position: absolute; left: 8px; bottom: 8px; background: none; border: none; color: #888; cursor: pointer; padding: 6px; }
        .attach-chip { align-self: flex-start; background: #eef; border-radius: 12px; padding: 2px 10px; font-size: 0.8rem; margin-bottom: 6px; color: #456; }
        .attach-chip button { border: none; background: none; cursor: pointer; color: #999; }
    "#;

    let user_icon = html! {
        <svg width="20" height="20" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round">
            <path d="M20 21v-2a4 4 0 0 0-4-4H8a4 4 0 0 0-4 4v2"></path>
            <circle cx="12" cy="7" r="4"></circle>
        </svg>
    };
    let bot_icon = html! {
        <svg width="20" height="20" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round">
            <rect x="3" y="11" width="18" height="10" rx="2"></rect>
            <circle cx="12" cy="5" r="2"></circle>
            <path d="M12 7v4"></path>
            <line x1="8" y1="16" x2="8" y2="16"></line>
            <line x1="16" y1="16" x2="16" y2="16"></line>
        </svg>
    };

    // The loading indicator only shows before the first delta arrives; once a
    // streaming message exists its growing bubble is the indicator.
    let awaiting_first_token =
        props.is_loading && !props.messages.last().is_some_and(|m| m.is_streaming());
    let busy = generation_in_progress(&props.messages, props.is_loading);

    html! {
        <>
            <style>{ css }</style>

            <div class="messages-container" ref={scroll_ref} onscroll={on_scroll}>
                { for props.messages.iter().enumerate().map(|(index, msg)| {
                    let is_user = msg.role == Role::User;
                    let role_cls = if is_user { "user" } else { "assistant" };
                    let icon = if is_user { user_icon.clone() } else { bot_icon.clone() };
                    let cancelled_cls = if msg.is_cancelled == Some(true) { " cancelled" } else { "" };

                    let attachment = msg.images.as_ref().filter(|i| !i.is_empty()).map(|images| html! {
                        <div class="msg-attachment">{ format!("📎 {} attachment(s)", images.len()) }</div>
                    });
                    let model_tag = msg.model.as_ref().filter(|_| !is_user).map(|model| html! {
                        <div class="msg-model">{ model.clone() }</div>
                    });
                    // Finished assistant messages can be regenerated.
                    let regen = (!is_user && !msg.is_streaming() && !busy).then(|| {
                        let on_regenerate = props.on_regenerate.clone();
                        html! {
                            <button class="regen-btn" title="Regenerate response"
                                onclick={Callback::from(move |_| on_regenerate.emit(index))}>
                                { "↺ Regenerate" }
                            </button>
                        }
                    });

                    html! {
                        <div class={format!("message-row {}", role_cls)}>
                            <div class="bubble-group">
                                <div class={format!("avatar {}", role_cls)}>{ icon }</div>
                                <div>
                                    { attachment }
                                    <div class={format!("msg-bubble{}", cancelled_cls)}>{ render_markdown(&msg.content) }</div>
                                    { model_tag }
                                    { regen }
                                </div>
                            </div>
                        </div>
                    }
                })}

                if awaiting_first_token {
                    <div class="message-row assistant">
                        <div class="bubble-group">
                            <div class="avatar assistant">{ bot_icon.clone() }</div>
                            <div class="msg-bubble" style="color: #888; font-style: italic;">
                                { "Thinking..." }
                            </div>
                        </div>
                    </div>
                }
            </div>

            <div class="input-wrapper">
                <form class="input-container" onsubmit={on_submit}>
                    if let Some(file) = (*attached_file).clone() {
                        <div class="attach-chip">
                            { format!("📎 {}", file.filename) }
                            <button type="button" onclick={{
                                let attached = attached_file.clone();
                                Callback::from(move |_| attached.set(None))
                            }}>{ "×" }</button>
                        </div>
                    }
                    <textarea
                        class="chat-input"
                        rows="1"
                        placeholder="Message the model..."
                        value={(*input_text).clone()}
                        oninput={on_input}
                        onkeydown={on_keydown}
                        disabled={busy}
                        style="height: 50px; overflow-y: hidden; padding-left: 40px;"
                    />
                    <label class="attach-btn" title="Attach a file">
                        { "📎" }
                        <input type="file" style="display: none;" onchange={on_file_change} />
                    </label>

                    if busy {
                        <button
                            type="button"
                            class="send-btn"
                            style="background: var(--danger-color);"
                            onclick={props.on_stop.reform(|_| ())}
                        >
                            { "Stop" }
                        </button>
                    } else {
                        <button type="submit" class="send-btn"
                            disabled={input_text.is_empty() && attached_file.is_none()}>
                            { "Send" }
                        </button>
                    }
                </form>
            </div>
        </>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_stays_reachable_through_streaming_and_animation() {
        // Before the first token, only the loading flag is set.
        assert!(generation_in_progress(&[], true));
        // Once tokens flow the loading flag drops, but the tail of the list
        // is still streaming (covers both delta and animation playback).
        let mid_stream = vec![
            Message::user("question".into(), None),
            Message::assistant_streaming("llama3", None),
        ];
        assert!(generation_in_progress(&mid_stream, false));
    }

    #[test]
    fn test_input_reenables_once_the_tail_is_finalized() {
        let mut finished = Message::assistant_streaming("llama3", None);
        finished.streaming_complete = Some(true);
        assert!(!generation_in_progress(&[finished], false));
        assert!(!generation_in_progress(&[], false));
    }
}
