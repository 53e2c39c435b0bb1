use std::collections::HashMap;

use yew::prelude::*;

use crate::debate::{DebateState, Notice, NoticeKind};
use crate::models::{DebateMessage, DebateParticipant};
use crate::utils::render_markdown;

#[derive(Properties, PartialEq)]
pub struct DebatePanelProps {
    pub topic: String,
    pub participants: Vec<DebateParticipant>,
    pub messages: Vec<DebateMessage>,
    pub state: DebateState,
    pub max_rounds: u32,
    #[prop_or_default]
    pub notice: Option<Notice>,
    pub turn_in_progress: bool,
    pub on_next_turn: Callback<()>,
    pub on_cancel_turn: Callback<()>,
}

#[function_component(DebatePanel)]
pub fn debate_panel(props: &DebatePanelProps) -> Html {
    let css = r#"
        .debate-panel { flex-grow: 1; display: flex; flex-direction: column; background: var(--bg-main); overflow: hidden; }
        .debate-header { padding: 15px 20px; border-bottom: 1px solid var(--border-color); background: white; }
        .debate-topic { font-weight: 600; }
        .debate-status { font-size: 0.85rem; color: var(--text-secondary); margin-top: 4px; }
        .debate-messages { flex-grow: 1; overflow-y: auto; padding: 20px; display: flex; flex-direction: column; gap: 12px; }
        .debate-msg { border: 1px solid var(--border-color); border-radius: 8px; padding: 12px 15px; background: white; }
        .debate-msg.streaming { border-style: dashed; }
        .debate-msg-head { display: flex; justify-content: space-between; font-size: 0.8rem; color: var(--text-secondary); margin-bottom: 6px; }
        .debate-notice { margin: 0 20px 10px; padding: 8px 14px; border-radius: 6px; font-size: 0.85rem; }
        .debate-notice.info { background: #e3f2fd; color: #1565c0; }
        .debate-notice.error { background: #fdecea; color: #c62828; }
        .debate-controls { padding: 15px 20px; border-top: 1px solid var(--border-color); background: white; display: flex; gap: 10px; }
        .debate-btn { border: none; border-radius: 6px; padding: 8px 16px; cursor: pointer; background: var(--accent-color); color: white; }
        .debate-btn:disabled { background: #ccc; cursor: default; }
        .debate-btn.stop { background: var(--danger-color); }
    "#;

    let names: HashMap<i64, &str> = props
        .participants
        .iter()
        .map(|p| (p.id, p.model_name.as_str()))
        .collect();

    let status = if props.state.finished {
        "Debate concluded".to_string()
    } else {
        let speaker = props
            .participants
            .get(props.state.turn as usize - 1)
            .map(|p| p.model_name.as_str())
            .unwrap_or("?");
        format!(
            "Round {}/{} · turn {} · next: {}",
            props.state.round, props.max_rounds, props.state.turn, speaker
        )
    };

    html! {
        <>
            <style>{ css }</style>
            <div class="debate-panel">
                <div class="debate-header">
                    <div class="debate-topic">{ &props.topic }</div>
                    <div class="debate-status">{ status }</div>
                </div>

                <div class="debate-messages">
                    { for props.messages.iter().map(|msg| {
                        let speaker = names.get(&msg.participant_id).copied().unwrap_or("?");
                        let streaming_class = if msg.id.is_none() { " streaming" } else { "" };
                        html! {
                            <div class={format!("debate-msg{}", streaming_class)}>
                                <div class="debate-msg-head">
                                    <span>{ speaker }</span>
                                    <span>{ format!("round {} · turn {}", msg.round_number, msg.turn_number) }</span>
                                </div>
                                { render_markdown(&msg.content) }
                            </div>
                        }
                    })}
                </div>

                if let Some(notice) = &props.notice {
                    <div class={match notice.kind {
                        NoticeKind::Info => "debate-notice info",
                        NoticeKind::Error => "debate-notice error",
                    }}>
                        { notice.text.clone() }
                    </div>
                }

                <div class="debate-controls">
                    if props.turn_in_progress {
                        <button class="debate-btn stop" onclick={props.on_cancel_turn.reform(|_| ())}>
                            { "Stop turn" }
                        </button>
                    } else {
                        <button class="debate-btn"
                            disabled={props.state.finished}
                            onclick={props.on_next_turn.reform(|_| ())}>
                            { "Next turn" }
                        </button>
                    }
                </div>
            </div>
        </>
    }
}
