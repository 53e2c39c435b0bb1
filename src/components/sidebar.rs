use web_sys::HtmlInputElement;
use yew::prelude::*;

use crate::models::{ChatSession, UserFile};

#[derive(Properties, PartialEq)]
pub struct SidebarProps {
    pub open: bool,
    pub sessions: Vec<ChatSession>,
    /// Files the user has attached across all sessions.
    #[prop_or_default]
    pub files: Vec<UserFile>,
    pub active_session_id: Option<String>,
    pub on_select: Callback<String>,
    pub on_new: Callback<()>,
    pub on_search: Callback<String>,
}

#[function_component(Sidebar)]
pub fn sidebar(props: &SidebarProps) -> Html {
    let width = if props.open { "260px" } else { "0px" };
    let query = use_state(String::new);

    let css = r#"
        .sidebar { background: var(--bg-sidebar); border-right: 1px solid var(--border-color); display: flex; flex-direction: column; transition: width 0.3s cubic-bezier(0.25, 0.8, 0.25, 1); overflow: hidden; flex-shrink: 0; }
        .sidebar-content { width: 260px; height: 100%; display: flex; flex-direction: column; padding: 10px; }
        .session-list { flex-grow: 1; overflow-y: auto; margin-top: 10px; }
        .session-item { padding: 10px; border-radius: 6px; cursor: pointer; margin-bottom: 2px; font-size: 0.9rem; color: var(--text-primary); }
        .session-item:hover { background: #eaeaeb; }
        .session-item.active { background: #e0e0e0; font-weight: 500; }
        .session-title { overflow: hidden; text-overflow: ellipsis; white-space: nowrap; }
        .session-meta { font-size: 0.75rem; color: var(--text-secondary); display: flex; justify-content: space-between; margin-top: 2px; }
        .session-snippet { font-size: 0.78rem; color: var(--text-secondary); overflow: hidden; text-overflow: ellipsis; white-space: nowrap; margin-top: 2px; }
        .new-chat-btn { width: 100%; padding: 10px; border: 1px solid var(--border-color); background: white; border-radius: 6px; cursor: pointer; text-align: left; display: flex; gap: 10px; transition: background 0.2s; }
        .new-chat-btn:hover { background: #f0f0f0; }
        .files-section { border-top: 1px solid var(--border-color); padding-top: 8px; margin-top: 8px; max-height: 180px; overflow-y: auto; }
        .files-heading { font-size: 0.75rem; text-transform: uppercase; color: var(--text-secondary); margin: 4px 0 6px; }
        .file-item { padding: 6px 10px; border-radius: 6px; cursor: pointer; font-size: 0.82rem; color: var(--text-primary); overflow: hidden; text-overflow: ellipsis; white-space: nowrap; }
        .file-item:hover { background: #eaeaeb; }
        .file-date { font-size: 0.72rem; color: var(--text-secondary); }
        .search-input { width: 100%; margin-top: 10px; padding: 8px; border: 1px solid var(--border-color); border-radius: 6px; font-size: 0.85rem; outline: none; }
        .search-input:focus { border-color: var(--accent-color); }
    "#;

    let on_search_input = {
        let query = query.clone();
        let on_search = props.on_search.clone();
        Callback::from(move |e: InputEvent| {
            let input: HtmlInputElement = e.target_unchecked_into();
            let value = input.value();
            query.set(value.clone());
            on_search.emit(value);
        })
    };

    html! {
        <>
            <style>{ css }</style>
            <div class="sidebar" style={format!("width: {};", width)}>
                <div class="sidebar-content">
                    <button class="new-chat-btn" onclick={props.on_new.reform(|_| ())}>
                        <span>{ "+" }</span>
                        <span>{ "New Chat" }</span>
                    </button>
                    <input
                        class="search-input"
                        type="text"
                        placeholder="Search conversations..."
                        value={(*query).clone()}
                        oninput={on_search_input}
                    />
                    <div class="session-list">
                        { for props.sessions.iter().map(|session| {
                            let id = session.session_id.clone();
                            let is_active = props.active_session_id.as_deref() == Some(id.as_str());
                            let active_class = if is_active { "active" } else { "" };
                            let on_sel = props.on_select.clone();

                            html! {
                                <div class={format!("session-item {}", active_class)}
                                    onclick={Callback::from(move |_| on_sel.emit(id.clone()))}>
                                    <div class="session-title">{ &session.title }</div>
                                    if let Some(snippet) = &session.snippet {
                                        <div class="session-snippet">{ snippet.clone() }</div>
                                    }
                                    <div class="session-meta">
                                        <span>{ format!("{} messages", session.message_count) }</span>
                                        if let Some(model) = &session.model {
                                            <span>{ model.clone() }</span>
                                        }
                                    </div>
                                </div>
                            }
                        })}
                    </div>

                    if !props.files.is_empty() {
                        <div class="files-section">
                            <div class="files-heading">{ "Files" }</div>
                            { for props.files.iter().map(|file| {
                                // Clicking a file jumps to the session it was
                                // sent in.
                                let session_id = file.session_id.clone();
                                let on_sel = props.on_select.clone();
                                html! {
                                    <div class="file-item" title={file.filename.clone()}
                                        onclick={Callback::from(move |_| on_sel.emit(session_id.clone()))}>
                                        { format!("📎 {}", file.filename) }
                                        <span class="file-date">{ format!("  {}", file.created_at) }</span>
                                    </div>
                                }
                            })}
                        </div>
                    }
                </div>
            </div>
        </>
    }
}
