use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen_futures::spawn_local;
use yew::prelude::*;

use crate::components::{
    chat_area::ChatArea, debate_panel::DebatePanel, model_panel::ModelPanel, sidebar::Sidebar,
};
use crate::debate::{DebateCoordinator, DebateState, Notice};
use crate::download::{run_pull, DownloadTracker, PullProgress};
use crate::models::{
    ChatSession, DebateCreateRequest, DebateMessage, DebateSession, Message, Model, UploadedFile,
    UserFile, UserInfo,
};
use crate::services::api::ApiService;
use crate::services::storage::{LocalStorage, Preferences, KEY_USER_ID};
use crate::session::{ChatError, SessionOrchestrator};
use crate::streaming::reducer::StreamingReducer;

const GLOBAL_STYLES: &str = r#"
    :root {
        --bg-app: #ffffff;
        --bg-main: #ffffff;
        --bg-sidebar: #f9f9f9;
        --border-color: #e5e5e5;
        --text-primary: #333;
        --text-secondary: #666;
        --accent-color: #10a37f;
        --accent-hover: #1a7f64;
        --danger-color: #ef4444;
    }

    * { box-sizing: border-box; }
    body { margin: 0; font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif; color: var(--text-primary); }

    .app-container { display: flex; height: 100vh; overflow: hidden; }
    .main-content { flex-grow: 1; display: flex; flex-direction: column; position: relative; background: var(--bg-app); }
    .header { padding: 10px 20px; border-bottom: 1px solid var(--border-color); display: flex; justify-content: space-between; align-items: center; height: 60px; }
    .header h2 { font-size: 1rem; margin: 0; font-weight: 600; overflow: hidden; white-space: nowrap; text-overflow: ellipsis; max-width: 500px; }
    .header-tabs { display: flex; gap: 6px; }
    .tab-btn { cursor: pointer; border: 1px solid var(--border-color); background: white; padding: 6px 12px; border-radius: 6px; font-size: 0.85rem; color: var(--text-primary); }
    .tab-btn.active { background: var(--accent-color); color: white; border-color: transparent; }
    .model-select { padding: 6px 10px; border: 1px solid var(--border-color); border-radius: 6px; font-size: 0.85rem; background: white; }
    .btn-icon { border: none; background: transparent; font-size: 1.2rem; padding: 5px; color: var(--text-secondary); cursor: pointer; }
    .btn-icon:hover { background: rgba(0,0,0,0.05); color: var(--text-primary); }

    .markdown-body { line-height: 1.6; font-size: 1rem; }
    .markdown-body pre { background: #2d2d2d; color: #fff; padding: 15px; border-radius: 6px; overflow-x: auto; }
    .markdown-body code { background: #f4f4f4; padding: 2px 4px; border-radius: 4px; font-family: monospace; font-size: 0.9em; }
    .markdown-body pre code { background: transparent; color: inherit; }
    .markdown-body p { margin-top: 0; margin-bottom: 1em; }

    .debate-loader { padding: 20px; display: flex; gap: 10px; align-items: center; }
    .debate-loader input { padding: 8px; border: 1px solid var(--border-color); border-radius: 6px; }
"#;

const DEFAULT_USERNAME: &str = "default";

#[derive(Clone, Copy, PartialEq, Eq)]
enum View {
    Chat,
    Models,
    Debate,
}

/// State handles the debate view writes into, bundled so loading and
/// creating a debate share the same wiring.
#[derive(Clone)]
struct DebateHandles {
    debate: UseStateHandle<Option<DebateSession>>,
    coordinator: Rc<RefCell<Option<Rc<DebateCoordinator>>>>,
    messages: UseStateHandle<Vec<DebateMessage>>,
    state: UseStateHandle<Option<DebateState>>,
    notice: UseStateHandle<Option<Notice>>,
}

async fn install_debate(api: ApiService, session: DebateSession, handles: DebateHandles) {
    let on_messages = Callback::from({
        let messages = handles.messages.clone();
        move |list| messages.set(list)
    });
    let on_state = Callback::from({
        let state = handles.state.clone();
        move |s| state.set(Some(s))
    });
    let on_notice = Callback::from({
        let notice = handles.notice.clone();
        move |n| notice.set(Some(n))
    });
    let coord = Rc::new(DebateCoordinator::new(
        api, &session, on_messages, on_state, on_notice,
    ));
    coord.load_messages().await;
    *handles.coordinator.borrow_mut() = Some(coord);
    handles.debate.set(Some(session));
}

#[function_component(App)]
pub fn app() -> Html {
    let preferences = use_mut_ref(Preferences::load);
    let api = use_memo((), {
        let preferences = preferences.clone();
        move |_| ApiService::new(&preferences.borrow().base_url)
    });

    let view = use_state(|| View::Chat);
    let user = use_state(|| None::<UserInfo>);
    let messages = use_state(Vec::<Message>::new);
    let sessions = use_state(Vec::<ChatSession>::new);
    let active_session = use_state(|| None::<String>);
    let is_loading = use_state(|| false);
    let restored_draft = use_state(|| None::<String>);
    let active_model = use_state(|| {
        preferences
            .borrow()
            .default_model
            .clone()
            .unwrap_or_default()
    });

    let models = use_state(Vec::<Model>::new);
    let tracker = use_mut_ref(DownloadTracker::load);
    // Pulls interrupted by a reload reappear with their last known progress.
    let downloads = use_state({
        let tracker = tracker.clone();
        move || {
            let t = tracker.borrow();
            t.active_models()
                .map(|name| {
                    (
                        name.to_string(),
                        t.progress(name).cloned().unwrap_or_default(),
                    )
                })
                .collect::<Vec<(String, PullProgress)>>()
        }
    });

    let debate = use_state(|| None::<DebateSession>);
    let coordinator = use_mut_ref(|| None::<Rc<DebateCoordinator>>);
    let debate_messages = use_state(Vec::<DebateMessage>::new);
    let debate_state = use_state(|| None::<DebateState>);
    let debate_notice = use_state(|| None::<Notice>);
    let turn_in_progress = use_state(|| false);

    let orchestrator = use_state(|| None::<Rc<SessionOrchestrator>>);
    let sidebar_open = use_state(|| true);
    let debate_id_input = use_node_ref();
    let debate_topic_input = use_node_ref();
    let debate_models_input = use_node_ref();

    let files = use_state(Vec::<UserFile>::new);

    let refresh_sessions = {
        let api = api.clone();
        let user = user.clone();
        let sessions = sessions.clone();
        let files = files.clone();
        Callback::from(move |()| {
            let Some(u) = (*user).clone() else { return };
            let api = (*api).clone();
            let sessions = sessions.clone();
            let files = files.clone();
            spawn_local(async move {
                match api.get_chat_sessions(u.id).await {
                    Ok(list) => sessions.set(list),
                    Err(e) => log::error!("failed to load sessions: {e}"),
                }
                match api.get_user_files(u.id).await {
                    Ok(list) => files.set(list),
                    Err(e) => log::error!("failed to load files: {e}"),
                }
            });
        })
    };

    // Apply the saved theme as a body class.
    {
        let preferences = preferences.clone();
        use_effect_with((), move |_| {
            if let Some(body) = web_sys::window().and_then(|w| w.document()).and_then(|d| d.body()) {
                body.set_class_name(&format!("theme-{}", preferences.borrow().theme));
            }
        });
    }

    // Resolve the user once: reuse the stored id when the server still knows
    // it, otherwise create the default user.
    {
        let api = api.clone();
        let user = user.clone();
        use_effect_with((), move |_| {
            let api = (*api).clone();
            spawn_local(async move {
                let stored_id: Option<i64> = LocalStorage::get(KEY_USER_ID);
                match api.get_users().await {
                    Ok(users) => {
                        let found = stored_id
                            .and_then(|id| users.iter().find(|u| u.id == id).cloned())
                            .or_else(|| {
                                users.iter().find(|u| u.username == DEFAULT_USERNAME).cloned()
                            });
                        match found {
                            Some(u) => {
                                LocalStorage::set(KEY_USER_ID, &u.id);
                                user.set(Some(u));
                            }
                            None => match api.create_user(DEFAULT_USERNAME).await {
                                Ok(u) => {
                                    LocalStorage::set(KEY_USER_ID, &u.id);
                                    user.set(Some(u));
                                }
                                Err(e) => log::error!("failed to create user: {e}"),
                            },
                        }
                    }
                    Err(e) => log::error!("failed to load users: {e}"),
                }
            });
        });
    }

    // Once the user is known, wire the orchestrator and load sessions/models.
    {
        let api = api.clone();
        let messages = messages.clone();
        let is_loading = is_loading.clone();
        let orchestrator = orchestrator.clone();
        let refresh_sessions = refresh_sessions.clone();
        let models_state = models.clone();
        let active_model = active_model.clone();
        let preferences = preferences.clone();
        use_effect_with((*user).clone(), move |user| {
            let Some(u) = user.clone() else { return };
            let reducer = Rc::new(RefCell::new(StreamingReducer::new(Callback::from({
                let messages = messages.clone();
                move |list| messages.set(list)
            }))));
            let loading_cb = Callback::from({
                let is_loading = is_loading.clone();
                move |value| is_loading.set(value)
            });
            let on_complete = refresh_sessions.reform(|()| ());
            orchestrator.set(Some(Rc::new(SessionOrchestrator::new(
                (*api).clone(),
                u.id,
                (*active_model).clone(),
                reducer,
                loading_cb,
                on_complete,
            ))));
            refresh_sessions.emit(());

            let api = (*api).clone();
            spawn_local(async move {
                match api.get_models().await {
                    Ok(list) => {
                        // No saved default: fall back to the first downloaded
                        // model.
                        if active_model.is_empty() {
                            if let Some(first) =
                                list.iter().find(|m| m.downloaded).map(|m| m.name.clone())
                            {
                                let mut prefs = preferences.borrow_mut();
                                prefs.default_model = Some(first.clone());
                                prefs.save();
                                active_model.set(first);
                            }
                        }
                        models_state.set(list);
                    }
                    Err(e) => log::error!("failed to load models: {e}"),
                }
            });
        });
    }

    // Keep the orchestrator's model in sync with the picker.
    {
        let orchestrator = orchestrator.clone();
        use_effect_with((*active_model).clone(), move |model| {
            if let Some(orch) = (*orchestrator).clone() {
                orch.set_model(model.clone());
            }
        });
    }

    // --- CHAT ACTIONS ---

    let on_send = {
        let orchestrator = orchestrator.clone();
        let restored_draft = restored_draft.clone();
        let active_session = active_session.clone();
        Callback::from(move |(text, file): (String, Option<UploadedFile>)| {
            let Some(orch) = (*orchestrator).clone() else { return };
            restored_draft.set(None);
            let active_session = active_session.clone();
            spawn_local(async move {
                match Rc::clone(&orch).send_message(&text, file, false).await {
                    Ok(()) => active_session.set(orch.session_id()),
                    Err(ChatError::UserNotFound) => {
                        // Stale identity: drop it and start over on reload.
                        LocalStorage::remove(KEY_USER_ID);
                    }
                }
            });
        })
    };

    let on_stop = {
        let orchestrator = orchestrator.clone();
        let restored_draft = restored_draft.clone();
        Callback::from(move |_| {
            if let Some(orch) = &*orchestrator {
                if let Some(pending) = orch.cancel() {
                    restored_draft.set(Some(pending.text));
                }
            }
        })
    };

    let on_regenerate = {
        let orchestrator = orchestrator.clone();
        Callback::from(move |index: usize| {
            let Some(orch) = (*orchestrator).clone() else { return };
            spawn_local(async move {
                if let Err(ChatError::UserNotFound) = orch.regenerate(index).await {
                    LocalStorage::remove(KEY_USER_ID);
                }
            });
        })
    };

    let on_new_chat = {
        let orchestrator = orchestrator.clone();
        let active_session = active_session.clone();
        let restored_draft = restored_draft.clone();
        Callback::from(move |()| {
            if let Some(orch) = &*orchestrator {
                orch.new_chat();
            }
            active_session.set(None);
            restored_draft.set(None);
        })
    };

    let on_select_session = {
        let orchestrator = orchestrator.clone();
        let active_session = active_session.clone();
        let active_model = active_model.clone();
        Callback::from(move |session_id: String| {
            let Some(orch) = (*orchestrator).clone() else { return };
            let active_session = active_session.clone();
            let active_model = active_model.clone();
            spawn_local(async move {
                if let Some(model) = orch.load_history(&session_id).await {
                    active_model.set(model);
                }
                active_session.set(Some(session_id));
            });
        })
    };

    let on_search = {
        let api = api.clone();
        let user = user.clone();
        let sessions = sessions.clone();
        let refresh_sessions = refresh_sessions.clone();
        Callback::from(move |query: String| {
            let Some(u) = (*user).clone() else { return };
            if query.trim().is_empty() {
                refresh_sessions.emit(());
                return;
            }
            let api = (*api).clone();
            let sessions = sessions.clone();
            spawn_local(async move {
                match api.search_chat_history(u.id, &query).await {
                    Ok(results) => sessions.set(results),
                    Err(e) => log::error!("search failed: {e}"),
                }
            });
        })
    };

    // --- MODEL ACTIONS ---

    let refresh_models = {
        let api = api.clone();
        let models = models.clone();
        Callback::from(move |()| {
            let api = (*api).clone();
            let models = models.clone();
            spawn_local(async move {
                match api.get_models().await {
                    Ok(list) => models.set(list),
                    Err(e) => log::error!("failed to load models: {e}"),
                }
            });
        })
    };

    let on_download_model = {
        let api = api.clone();
        let downloads = downloads.clone();
        let tracker = tracker.clone();
        let refresh_models = refresh_models.clone();
        Callback::from(move |name: String| {
            if downloads.iter().any(|(n, _)| *n == name) {
                return;
            }
            {
                let mut t = tracker.borrow_mut();
                t.begin(&name);
                t.save();
            }
            let mut list = (*downloads).clone();
            list.push((name.clone(), PullProgress::default()));
            downloads.set(list);

            let api = (*api).clone();
            let downloads = downloads.clone();
            let tracker = tracker.clone();
            let refresh_models = refresh_models.clone();
            spawn_local(async move {
                let result = match api.pull_model(&name).await {
                    Ok(response) => {
                        let downloads_inner = downloads.clone();
                        let tracker_inner = tracker.clone();
                        let name_inner = name.clone();
                        run_pull(response.bytes_stream(), move |progress| {
                            {
                                let mut t = tracker_inner.borrow_mut();
                                t.update(&name_inner, progress.clone());
                                t.save();
                            }
                            let mut list = (*downloads_inner).clone();
                            if let Some(entry) =
                                list.iter_mut().find(|(n, _)| *n == name_inner)
                            {
                                entry.1 = progress;
                            }
                            downloads_inner.set(list);
                        })
                        .await
                    }
                    Err(e) => Err(e.to_string()),
                };
                if let Err(message) = result {
                    log::error!("model download failed: {message}");
                }
                {
                    let mut t = tracker.borrow_mut();
                    t.finish(&name);
                    t.save();
                }
                let mut list = (*downloads).clone();
                list.retain(|(n, _)| *n != name);
                downloads.set(list);
                refresh_models.emit(());
            });
        })
    };

    let on_delete_model = {
        let api = api.clone();
        let refresh_models = refresh_models.clone();
        Callback::from(move |name: String| {
            let confirmed = web_sys::window()
                .and_then(|w| w.confirm_with_message(&format!("Delete {name}?")).ok())
                .unwrap_or(false);
            if !confirmed {
                return;
            }
            let api = (*api).clone();
            let refresh_models = refresh_models.clone();
            spawn_local(async move {
                if let Err(e) = api.delete_model(&name).await {
                    log::error!("failed to delete model: {e}");
                }
                refresh_models.emit(());
            });
        })
    };

    let on_select_model = {
        let active_model = active_model.clone();
        let preferences = preferences.clone();
        Callback::from(move |name: String| {
            let mut prefs = preferences.borrow_mut();
            prefs.default_model = Some(name.clone());
            prefs.save();
            active_model.set(name);
        })
    };

    // --- DEBATE ACTIONS ---

    let debate_handles = DebateHandles {
        debate: debate.clone(),
        coordinator: coordinator.clone(),
        messages: debate_messages.clone(),
        state: debate_state.clone(),
        notice: debate_notice.clone(),
    };

    let on_load_debate = {
        let api = api.clone();
        let handles = debate_handles.clone();
        Callback::from(move |debate_id: i64| {
            let api = (*api).clone();
            let handles = handles.clone();
            spawn_local(async move {
                match api.get_debate(debate_id).await {
                    Ok(session) => install_debate(api, session, handles).await,
                    Err(e) => log::error!("failed to load debate: {e}"),
                }
            });
        })
    };

    let on_create_debate = {
        let api = api.clone();
        let handles = debate_handles.clone();
        Callback::from(move |(topic, participants): (String, Vec<String>)| {
            if topic.trim().is_empty() || participants.len() < 2 {
                return;
            }
            let api = (*api).clone();
            let handles = handles.clone();
            spawn_local(async move {
                let request = DebateCreateRequest {
                    topic,
                    participants,
                    max_rounds: None,
                };
                match api.create_debate(&request).await {
                    Ok(session) => install_debate(api, session, handles).await,
                    Err(e) => log::error!("failed to create debate: {e}"),
                }
            });
        })
    };

    let on_next_turn = {
        let coordinator = coordinator.clone();
        let turn_in_progress = turn_in_progress.clone();
        Callback::from(move |()| {
            let Some(coord) = coordinator.borrow().clone() else { return };
            let turn_in_progress = turn_in_progress.clone();
            turn_in_progress.set(true);
            spawn_local(async move {
                coord.send_turn(None).await;
                turn_in_progress.set(false);
            });
        })
    };

    let on_cancel_turn = {
        let coordinator = coordinator.clone();
        let turn_in_progress = turn_in_progress.clone();
        Callback::from(move |()| {
            if let Some(coord) = &*coordinator.borrow() {
                coord.cancel_turn();
            }
            turn_in_progress.set(false);
        })
    };

    // --- LAYOUT ---

    let header_title = match *view {
        View::Chat => sessions
            .iter()
            .find(|s| Some(&s.session_id) == active_session.as_ref())
            .map(|s| s.title.clone())
            .unwrap_or_else(|| "New Chat".to_string()),
        View::Models => "Models".to_string(),
        View::Debate => "Debate Arena".to_string(),
    };

    let toggle_sidebar = sidebar_open.clone();

    let tab = |target: View, label: &str| -> Html {
        let view = view.clone();
        let active = if *view == target { "active" } else { "" };
        html! {
            <button class={format!("tab-btn {}", active)}
                onclick={Callback::from(move |_| view.set(target))}>
                { label }
            </button>
        }
    };

    let main = match *view {
        View::Chat => html! {
            <ChatArea
                messages={(*messages).clone()}
                is_loading={*is_loading}
                on_send={on_send}
                on_stop={on_stop}
                on_regenerate={on_regenerate}
                restored_draft={(*restored_draft).clone()}
            />
        },
        View::Models => html! {
            <ModelPanel
                models={(*models).clone()}
                active_model={(*active_model).clone()}
                downloads={(*downloads).clone()}
                on_select={on_select_model.clone()}
                on_download={on_download_model}
                on_delete={on_delete_model}
            />
        },
        View::Debate => match ((*debate).clone(), *debate_state) {
            (Some(session), Some(state)) => {
                let max_rounds = coordinator
                    .borrow()
                    .as_ref()
                    .map(|c| c.max_rounds())
                    .unwrap_or(1);
                html! {
                    <DebatePanel
                        topic={session.topic.clone()}
                        participants={session.participants.clone()}
                        messages={(*debate_messages).clone()}
                        state={state}
                        max_rounds={max_rounds}
                        notice={(*debate_notice).clone()}
                        turn_in_progress={*turn_in_progress}
                        on_next_turn={on_next_turn}
                        on_cancel_turn={on_cancel_turn}
                    />
                }
            }
            _ => {
                let on_load = on_load_debate.clone();
                let id_ref = debate_id_input.clone();
                let load_id_ref = id_ref.clone();

                let on_create = on_create_debate.clone();
                let topic_ref = debate_topic_input.clone();
                let models_ref = debate_models_input.clone();
                let create_topic_ref = topic_ref.clone();
                let create_models_ref = models_ref.clone();
                html! {
                    <div>
                        <div class="debate-loader">
                            <input type="number" placeholder="Debate id" ref={id_ref} />
                            <button class="tab-btn" onclick={Callback::from(move |_| {
                                if let Some(input) = load_id_ref.cast::<web_sys::HtmlInputElement>() {
                                    if let Ok(id) = input.value().parse::<i64>() {
                                        on_load.emit(id);
                                    }
                                }
                            })}>
                                { "Load debate" }
                            </button>
                        </div>
                        <div class="debate-loader">
                            <input type="text" placeholder="Topic" ref={topic_ref} />
                            <input type="text" placeholder="Models (comma separated)" ref={models_ref} />
                            <button class="tab-btn" onclick={Callback::from(move |_| {
                                let topic = create_topic_ref
                                    .cast::<web_sys::HtmlInputElement>()
                                    .map(|i| i.value())
                                    .unwrap_or_default();
                                let participants: Vec<String> = create_models_ref
                                    .cast::<web_sys::HtmlInputElement>()
                                    .map(|i| i.value())
                                    .unwrap_or_default()
                                    .split(',')
                                    .map(|s| s.trim().to_string())
                                    .filter(|s| !s.is_empty())
                                    .collect();
                                on_create.emit((topic, participants));
                            })}>
                                { "Create debate" }
                            </button>
                        </div>
                    </div>
                }
            }
        },
    };

    html! {
        <>
            <style>{ GLOBAL_STYLES }</style>
            <div class="app-container">
                <Sidebar
                    open={*sidebar_open}
                    sessions={(*sessions).clone()}
                    files={(*files).clone()}
                    active_session_id={(*active_session).clone()}
                    on_select={on_select_session}
                    on_new={on_new_chat}
                    on_search={on_search}
                />

                <div class="main-content">
                    <div class="header">
                        <div style="display: flex; gap: 10px; align-items: center; min-width: 0;">
                            <button class="btn-icon" onclick={Callback::from(move |_| toggle_sidebar.set(!*toggle_sidebar))} title="Toggle Menu">
                                <svg width="24" height="24" viewBox="0 0 24 24" fill="none" stroke="currentColor" stroke-width="2" stroke-linecap="round" stroke-linejoin="round"><line x1="3" y1="12" x2="21" y2="12"></line><line x1="3" y1="6" x2="21" y2="6"></line><line x1="3" y1="18" x2="21" y2="18"></line></svg>
                            </button>
                            <h2>{ header_title }</h2>
                        </div>
                        <div style="display: flex; gap: 10px; align-items: center;">
                            <select class="model-select"
                                disabled={*is_loading}
                                onchange={{
                                    let on_select_model = on_select_model.clone();
                                    Callback::from(move |e: Event| {
                                        let select: web_sys::HtmlSelectElement = e.target_unchecked_into();
                                        on_select_model.emit(select.value());
                                    })
                                }}>
                                { for models.iter().filter(|m| m.downloaded).map(|m| {
                                    html! {
                                        <option value={m.name.clone()} selected={m.name == *active_model}>
                                            { &m.name }
                                        </option>
                                    }
                                })}
                            </select>
                            <div class="header-tabs">
                                { tab(View::Chat, "Chat") }
                                { tab(View::Models, "Models") }
                                { tab(View::Debate, "Debate") }
                            </div>
                        </div>
                    </div>

                    { main }
                </div>
            </div>
        </>
    }
}
