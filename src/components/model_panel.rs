use yew::prelude::*;

use crate::download::PullProgress;
use crate::models::Model;
use crate::utils::format_bytes;

#[derive(Properties, PartialEq)]
pub struct ModelPanelProps {
    pub models: Vec<Model>,
    pub active_model: String,
    /// In-flight pulls by model name.
    pub downloads: Vec<(String, PullProgress)>,
    pub on_select: Callback<String>,
    pub on_download: Callback<String>,
    pub on_delete: Callback<String>,
}

#[function_component(ModelPanel)]
pub fn model_panel(props: &ModelPanelProps) -> Html {
    let css = r#"
        .model-panel { flex-grow: 1; overflow-y: auto; padding: 20px; background: var(--bg-main); }
        .model-card { border: 1px solid var(--border-color); border-radius: 8px; padding: 15px; margin-bottom: 10px; background: white; display: flex; justify-content: space-between; align-items: center; gap: 15px; }
        .model-card.active { border-color: var(--accent-color); box-shadow: 0 0 0 2px rgba(16, 163, 127, 0.1); }
        .model-name { font-weight: 600; }
        .model-desc { font-size: 0.85rem; color: var(--text-secondary); margin-top: 4px; }
        .model-size { font-size: 0.8rem; color: #999; margin-top: 2px; }
        .model-actions { display: flex; gap: 8px; flex-shrink: 0; }
        .model-btn { border: 1px solid var(--border-color); background: white; border-radius: 6px; padding: 6px 12px; cursor: pointer; font-size: 0.85rem; }
        .model-btn:hover { background: #f0f0f0; }
        .model-btn.primary { background: var(--accent-color); color: white; border-color: var(--accent-color); }
        .model-btn.danger { color: var(--danger-color); }
        .progress-track { width: 180px; height: 8px; background: #eee; border-radius: 4px; overflow: hidden; }
        .progress-fill { height: 100%; background: var(--accent-color); transition: width 0.2s; }
        .progress-label { font-size: 0.75rem; color: var(--text-secondary); margin-top: 4px; }
    "#;

    html! {
        <>
            <style>{ css }</style>
            <div class="model-panel">
                { for props.models.iter().map(|model| {
                    let name = model.name.clone();
                    let is_active = name == props.active_model;
                    let active_class = if is_active { "active" } else { "" };
                    let download = props.downloads.iter().find(|(n, _)| *n == name);

                    let actions = if let Some((_, progress)) = download {
                        let percent = progress.percent();
                        let width = percent.unwrap_or(0);
                        let label = match percent {
                            Some(p) => format!("{} {p}%", progress.status),
                            None => progress.status.clone(),
                        };
                        html! {
                            <div>
                                <div class="progress-track">
                                    <div class="progress-fill" style={format!("width: {width}%;")}></div>
                                </div>
                                <div class="progress-label">{ label }</div>
                            </div>
                        }
                    } else if model.downloaded {
                        let on_select = props.on_select.clone();
                        let on_delete = props.on_delete.clone();
                        let select_name = name.clone();
                        let delete_name = name.clone();
                        html! {
                            <div class="model-actions">
                                if !is_active {
                                    <button class="model-btn primary"
                                        onclick={Callback::from(move |_| on_select.emit(select_name.clone()))}>
                                        { "Use" }
                                    </button>
                                }
                                <button class="model-btn danger"
                                    onclick={Callback::from(move |_| on_delete.emit(delete_name.clone()))}>
                                    { "Delete" }
                                </button>
                            </div>
                        }
                    } else {
                        let on_download = props.on_download.clone();
                        let download_name = name.clone();
                        html! {
                            <div class="model-actions">
                                <button class="model-btn"
                                    onclick={Callback::from(move |_| on_download.emit(download_name.clone()))}>
                                    { "Download" }
                                </button>
                            </div>
                        }
                    };

                    html! {
                        <div class={format!("model-card {}", active_class)}>
                            <div>
                                <div class="model-name">{ &model.name }</div>
                                if let Some(description) = &model.description {
                                    <div class="model-desc">{ description.clone() }</div>
                                }
                                if let Some(size) = model.size {
                                    <div class="model-size">{ format_bytes(size) }</div>
                                }
                            </div>
                            { actions }
                        </div>
                    }
                })}
            </div>
        </>
    }
}
