mod app;
mod components;
mod debate;
mod download;
mod models;
mod services;
mod session;
mod streaming;
mod utils;

use app::App;
use wasm_bindgen::prelude::*;

#[wasm_bindgen(start)]
pub fn run_app() {
    utils::set_panic_hook();
    let _ = console_log::init_with_level(log::Level::Debug);
    yew::Renderer::<App>::new().render();
}
