pub mod chat_area;
pub mod debate_panel;
pub mod model_panel;
pub mod sidebar;
