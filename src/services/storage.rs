use serde::{Deserialize, Serialize};
use web_sys::window;

const KEY_PREFERENCES: &str = "arena_prefs_v1";
pub const KEY_USER_ID: &str = "arena_user_id";

pub struct LocalStorage;

impl LocalStorage {
    pub fn get<T: for<'de> Deserialize<'de>>(key: &str) -> Option<T> {
        let window = window()?;
        let storage = window.local_storage().ok()??;
        let json = storage.get_item(key).ok()??;
        serde_json::from_str(&json).ok()
    }

    pub fn set<T: Serialize + ?Sized>(key: &str, value: &T) {
        if let Some(window) = window() {
            if let Ok(Some(storage)) = window.local_storage() {
                if let Ok(json) = serde_json::to_string(value) {
                    let _ = storage.set_item(key, &json);
                }
            }
        }
    }

    pub fn remove(key: &str) {
        if let Some(window) = window() {
            if let Ok(Some(storage)) = window.local_storage() {
                let _ = storage.remove_item(key);
            }
        }
    }
}

/// User preferences with explicit load-at-init and save-on-change. A handle
/// is passed into the app wiring; nothing reads localStorage ad hoc.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Preferences {
    pub base_url: String,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub theme: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            default_model: None,
            theme: "light".to_string(),
        }
    }
}

impl Preferences {
    pub fn load() -> Self {
        LocalStorage::get(KEY_PREFERENCES).unwrap_or_default()
    }

    pub fn save(&self) {
        LocalStorage::set(KEY_PREFERENCES, self);
    }
}
