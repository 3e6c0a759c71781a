use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::layout::LayoutConfig;
use crate::session::SessionConfig;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_token_server_url")]
    pub token_server_url: String,
    #[serde(default = "default_oauth_exchange_url")]
    pub oauth_exchange_url: String,
    #[serde(default = "default_token_timeout_ms")]
    pub token_timeout_ms: u64,
    #[serde(default = "default_privileged_id_floor")]
    pub privileged_id_floor: u64,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub last_room: Option<String>,
}

fn default_token_server_url() -> String {
    "http://localhost:3000/api/agora/token".to_string()
}

fn default_oauth_exchange_url() -> String {
    "http://localhost:3000/api/google-oauth".to_string()
}

fn default_token_timeout_ms() -> u64 {
    5000
}

fn default_privileged_id_floor() -> u64 {
    100_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_name: None,
            token_server_url: default_token_server_url(),
            oauth_exchange_url: default_oauth_exchange_url(),
            token_timeout_ms: default_token_timeout_ms(),
            privileged_id_floor: default_privileged_id_floor(),
            layout: LayoutConfig::default(),
            last_room: None,
        }
    }
}

impl Settings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            layout: self.layout.clone(),
            token_timeout: Duration::from_millis(self.token_timeout_ms),
            privileged_id_floor: self.privileged_id_floor,
        }
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        self.lock().display_name = name;
        self.save();
    }

    pub fn set_token_server_url(&self, url: &str) {
        self.lock().token_server_url = url.to_string();
        self.save();
    }

    pub fn set_last_room(&self, room: Option<String>) {
        self.lock().last_room = room;
        self.save();
    }

    pub fn set_layout(&self, layout: LayoutConfig) {
        self.lock().layout = layout;
        self.save();
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!(path = %self.file_path.display(), "failed to save settings: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "corrupt settings, using defaults: {e}");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}
