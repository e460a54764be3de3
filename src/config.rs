use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "smartmeal", "smartmeal")
}

fn default_data_dir() -> PathBuf {
    if let Some(path) = std::env::var_os("SMARTMEAL_DATA_DIR") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.data_dir().to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".smartmeal")
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("SMARTMEAL_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.config_dir().join("config.toml");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".smartmeal-config.toml")
}

pub fn google_token_path(config: &Config) -> PathBuf {
    config.data.data_dir.join("google_token.json")
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub gemini: GeminiConfig,
    pub google: GoogleConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeminiConfig {
    pub enabled: bool,
    pub api_key: String,
    pub model: String,
    pub vision_model: String,
    pub api_base: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            vision_model: "gemini-2.5-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_seconds: 30,
            temperature: 0.4,
            max_output_tokens: 1024,
        }
    }
}

impl GeminiConfig {
    pub fn resolve_api_key(&self) -> String {
        if !self.api_key.trim().is_empty() {
            return self.api_key.trim().to_string();
        }
        std::env::var("GEMINI_API_KEY").unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub calendar_api: String,
    pub tasks_api: String,
    pub timeout_seconds: u64,
    /// IANA zone sent with calendar events; empty means `$TZ`, then UTC.
    pub time_zone: String,
    pub event_description: String,
    pub task_notes: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            calendar_api: "https://www.googleapis.com/calendar/v3".to_string(),
            tasks_api: "https://tasks.googleapis.com/tasks/v1".to_string(),
            timeout_seconds: 15,
            time_zone: String::new(),
            event_description: "Planned via SmartMeal AI".to_string(),
            task_notes: "Added from SmartMeal AI".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = config_path();

        let mut config = if let Ok(content) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse config.toml ({config_path:?}), using defaults: {e}");
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        let changed = config.normalize_paths();

        if (changed || !config_path.exists())
            && let Err(e) = config.save_to_path(&config_path)
        {
            warn!("Failed to write config.toml ({config_path:?}): {e}");
        }

        config
    }

    pub fn save_to_path(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, content)
    }

    fn normalize_paths(&mut self) -> bool {
        let mut changed = false;

        if self.data.data_dir.as_os_str().is_empty() {
            self.data.data_dir = default_data_dir();
            changed = true;
        }

        if self.data.data_dir.is_relative() {
            self.data.data_dir = default_data_dir().join(&self.data.data_dir);
            changed = true;
        }

        changed
    }
}
