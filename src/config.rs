use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const APP_NAME: &str = "whatsthis";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub gemini_model: String,
    pub gemini_api_base: String,
    pub request_timeout_secs: u64,
    pub auto_close_secs: u64,
    pub max_popups: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_model: "gemini-1.5-flash".to_string(),
            gemini_api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            request_timeout_secs: 30,
            auto_close_secs: 15,
            max_popups: 3,
            temperature: 0.1,
            max_output_tokens: 2048,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(get_user_config_path())
    }

    /// Layers, later ones winning: built-in defaults, the user's config file,
    /// `whatsthis.toml` in the working directory, `WHATSTHIS_*` variables.
    pub fn load(user_config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("gemini_model", defaults.gemini_model)?
            .set_default("gemini_api_base", defaults.gemini_api_base)?
            .set_default("request_timeout_secs", defaults.request_timeout_secs as i64)?
            .set_default("auto_close_secs", defaults.auto_close_secs as i64)?
            .set_default("max_popups", defaults.max_popups as i64)?
            .set_default("temperature", defaults.temperature as f64)?
            .set_default("max_output_tokens", defaults.max_output_tokens as i64)?;

        if let Some(path) = user_config_path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let s = builder
            .add_source(File::with_name("whatsthis.toml").required(false))
            .add_source(Environment::with_prefix("WHATSTHIS").try_parsing(true))
            .build()?;

        s.try_deserialize()
    }

    pub fn auto_close(&self) -> Duration {
        Duration::from_secs(self.auto_close_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn get_user_config_path() -> Option<PathBuf> {
    let mut path = dirs::home_dir()?;
    path.push(".config");
    path.push(APP_NAME);
    path.push(format!("{APP_NAME}.toml"));
    Some(path)
}
