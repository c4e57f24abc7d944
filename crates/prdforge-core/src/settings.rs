use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::CoreError;

// --- Settings ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Project URL of the hosted backend, e.g. "https://abc.supabase.co"
    pub url: String,
    pub api_key: String,
    /// Signed-in user's JWT. Falls back to the api key when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AiSettings {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    /// Override for OpenAI-compatible endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadSettings {
    pub bucket: String,
    pub max_bytes: usize,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub signed_url_ttl_secs: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            bucket: "screenshots".to_string(),
            max_bytes: 5 * 1024 * 1024,
            max_dimension: 4096,
            jpeg_quality: 80,
            signed_url_ttl_secs: 365 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub store: StoreSettings,
    pub ai: AiSettings,
    pub upload: UploadSettings,
}

/// Resolve the settings directory (~/.prdforge/).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".prdforge")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// Read settings from the default location, then apply environment overrides.
/// A missing or unreadable file yields defaults.
pub fn read_settings() -> AppSettings {
    let mut settings = match read_settings_from(&settings_path()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable settings file");
            AppSettings::default()
        }
    };
    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

pub fn read_settings_from(path: &Path) -> Result<AppSettings, CoreError> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn write_settings(settings: &AppSettings) -> Result<(), CoreError> {
    write_settings_to(&settings_path(), settings)
}

pub fn write_settings_to(path: &Path, settings: &AppSettings) -> Result<(), CoreError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}

impl AppSettings {
    /// Overlay `PRDFORGE_*` variables. `lookup` is injectable for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut String, key: &str| {
            if let Some(v) = lookup(key).filter(|v| !v.is_empty()) {
                *target = v;
            }
        };
        set(&mut self.store.url, "PRDFORGE_STORE_URL");
        set(&mut self.store.api_key, "PRDFORGE_STORE_KEY");
        set(&mut self.ai.provider, "PRDFORGE_AI_PROVIDER");
        set(&mut self.ai.api_key, "PRDFORGE_AI_KEY");
        set(&mut self.ai.model, "PRDFORGE_AI_MODEL");
        if let Some(token) = lookup("PRDFORGE_ACCESS_TOKEN").filter(|v| !v.is_empty()) {
            self.store.access_token = Some(token);
        }
        if let Some(url) = lookup("PRDFORGE_AI_BASE_URL").filter(|v| !v.is_empty()) {
            self.ai.base_url = Some(url);
        }
    }
}

pub fn ai_configured(settings: &AiSettings) -> bool {
    !settings.provider.is_empty()
        && !settings.model.is_empty()
        && (settings.provider == "ollama" || !settings.api_key.is_empty())
}

pub fn store_configured(settings: &StoreSettings) -> bool {
    !settings.url.is_empty() && !settings.api_key.is_empty()
}
