//! `prdforge-mcp init`: register the server with agents working in the
//! current project.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use prdforge_core::settings::{
    ai_configured, read_settings, settings_path, store_configured, write_settings_to,
};
use prdforge_core::AppSettings;
use serde_json::{json, Value};
use tracing::{info, warn};

const SERVER_KEY: &str = "prdforge";

/// How an agent should launch the server. Only non-secret settings travel
/// in `env`; keys stay in the settings file.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub command: String,
    pub env: BTreeMap<String, String>,
}

impl Registration {
    pub fn new(command: impl Into<String>, settings: &AppSettings) -> Self {
        let mut env = BTreeMap::new();
        let mut put = |key: &str, value: &str| {
            if !value.is_empty() {
                env.insert(key.to_string(), value.to_string());
            }
        };
        put("PRDFORGE_STORE_URL", &settings.store.url);
        put("PRDFORGE_AI_PROVIDER", &settings.ai.provider);
        put("PRDFORGE_AI_MODEL", &settings.ai.model);
        put(
            "PRDFORGE_AI_BASE_URL",
            settings.ai.base_url.as_deref().unwrap_or_default(),
        );
        Self {
            command: command.into(),
            env,
        }
    }

    fn to_json(&self) -> Value {
        let mut entry = json!({
            "type": "stdio",
            "command": self.command,
            "args": [],
        });
        if !self.env.is_empty() {
            entry["env"] = json!(self.env);
        }
        entry
    }

    fn to_toml(&self) -> toml_edit::Table {
        let mut table = toml_edit::Table::new();
        table.insert("command", toml_edit::value(self.command.as_str()));
        table.insert("args", toml_edit::value(toml_edit::Array::new()));
        if !self.env.is_empty() {
            let mut env = toml_edit::Table::new();
            for (k, v) in &self.env {
                env.insert(k, toml_edit::value(v.as_str()));
            }
            table.insert("env", toml_edit::Item::Table(env));
        }
        table
    }
}

pub fn init_project() -> Result<(), Box<dyn Error>> {
    let command = std::env::current_exe()?
        .canonicalize()?
        .to_string_lossy()
        .to_string();

    let path = settings_path();
    if !path.exists() {
        write_settings_to(&path, &AppSettings::default())?;
        info!(path = %path.display(), "wrote settings template");
    }
    let settings = read_settings();
    if !store_configured(&settings.store) {
        warn!(path = %path.display(), "store url or key missing; flow and board tools stay disabled until set");
    }
    if !ai_configured(&settings.ai) {
        warn!(path = %path.display(), "AI provider not configured; generation tools stay disabled until set");
    }

    let registration = Registration::new(command, &settings);
    for written in register(&std::env::current_dir()?, &registration)? {
        info!(path = %written.display(), "registered prdforge-mcp");
    }
    Ok(())
}

/// Write `.mcp.json` in `dir`, and `.codex/config.toml` when the project
/// already has a `.codex` directory. Returns the files written.
pub fn register(dir: &Path, registration: &Registration) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut written = vec![merge_mcp_json(&dir.join(".mcp.json"), registration)?];
    let codex_dir = dir.join(".codex");
    if codex_dir.is_dir() {
        written.push(merge_codex_config(&codex_dir.join("config.toml"), registration)?);
    }
    Ok(written)
}

/// A file that exists but does not parse is left alone and reported.
fn merge_mcp_json(path: &Path, registration: &Registration) -> Result<PathBuf, Box<dyn Error>> {
    let mut root: Value = match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => json!({}),
        Err(e) => return Err(e.into()),
    };
    let Some(obj) = root.as_object_mut() else {
        return Err(format!("{} must contain a JSON object", path.display()).into());
    };
    let servers = obj.entry("mcpServers").or_insert_with(|| json!({}));
    if !servers.is_object() {
        *servers = json!({});
    }
    servers[SERVER_KEY] = registration.to_json();

    std::fs::write(path, serde_json::to_string_pretty(&root)?)?;
    Ok(path.to_path_buf())
}

fn merge_codex_config(path: &Path, registration: &Registration) -> Result<PathBuf, Box<dyn Error>> {
    let mut doc: toml_edit::DocumentMut = match std::fs::read_to_string(path) {
        Ok(text) => text
            .parse()
            .map_err(|e| format!("{} is not valid TOML: {e}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml_edit::DocumentMut::new(),
        Err(e) => return Err(e.into()),
    };
    if !doc.contains_table("mcp_servers") {
        let mut servers = toml_edit::Table::new();
        servers.set_implicit(true);
        doc["mcp_servers"] = toml_edit::Item::Table(servers);
    }
    doc["mcp_servers"][SERVER_KEY] = toml_edit::Item::Table(registration.to_toml());

    std::fs::write(path, doc.to_string())?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AppSettings {
        let mut settings = AppSettings::default();
        settings.store.url = "https://abc.example".into();
        settings.store.api_key = "anon-key".into();
        settings.ai.provider = "openai".into();
        settings.ai.model = "gpt-4o-mini".into();
        settings.ai.api_key = "sk-secret".into();
        settings
    }

    #[test]
    fn registration_carries_settings_but_not_keys() {
        let reg = Registration::new("/bin/prdforge-mcp", &configured());
        assert_eq!(reg.env["PRDFORGE_STORE_URL"], "https://abc.example");
        assert_eq!(reg.env["PRDFORGE_AI_MODEL"], "gpt-4o-mini");
        assert!(!reg.env.contains_key("PRDFORGE_AI_BASE_URL"));
        assert!(reg.env.values().all(|v| v != "anon-key" && v != "sk-secret"));
    }

    #[test]
    fn mcp_json_keeps_other_servers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".mcp.json"),
            r#"{"mcpServers":{"other":{"command":"x"}}}"#,
        )
        .unwrap();

        let reg = Registration::new("/bin/prdforge-mcp", &configured());
        let written = register(dir.path(), &reg).unwrap();
        assert_eq!(written, vec![dir.path().join(".mcp.json")]);

        let root: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(".mcp.json")).unwrap())
                .unwrap();
        assert_eq!(root["mcpServers"]["other"]["command"], "x");
        assert_eq!(root["mcpServers"]["prdforge"]["command"], "/bin/prdforge-mcp");
        assert_eq!(
            root["mcpServers"]["prdforge"]["env"]["PRDFORGE_AI_PROVIDER"],
            "openai"
        );
    }

    #[test]
    fn malformed_mcp_json_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".mcp.json");
        std::fs::write(&path, "{ not json").unwrap();

        let reg = Registration::new("/bin/prdforge-mcp", &AppSettings::default());
        assert!(register(dir.path(), &reg).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn codex_config_only_when_project_uses_codex() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registration::new("/bin/prdforge-mcp", &configured());
        register(dir.path(), &reg).unwrap();
        assert!(!dir.path().join(".codex").exists());

        std::fs::create_dir(dir.path().join(".codex")).unwrap();
        let written = register(dir.path(), &reg).unwrap();
        assert_eq!(written.len(), 2);
        let text = std::fs::read_to_string(dir.path().join(".codex/config.toml")).unwrap();
        let doc: toml_edit::DocumentMut = text.parse().unwrap();
        assert_eq!(
            doc["mcp_servers"]["prdforge"]["command"].as_str(),
            Some("/bin/prdforge-mcp")
        );
        assert_eq!(
            doc["mcp_servers"]["prdforge"]["env"]["PRDFORGE_STORE_URL"].as_str(),
            Some("https://abc.example")
        );
    }
}
