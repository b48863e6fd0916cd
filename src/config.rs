//! Settings types and loading
//!
//! Settings cover the shell allowlist, the LM provider, and the template
//! variables substituted into the identity/user prompts. All structures are
//! read-only after construction.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Tool-related settings
    pub tools: ToolsSettings,

    /// LM provider configuration
    pub llm: LmConfig,

    /// Variables substituted into prompt templates
    pub variables: TemplateVariables,
}

/// Tool-related settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSettings {
    pub shell: ShellSettings,
}

/// Shell tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSettings {
    pub enabled: bool,
    pub allowlist: Vec<String>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            allowlist: [
                "date", "whoami", "pwd", "ls", "cat", "head", "tail", "wc", "echo", "uname", "hostname", "uptime",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// LM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Provider name (currently only "ollama" supported)
    pub provider: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:14b".to_string(),
            timeout_ms: 300_000,
        }
    }
}

/// Variables substituted into the identity/user templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateVariables {
    pub username: String,
    pub home_directory: String,
    pub os_name: String,
}

impl Default for TemplateVariables {
    fn default() -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let home_directory = std::env::var("HOME")
            .ok()
            .or_else(|| dirs::home_dir().map(|p| p.to_string_lossy().into_owned()))
            .unwrap_or_default();

        Self {
            username,
            home_directory,
            os_name: os_name().to_string(),
        }
    }
}

impl Settings {
    /// Load settings with fallback chain
    ///
    /// Explicit path, then `<config dir>/errand/errand.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load settings from {}", path.display()));
        }

        if let Some(dir) = config_dir() {
            let user_config = dir.join("errand.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(settings) => return Ok(settings),
                    Err(e) => {
                        warn!("Failed to load settings from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        info!("No settings file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).context("Failed to read settings file")?;
        let settings: Self = serde_yaml::from_str(&content).context("Failed to parse settings file")?;

        info!("Loaded settings from: {}", path.as_ref().display());
        Ok(settings)
    }

    /// Check if a command is in the shell allowlist
    pub fn is_command_allowed(&self, cmd: &str) -> bool {
        if !self.tools.shell.enabled {
            return false;
        }
        self.tools.shell.allowlist.iter().any(|allowed| allowed == cmd)
    }
}

/// Path to the user configuration directory (`~/.config/errand` on Linux)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("errand"))
}

/// Path to the local data directory (logs, step records)
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("errand")
}

/// Expand a leading `~` to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Replace characters unsafe for filenames with underscores
///
/// Keeps `[A-Za-z0-9_-]`, everything else becomes `_`.
pub(crate) fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "macOS",
        "linux" => "Linux",
        "windows" => "Windows",
        other => other,
    }
}
