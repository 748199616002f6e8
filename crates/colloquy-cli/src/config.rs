//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for colloquy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OpenAI-compatible endpoint
    pub base_url: Option<String>,
    /// Default model to use
    pub model: Option<String>,
    /// Model used for titles and search query rewrites
    pub quick_model: Option<String>,
    /// API key (alternative to OPENAI_API_KEY)
    pub api_key: Option<String>,
    /// System prompt for new conversations
    pub system_prompt: Option<String>,
    /// Prompt token budget
    pub context_length: Option<u32>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Whether the model accepts images
    pub vision: Option<bool>,
    /// Generate conversation titles
    pub auto_title: Option<bool>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("colloquy")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("COLLOQUY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            base_url: Some(colloquy_ai::providers::openai::DEFAULT_BASE_URL.to_string()),
            model: Some("gpt-4o-mini".to_string()),
            context_length: Some(8192),
            auto_title: Some(true),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// API key from config, falling back to the environment
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# colloquy configuration file
# Place at ~/.config/colloquy/config.toml (Linux/Mac) or %APPDATA%\colloquy\config.toml (Windows)
# or point COLLOQUY_CONFIG_PATH at it

# OpenAI-compatible endpoint
base_url = "https://api.openai.com/v1"

# Default model
model = "gpt-4o-mini"

# Model for titles and search query rewrites (defaults to model)
# quick_model = "gpt-4o-mini"

# Prompt token budget
context_length = 8192

# temperature = 0.7
# max_tokens = 2048

# Whether the model accepts image attachments
# vision = false

# Name conversations after their first exchange
auto_title = true

# system_prompt = "You are a helpful assistant."

# API key (optional - OPENAI_API_KEY is used otherwise)
# api_key = "sk-..."
"#
}
