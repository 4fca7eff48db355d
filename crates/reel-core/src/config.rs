//! Configuration for generation sessions.
//!
//! Reads the key=value format of `.reel/config`, then applies environment
//! overrides. Precedence: CLI flags > environment > config file > defaults.
//! CLI flags are applied by the binary after `Config::load` returns.

use crate::types::Quality;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".reel/config";

/// Environment variable holding the LLM credential.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
/// Environment variable overriding the model identifier.
pub const MODEL_ENV: &str = "LLM_MODEL";
/// Environment variable overriding the quality preset.
pub const QUALITY_ENV: &str = "VIDEO_QUALITY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("invalid number value for {key}: {value}")]
    InvalidFloat { key: String, value: String },
    #[error("invalid quality preset '{0}' (expected low_quality, medium_quality, high_quality or production_quality)")]
    InvalidQuality(String),
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
}

/// Session configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // LLM endpoint
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub http_timeout_sec: u32,
    /// Plan a script before asking for code.
    pub two_phase: bool,

    // Renderer
    pub renderer_bin: PathBuf,
    pub scene_class: String,
    pub quality: Quality,
    pub render_timeout_sec: u32,

    // Directories
    pub output_dir: PathBuf,
    pub scenes_dir: PathBuf,

    // Repair loop
    pub max_attempts: u32,

    /// Write session-<ts>.json into output_dir after each session.
    pub summary_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "xiaomi/mimo-v2-flash".to_string(),
            temperature: 0.7,
            max_tokens: 8192,
            http_timeout_sec: 120,
            two_phase: true,
            renderer_bin: PathBuf::from("manim"),
            scene_class: "GeneratedScene".to_string(),
            quality: Quality::Production,
            render_timeout_sec: 300,
            output_dir: PathBuf::from("output"),
            scenes_dir: PathBuf::from("generated_scenes"),
            max_attempts: 3,
            summary_json: true,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Build the effective configuration for a working directory.
    ///
    /// An explicit `config_path` must exist; the default `.reel/config` is
    /// optional. Environment overrides are applied last and relative paths are
    /// resolved against `root`.
    pub fn load(root: &Path, config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        match config_path {
            Some(path) => config.load_file(path)?,
            None => {
                let default_path = root.join(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    config.load_file(&default_path)?;
                }
            }
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.resolve_paths(root);
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        self.validate()
    }

    /// Apply environment overrides through a lookup function.
    ///
    /// Empty variables are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(API_KEY_ENV) {
            self.api_key = Some(key);
        }
        if let Some(model) = get(MODEL_ENV) {
            self.model = model;
        }
        if let Some(quality) = get(QUALITY_ENV) {
            self.quality = Self::parse_quality(&quality)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "api_key" => {
                self.api_key = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "base_url" => self.base_url = value.trim_end_matches('/').to_string(),
            "model" => self.model = value.to_string(),
            "temperature" => {
                self.temperature = value.parse().map_err(|_| ConfigError::InvalidFloat {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
            }
            "max_tokens" => self.max_tokens = Self::parse_int(key, value)?,
            "http_timeout_sec" => self.http_timeout_sec = Self::parse_int(key, value)?,
            "two_phase" => self.two_phase = Self::parse_bool(key, value)?,
            "renderer_bin" => self.renderer_bin = PathBuf::from(value),
            "scene_class" => self.scene_class = value.to_string(),
            "quality" => self.quality = Self::parse_quality(value)?,
            "render_timeout_sec" => self.render_timeout_sec = Self::parse_int(key, value)?,
            "output_dir" => self.output_dir = PathBuf::from(value),
            "scenes_dir" => self.scenes_dir = PathBuf::from(value),
            "max_attempts" => self.max_attempts = Self::parse_int(key, value)?,
            "summary_json" => self.summary_json = Self::parse_bool(key, value)?,
            _ => {
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_int(key: &str, value: &str) -> Result<u32, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn parse_quality(value: &str) -> Result<Quality, ConfigError> {
        Quality::parse(value.trim()).ok_or_else(|| ConfigError::InvalidQuality(value.to_string()))
    }

    /// Reject values the repair loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }

    /// Resolve relative paths against a working directory.
    pub fn resolve_paths(&mut self, root: &Path) {
        if self.output_dir.is_relative() {
            self.output_dir = root.join(&self.output_dir);
        }
        if self.scenes_dir.is_relative() {
            self.scenes_dir = root.join(&self.scenes_dir);
        }
    }

    /// Copy of the config safe to print (credential masked).
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.api_key = self.api_key.as_ref().map(|_| "********".to_string());
        copy
    }
}
