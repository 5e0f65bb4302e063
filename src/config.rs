//! Configuration management for labreport.
//!
//! Configuration is read from a YAML file (default `labreport.yaml` in the
//! current directory) and threaded explicitly through constructors. Only the
//! credentials have environment fallbacks, and the environment is never written:
//! - `LABREPORT_API_KEY` or `OPENAI_API_KEY` - API key when `llm.api_key` is empty.
//! - `LABREPORT_BASE_URL` - endpoint when `llm.base_url` is not set in the file.
//!
//! ```yaml
//! workspace_dir: ./work
//! llm:
//!   api_key: sk-...
//!   base_url: https://api.openai.com/v1
//!   chat_model: gpt-4o
//!   vision_model: gpt-4o
//! agent:
//!   max_iterations: 50
//! compiler:
//!   engine: xelatex
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "labreport.yaml";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    Missing(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Remote model endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    pub base_url: String,
    /// Model for drafting, title resolution, the data agent and assembly.
    pub chat_model: String,
    /// Vision-capable model for reading scanned pages.
    pub vision_model: String,
    pub timeout_secs: u64,
    /// Retries for transient failures. The upstream API promises none, so 0 by default.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: "gpt-4o".to_string(),
            vision_model: "gpt-4o".to_string(),
            timeout_secs: 180,
            max_retries: 0,
        }
    }
}

/// Data agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Think/act/observe cycles before the run is stopped as incomplete.
    pub max_iterations: usize,
    /// Rows shown by the `inspect` tool.
    pub preview_rows: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            preview_rows: 5,
        }
    }
}

/// Book ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Rasterization resolution for scanned pages.
    pub dpi: u32,
    /// Flush the section still open after the last page. Off by default: the
    /// last section of a book is dropped unless an operator opts in.
    pub flush_trailing_section: bool,
    /// Path or name of the `pdftoppm` executable.
    pub pdftoppm: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            flush_trailing_section: false,
            pdftoppm: "pdftoppm".to_string(),
        }
    }
}

/// External LaTeX compiler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// When false the pipeline stops after writing the `.tex` source.
    pub enabled: bool,
    pub engine: String,
    /// Two passes resolve cross-references.
    pub passes: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: "xelatex".to_string(),
            passes: 2,
        }
    }
}

/// Report writing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Natural language the report is written in.
    pub language: String,
    /// TrueType font for plot captions and axis labels, replacing the bundled
    /// DejaVu Sans. Set it to a CJK font for Chinese titles.
    pub font_path: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            language: "Chinese".to_string(),
            font_path: None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the books/, data/, processed/, plots/, tmp/ and final_pdf/ layout.
    pub workspace_dir: PathBuf,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub ingest: IngestConfig,
    pub compiler: CompilerConfig,
    pub report: ReportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("."),
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            ingest: IngestConfig::default(),
            compiler: CompilerConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration without validating it, for commands that never
    /// reach the model.
    ///
    /// An explicit `path` must exist. Without one, `labreport.yaml` is used
    /// when present and defaults otherwise. Credential fallbacks are applied
    /// from the process environment.
    pub fn read(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a YAML config file without environment fallbacks or validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Fill credentials from `lookup` (the environment in production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.llm.api_key.trim().is_empty() {
            if let Some(key) = lookup("LABREPORT_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
                self.llm.api_key = key;
            }
        }
        if self.llm.base_url == DEFAULT_BASE_URL {
            if let Some(url) = lookup("LABREPORT_BASE_URL") {
                self.llm.base_url = url;
            }
        }
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::Missing(
                "llm.api_key (or LABREPORT_API_KEY / OPENAI_API_KEY)".to_string(),
            ));
        }
        if self.llm.chat_model.trim().is_empty() {
            return Err(ConfigError::Missing("llm.chat_model".to_string()));
        }
        if self.llm.vision_model.trim().is_empty() {
            return Err(ConfigError::Missing("llm.vision_model".to_string()));
        }
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "llm.base_url".to_string(),
                format!("'{}' is not an http(s) URL", self.llm.base_url),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "agent.max_iterations".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.compiler.passes == 0 {
            return Err(ConfigError::InvalidValue(
                "compiler.passes".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
