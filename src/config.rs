use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CalldocError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// LLM provider (anthropic, openai)
    pub provider: String,

    /// Model name (e.g., "claude-3-haiku-20240307", "gpt-4o-mini")
    pub model: String,

    /// API key; takes precedence over `api_key_env`
    pub api_key: Option<String>,

    /// Environment variable the API key is read from when `api_key` is unset
    pub api_key_env: Option<String>,

    /// Base URL (for proxies or compatible endpoints)
    pub base_url: Option<String>,

    /// Maximum tokens for LLM responses
    pub max_tokens: Option<u32>,

    /// Temperature for LLM responses (0.0 to 1.0)
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project layout
    pub project: ProjectConfig,

    /// Traversal and generation settings
    pub generation: GenerationConfig,

    /// Entry point discovery
    pub entry_points: EntryPointConfig,

    /// Prompt customization
    pub templates: TemplateConfig,

    /// LLM integration settings
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Root that dotted import paths are resolved against
    pub root: PathBuf,

    /// Source file extension, without the dot
    pub source_extension: String,

    /// Maximum file size to parse (in bytes)
    pub max_file_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Path of the processed-function store (JSON Lines)
    pub store_path: PathBuf,

    /// Maximum number of concurrent generation requests within a layer
    pub concurrency: usize,

    /// Timeout for a single generation request
    pub timeout_secs: u64,

    /// Splice generated docstrings back into the source files
    pub write_docstrings: bool,

    /// Document the methods of a class before the class itself
    pub document_methods: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPointConfig {
    /// Regexes matched against decorator expressions (without the `@`)
    pub route_decorators: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Tera template for the user prompt; receives `code` and `context`
    pub prompt: Option<String>,

    /// System prompt sent with every request
    pub system_prompt: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                root: PathBuf::from("."),
                source_extension: "py".to_string(),
                max_file_size: 1024 * 1024, // 1MB
            },
            generation: GenerationConfig {
                store_path: PathBuf::from("processed_functions.jsonl"),
                concurrency: 4,
                timeout_secs: 120,
                write_docstrings: true,
                document_methods: true,
            },
            entry_points: EntryPointConfig {
                route_decorators: vec![
                    r"^(app|bp|blueprint)\.route\b".to_string(),
                    r"^(app|router)\.(get|post|put|patch|delete)\b".to_string(),
                ],
            },
            templates: TemplateConfig::default(),
            llm: LlmConfig {
                provider: "anthropic".to_string(),
                model: "claude-3-haiku-20240307".to_string(),
                api_key: None,
                api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
                base_url: None,
                max_tokens: Some(1024),
                temperature: Some(0.2),
            },
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CalldocError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CalldocError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                // Try common config file locations
                let candidates = ["calldoc.toml", "Calldoc.toml", ".calldoc.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.generation.concurrency == 0 {
            return Err(CalldocError::Config(
                "generation.concurrency must be at least 1".to_string(),
            ));
        }
        if self.generation.timeout_secs == 0 {
            return Err(CalldocError::Config(
                "generation.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.project.source_extension.is_empty() || self.project.source_extension.starts_with('.') {
            return Err(CalldocError::Config(format!(
                "project.source_extension must be a bare extension, got `{}`",
                self.project.source_extension
            )));
        }
        for pattern in &self.entry_points.route_decorators {
            regex::Regex::new(pattern).map_err(|e| {
                CalldocError::Config(format!("invalid route decorator pattern `{}`: {}", pattern, e))
            })?;
        }
        Ok(())
    }

    /// Timeout applied to each generation request
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.generation.timeout_secs)
    }
}
