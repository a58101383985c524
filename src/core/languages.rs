//! Language configuration for execution
//!
//! Only interpreted runtimes are supported: there is no compile step, the
//! source file is handed straight to the interpreter.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;

/// Configuration for a supported runtime
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageConfig {
    /// Name of the source file (e.g., "main.py")
    pub source_file: String,
    /// Run command, relative to the working directory
    pub run_command: Vec<String>,
}

impl LanguageConfig {
    pub fn new(
        source_file: impl Into<String>,
        run_command: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            run_command: run_command.into_iter().map(Into::into).collect(),
        }
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    run_command: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Global language configurations
static LANGUAGES: OnceLock<HashMap<String, LanguageConfig>> = OnceLock::new();

/// Initialize language configurations from the bundled TOML file
pub fn init_languages() -> anyhow::Result<()> {
    let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
    let languages = parse_languages(content)?;

    LANGUAGES
        .set(languages)
        .map_err(|_| anyhow::anyhow!("Languages already initialized"))?;

    Ok(())
}

fn parse_languages(content: &str) -> anyhow::Result<HashMap<String, LanguageConfig>> {
    let raw_configs: HashMap<String, RawLanguageConfig> =
        toml::from_str(content).context("Invalid language table")?;

    let mut languages = HashMap::new();

    for (name, raw) in raw_configs {
        let run_command = into_command(&raw.run_command);
        if run_command.is_empty() {
            anyhow::bail!("Empty run command for {}", name);
        }

        let config = LanguageConfig {
            source_file: raw.source_file,
            run_command,
        };

        languages.insert(name.to_lowercase(), config.clone());

        for alias in raw.aliases {
            languages.insert(alias.to_lowercase(), config.clone());
        }
    }

    Ok(languages)
}

/// Get language configuration by language name
pub fn get_language_config(language: &str) -> Option<LanguageConfig> {
    LANGUAGES.get()?.get(&language.to_lowercase()).cloned()
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
