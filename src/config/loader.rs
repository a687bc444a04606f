//! Configuration Loader
//!
//! Layers defaults, an optional config file and environment overrides.

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::TestEnvConfig;
use crate::error::Result;

const ENV_PREFIX: &str = "TESTENV";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_CONFIG_BASENAME: &str = "config/testenv";

/// Builder for [`TestEnvConfig`]
#[derive(Debug, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    environment: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this file instead of `config/testenv.*`; the file must exist
    pub fn with_file(mut self, path: &Path) -> Self {
        self.file = Some(path.to_path_buf());
        self
    }

    /// Use these variables instead of the process environment.
    ///
    /// Keeps tests from racing on global environment state.
    pub fn with_environment(mut self, vars: config::Map<String, String>) -> Self {
        self.environment = Some(vars);
        self
    }

    pub fn load(self) -> Result<TestEnvConfig> {
        let defaults = Config::try_from(&TestEnvConfig::default())?;

        let file_source = match &self.file {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::with_name(DEFAULT_CONFIG_BASENAME).required(false),
        };

        let env_source = Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(self.environment.clone());

        let mut config: TestEnvConfig = Config::builder()
            .add_source(defaults)
            .add_source(file_source)
            .add_source(env_source)
            .build()?
            .try_deserialize()?;

        if let Some(database_url) = self.database_url() {
            debug!("Applying DATABASE_URL override");
            config.database.apply_url(&database_url)?;
        }

        config.validate()?;

        debug!(
            environment = %config.environment,
            config = %config.debug_config(),
            "Test environment configuration loaded"
        );

        Ok(config)
    }

    fn database_url(&self) -> Option<String> {
        match &self.environment {
            Some(vars) => vars.get("DATABASE_URL").cloned(),
            None => std::env::var("DATABASE_URL").ok(),
        }
        .filter(|url| !url.trim().is_empty())
    }
}

/// Recursively mask values whose key contains one of `sensitive_patterns`
pub(crate) fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_sensitive = sensitive_patterns
                    .iter()
                    .any(|pattern| key_lower.contains(pattern));

                if is_sensitive {
                    let masked = match &*val {
                        serde_json::Value::String(s) if s.is_empty() => {
                            serde_json::Value::String("[EMPTY]".to_string())
                        }
                        serde_json::Value::String(s) if s.chars().count() > 4 => {
                            let chars: Vec<char> = s.chars().collect();
                            let head: String = chars[..2].iter().collect();
                            let tail: String = chars[chars.len() - 2..].iter().collect();
                            serde_json::Value::String(format!("[MASKED: {head}***{tail}]"))
                        }
                        _ => serde_json::Value::String("[MASKED]".to_string()),
                    };
                    *val = masked;
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}
