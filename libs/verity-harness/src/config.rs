// Harness configuration: config/harness.json, then environment overrides
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "config/harness.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Process,
    Docker,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Process => write!(f, "process"),
            Backend::Docker => write!(f, "docker"),
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "process" => Ok(Backend::Process),
            "docker" => Ok(Backend::Docker),
            other => bail!("Unknown sandbox backend: {} (expected process or docker)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Wall-clock bound over the whole submission.
    pub timeout_ms: u64,
    pub backend: Backend,
    /// Interpreter for the process backend.
    pub python: String,
    pub docker_image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    /// Largest file a submission may write, process backend only.
    pub max_file_size_mb: u32,
    pub max_processes: u32,
    pub max_source_bytes: usize,
    pub max_case_input_bytes: usize,
    /// Cap on each of stdout and stderr; the run is killed when exceeded.
    pub max_output_bytes: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            backend: Backend::Process,
            python: "python3".to_string(),
            docker_image: "python:3.12-slim".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            max_file_size_mb: 16,
            max_processes: 256,
            max_source_bytes: 1024 * 1024,
            max_case_input_bytes: 1024 * 1024,
            max_output_bytes: 4 * 1024 * 1024,
        }
    }
}

impl HarnessConfig {
    /// Load from a JSON file; missing keys take their defaults.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Harness config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// `config/harness.json` when present, defaults otherwise, then the
    /// `HARNESS_*` environment variables.
    pub fn load_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        let config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup. Malformed values are errors,
    /// not silently ignored.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parsed<T>(key: &str, raw: Option<String>) -> Result<Option<T>>
        where
            T: FromStr,
            T::Err: fmt::Display,
        {
            raw.map(|v| {
                v.trim()
                    .parse::<T>()
                    .map_err(|e| anyhow::anyhow!("Invalid {}={}: {}", key, v, e))
            })
            .transpose()
        }

        if let Some(v) = parsed("HARNESS_TIMEOUT_MS", lookup("HARNESS_TIMEOUT_MS"))? {
            self.timeout_ms = v;
        }
        if let Some(v) = parsed("HARNESS_BACKEND", lookup("HARNESS_BACKEND"))? {
            self.backend = v;
        }
        if let Some(v) = lookup("HARNESS_PYTHON") {
            self.python = v;
        }
        if let Some(v) = lookup("HARNESS_DOCKER_IMAGE") {
            self.docker_image = v;
        }
        if let Some(v) = parsed("HARNESS_MEMORY_MB", lookup("HARNESS_MEMORY_MB"))? {
            self.memory_limit_mb = v;
        }
        if let Some(v) = parsed("HARNESS_CPU_LIMIT", lookup("HARNESS_CPU_LIMIT"))? {
            self.cpu_limit = v;
        }
        if let Some(v) = parsed("HARNESS_MAX_OUTPUT_BYTES", lookup("HARNESS_MAX_OUTPUT_BYTES"))? {
            self.max_output_bytes = v;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.backend, Backend::Process);
        assert_eq!(config.max_source_bytes, 1024 * 1024);
    }

    #[test]
    fn test_env_overrides() {
        let config = HarnessConfig::default()
            .apply_env(env(&[
                ("HARNESS_TIMEOUT_MS", "1500"),
                ("HARNESS_BACKEND", "Docker"),
                ("HARNESS_CPU_LIMIT", "1.5"),
                ("HARNESS_MAX_OUTPUT_BYTES", "65536"),
            ]))
            .unwrap();
        assert_eq!(config.max_output_bytes, 65536);
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.backend, Backend::Docker);
        assert_eq!(config.cpu_limit, 1.5);
        assert_eq!(config.python, "python3");
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let err = HarnessConfig::default()
            .apply_env(env(&[("HARNESS_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("HARNESS_TIMEOUT_MS"));

        assert!(HarnessConfig::default()
            .apply_env(env(&[("HARNESS_BACKEND", "vm")]))
            .is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"timeout_ms": 250, "backend": "docker"}}"#).unwrap();

        let config = HarnessConfig::load(file.path()).unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.backend, Backend::Docker);
        assert_eq!(config.memory_limit_mb, 256);
    }

    #[test]
    fn test_load_missing_file() {
        let err = HarnessConfig::load(Path::new("/nonexistent/harness.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
