// Engine configuration: sandbox limits, scratch root and image table
use crate::sandbox::ResourceLimits;
use anyhow::{bail, Context, Result};
use gradebox_common::types::Framework;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/engine.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parent directory of every per-request workspace
    pub scratch_root: PathBuf,
    pub cpu_limit: f64,
    pub memory_limit_mb: u64,
    pub output_limit_bytes: usize,
    pub pull_missing_images: bool,
    /// Upper bound on concurrently executing jobs in the worker
    pub max_parallel_jobs: usize,
    /// Per-framework image overrides keyed by framework identifier
    pub images: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        Self {
            scratch_root: std::env::temp_dir().join("gradebox"),
            cpu_limit: limits.cpu_limit,
            memory_limit_mb: limits.memory_limit_mb,
            output_limit_bytes: limits.output_limit_bytes,
            pull_missing_images: true,
            max_parallel_jobs: 4,
            images: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Engine config file not found: {}", config_path.display());
        }
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config/engine.json`, or defaults when it is absent
    pub fn load_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `GRADEBOX_SCRATCH_ROOT` and `GRADEBOX_MAX_PARALLEL_JOBS`
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(root) = lookup("GRADEBOX_SCRATCH_ROOT") {
            self.scratch_root = PathBuf::from(root);
        }
        if let Some(jobs) = lookup("GRADEBOX_MAX_PARALLEL_JOBS") {
            self.max_parallel_jobs = jobs
                .parse()
                .with_context(|| format!("Invalid GRADEBOX_MAX_PARALLEL_JOBS: {}", jobs))?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.cpu_limit <= 0.0 {
            bail!("cpu_limit must be positive");
        }
        if self.memory_limit_mb == 0 {
            bail!("memory_limit_mb must be positive");
        }
        if self.max_parallel_jobs == 0 {
            bail!("max_parallel_jobs must be at least 1");
        }
        for key in self.images.keys() {
            if Framework::from_str(key).is_none() {
                bail!("Image override for unknown framework: {}", key);
            }
        }
        Ok(())
    }

    /// Image for a framework: configured override, else the built-in table
    pub fn image_for(&self, framework: Framework) -> String {
        self.images
            .get(framework.as_str())
            .cloned()
            .unwrap_or_else(|| framework.default_image().to_string())
    }

    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_limit: self.cpu_limit,
            memory_limit_mb: self.memory_limit_mb,
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.limits(), ResourceLimits::default());
        assert_eq!(config.max_parallel_jobs, 4);
        assert!(config.scratch_root.ends_with("gradebox"));
        assert_eq!(config.image_for(Framework::Junit), "gradebox/executor-java:latest");
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"memory_limit_mb": 1024, "images": {{"pytest": "registry.local/python:3.12"}}}}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.memory_limit_mb, 1024);
        assert_eq!(config.cpu_limit, 1.0);
        assert_eq!(config.image_for(Framework::Pytest), "registry.local/python:3.12");
        assert_eq!(config.image_for(Framework::Jest), "gradebox/executor-node:latest");
    }

    #[test]
    fn test_unknown_image_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"images": {{"mocha": "node:20"}}}}"#).unwrap();
        assert!(EngineConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(EngineConfig::load(Path::new("/nonexistent/engine.json")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default()
            .with_overrides(|key| match key {
                "GRADEBOX_SCRATCH_ROOT" => Some("/srv/scratch".to_string()),
                "GRADEBOX_MAX_PARALLEL_JOBS" => Some("8".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.scratch_root, PathBuf::from("/srv/scratch"));
        assert_eq!(config.max_parallel_jobs, 8);

        let bad = EngineConfig::default().with_overrides(|key| {
            (key == "GRADEBOX_MAX_PARALLEL_JOBS").then(|| "0".to_string())
        });
        assert!(bad.is_err());
    }
}
