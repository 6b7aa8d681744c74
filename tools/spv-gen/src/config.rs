//! Generator configuration
//!
//! Settings come from three layers, lowest first: built-in defaults, an
//! optional `spv-gen.toml` file, and command-line flags.
//!
//! ```toml
//! source_dirs = ["shaders"]
//! compiler = "glslc"
//! tmp_dir = "build/spv"
//! output_dir = "generated"
//! jobs = 4
//! timeout_secs = 120
//!
//! [env]
//! precision = "mediump"
//!
//! [emit]
//! namespace = ["at", "native", "vulkan"]
//! include_prefix = "ATen/native/vulkan"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Error, Result};
use crate::template::Placeholders;

pub const DEFAULT_PRECISION: &str = "highp";
pub const DEFAULT_FORMAT: &str = "rgba32f";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Global substitution values (`precision`, `format`, plus any `--env` keys)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Env {
    values: BTreeMap<String, String>,
}

impl Default for Env {
    fn default() -> Self {
        let mut values = BTreeMap::new();
        values.insert("precision".to_string(), DEFAULT_PRECISION.to_string());
        values.insert("format".to_string(), DEFAULT_FORMAT.to_string());
        Self { values }
    }
}

impl Env {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Parse `KEY=VALUE`, trimming both sides
    pub fn parse_pair(pair: &str) -> Result<(String, String), ConfigError> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidEnvPair(pair.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidEnvPair(pair.to_string()));
        }
        Ok((key.to_string(), value.trim().to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Placeholders for Env {
    fn lookup(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Naming and scoping of the generated C++ pair
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmitConfig {
    /// Nested namespaces wrapping both artifacts
    pub namespace: Vec<String>,
    /// Include path prefix of the runtime API headers
    pub include_prefix: String,
    /// Declarations file name
    pub header_name: String,
    /// Definitions file name
    pub source_name: String,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            namespace: vec!["at".into(), "native".into(), "vulkan".into()],
            include_prefix: "ATen/native/vulkan".to_string(),
            header_name: "spv.h".to_string(),
            source_name: "spv.cpp".to_string(),
        }
    }
}

impl EmitConfig {
    /// Split `a::b::c` into namespace components
    pub fn parse_namespace(path: &str) -> Vec<String> {
        path.split("::")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub source_dirs: Vec<PathBuf>,
    pub compiler: PathBuf,
    pub tmp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub env: Env,
    pub emit: EmitConfig,
    /// Worker threads for compile + extract
    pub jobs: usize,
    /// Per-invocation compiler timeout
    pub timeout: Duration,
}

impl GeneratorConfig {
    pub fn new(
        source_dirs: Vec<PathBuf>,
        compiler: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_dirs,
            compiler: compiler.into(),
            tmp_dir: tmp_dir.into(),
            output_dir: output_dir.into(),
            env: Env::default(),
            emit: EmitConfig::default(),
            jobs: 1,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn header_path(&self) -> PathBuf {
        self.output_dir.join(&self.emit.header_name)
    }

    pub fn source_path(&self) -> PathBuf {
        self.output_dir.join(&self.emit.source_name)
    }
}

/// `spv-gen.toml` contents; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub source_dirs: Vec<PathBuf>,
    pub compiler: Option<PathBuf>,
    pub tmp_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub emit: EmitConfig,
}

impl ConfigFile {
    /// Load config file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::parse(&content, path)?)
    }

    /// Parse config file from string
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            origin: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Check required settings, resolve the compiler and apply defaults
    pub fn into_config(self) -> Result<GeneratorConfig, ConfigError> {
        let compiler = self
            .compiler
            .ok_or(ConfigError::MissingSetting("compiler"))?;
        let tmp_dir = self.tmp_dir.ok_or(ConfigError::MissingSetting("tmp_dir"))?;
        let output_dir = self
            .output_dir
            .ok_or(ConfigError::MissingSetting("output_dir"))?;

        let source_dirs = if self.source_dirs.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            self.source_dirs
        };

        let mut config =
            GeneratorConfig::new(source_dirs, resolve_compiler(&compiler)?, tmp_dir, output_dir);
        for (key, value) in self.env {
            config.env.set(key, value);
        }
        config.emit = self.emit;
        config.jobs = self.jobs.unwrap_or(1).max(1);
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Locate the compiler: paths are used as given, bare names are looked up on `PATH`
pub fn resolve_compiler(program: &Path) -> Result<PathBuf, ConfigError> {
    let not_found = |reason: String| ConfigError::CompilerNotFound {
        program: program.display().to_string(),
        reason,
    };

    if program.components().count() > 1 || program.is_absolute() {
        if program.is_file() {
            Ok(program.to_path_buf())
        } else {
            Err(not_found("no such file".to_string()))
        }
    } else {
        which::which(program).map_err(|e| not_found(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_defaults() {
        let env = Env::default();
        assert_eq!(env.get("precision"), Some("highp"));
        assert_eq!(env.get("format"), Some("rgba32f"));
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            Env::parse_pair(" precision = mediump ").unwrap(),
            ("precision".to_string(), "mediump".to_string())
        );
        assert_eq!(
            Env::parse_pair("flags=a=b").unwrap(),
            ("flags".to_string(), "a=b".to_string())
        );
        assert!(matches!(
            Env::parse_pair("precision").unwrap_err(),
            ConfigError::InvalidEnvPair(_)
        ));
        assert!(Env::parse_pair("=x").is_err());
    }

    #[test]
    fn test_parse_namespace() {
        assert_eq!(
            EmitConfig::parse_namespace("at::native::vulkan"),
            ["at", "native", "vulkan"]
        );
        assert_eq!(EmitConfig::parse_namespace("::gpu::"), ["gpu"]);
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = dir.path().join("glslc");
        std::fs::write(&compiler, "").unwrap();

        let content = format!(
            r#"
compiler = '{}'
tmp_dir = "tmp"
output_dir = "out"
jobs = 3
timeout_secs = 9

[env]
precision = "mediump"

[emit]
namespace = ["gpu", "kernels"]
"#,
            compiler.display()
        );
        let file = ConfigFile::parse(&content, Path::new("spv-gen.toml")).unwrap();
        let config = file.into_config().unwrap();

        assert_eq!(config.source_dirs, [PathBuf::from(".")]);
        assert_eq!(config.compiler, compiler);
        assert_eq!(config.jobs, 3);
        assert_eq!(config.timeout, Duration::from_secs(9));
        assert_eq!(config.env.get("precision"), Some("mediump"));
        assert_eq!(config.env.get("format"), Some("rgba32f"));
        assert_eq!(config.emit.namespace, ["gpu", "kernels"]);
        assert_eq!(config.emit.header_name, "spv.h");
        assert_eq!(config.header_path(), PathBuf::from("out/spv.h"));
    }

    #[test]
    fn test_missing_required_setting() {
        let file = ConfigFile::parse("tmp_dir = \"t\"\n", Path::new("c.toml")).unwrap();
        assert!(matches!(
            file.into_config().unwrap_err(),
            ConfigError::MissingSetting("compiler")
        ));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = ConfigFile::parse("compilr = \"glslc\"\n", Path::new("c.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_compiler_path() {
        let err = resolve_compiler(Path::new("/nonexistent/bin/glslc")).unwrap_err();
        assert!(matches!(err, ConfigError::CompilerNotFound { .. }));
    }
}
