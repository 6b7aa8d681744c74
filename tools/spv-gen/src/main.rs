//! spv-gen - compute shader generator
//!
//! Compiles GLSL templates and sources into SPIR-V and writes the C++
//! tables that embed them.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use spv_gen::config::{ConfigFile, EmitConfig, Env};

#[derive(Parser)]
#[command(name = "spv-gen")]
#[command(about = "Generate SPIR-V shader tables for the Vulkan backend")]
#[command(version)]
struct Cli {
    /// Shader source directories
    #[arg(short = 'i', long = "glsl-paths", num_args = 1..)]
    glsl_paths: Vec<PathBuf>,

    /// Shader compiler executable (path or name on PATH)
    #[arg(short = 'c', long = "glslc-path")]
    glslc_path: Option<PathBuf>,

    /// Directory for expanded sources and bytecode
    #[arg(short = 't', long = "tmp-dir-path")]
    tmp_dir_path: Option<PathBuf>,

    /// Directory receiving the generated header and source
    #[arg(short = 'o', long = "output-path")]
    output_path: Option<PathBuf>,

    /// Substitution values as KEY=VALUE
    #[arg(long, value_name = "KEY=VALUE", num_args = 1..)]
    env: Vec<String>,

    /// Optional spv-gen.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Parallel compile jobs
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Per-shader compiler timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Namespace of the generated code, e.g. at::native::vulkan
    #[arg(long)]
    namespace: Option<String>,
}

impl Cli {
    /// Layer command-line flags over the config file
    fn into_config(self) -> Result<spv_gen::GeneratorConfig> {
        let mut file = match &self.config {
            Some(path) => ConfigFile::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ConfigFile::default(),
        };

        if !self.glsl_paths.is_empty() {
            file.source_dirs = self.glsl_paths;
        }
        if self.glslc_path.is_some() {
            file.compiler = self.glslc_path;
        }
        if self.tmp_dir_path.is_some() {
            file.tmp_dir = self.tmp_dir_path;
        }
        if self.output_path.is_some() {
            file.output_dir = self.output_path;
        }
        if self.jobs.is_some() {
            file.jobs = self.jobs;
        }
        if self.timeout_secs.is_some() {
            file.timeout_secs = self.timeout_secs;
        }
        if let Some(namespace) = &self.namespace {
            file.emit.namespace = EmitConfig::parse_namespace(namespace);
        }
        for pair in &self.env {
            let (key, value) = Env::parse_pair(pair)?;
            file.env.insert(key, value);
        }

        Ok(file.into_config()?)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    tracing::debug!("Compiler timeout {:?}, {} job(s)", config.timeout, config.jobs);

    let summary = spv_gen::run(&config)?;
    tracing::info!(
        "Generated {} shader(s) into {}",
        summary.shaders.len(),
        config.output_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_gen::config::resolve_compiler;
    use std::time::Duration;

    #[test]
    fn test_cli_flags_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = dir.path().join("glslc");
        std::fs::write(&compiler, "").unwrap();

        let compiler_arg = compiler.to_str().unwrap();
        let cli = Cli::parse_from([
            "spv-gen",
            "-i",
            "shaders",
            "-c",
            compiler_arg,
            "-t",
            "tmp",
            "-o",
            "out",
            "--env",
            "precision=mediump",
            "--namespace",
            "gpu::kernels",
            "-j",
            "2",
        ]);
        let config = cli.into_config().unwrap();

        assert_eq!(config.source_dirs, [PathBuf::from("shaders")]);
        assert_eq!(config.compiler, resolve_compiler(&compiler).unwrap());
        assert_eq!(config.env.get("precision"), Some("mediump"));
        assert_eq!(config.emit.namespace, ["gpu", "kernels"]);
        assert_eq!(config.jobs, 2);
        assert_eq!(config.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_missing_output_is_error() {
        let cli = Cli::parse_from(["spv-gen", "-c", "/bin/sh", "-t", "tmp"]);
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn test_malformed_env_pair() {
        let cli = Cli::parse_from([
            "spv-gen", "-c", "/bin/sh", "-t", "tmp", "-o", "out", "--env", "precision",
        ]);
        assert!(cli.into_config().is_err());
    }
}
