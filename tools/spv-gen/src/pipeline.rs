//! End-to-end generation run
//!
//! Stages, in order: create directories, load parameter definitions, expand
//! templates, discover concrete sources, compile and extract metadata, emit
//! the artifact pair. The first error aborts the run and is returned as is.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::compiler::{ShaderCompiler, read_spirv};
use crate::config::{Env, GeneratorConfig};
use crate::emit::{self, CompiledShader};
use crate::error::{Error, Result};
use crate::metadata;
use crate::params::{DefinitionFormat, ParameterTable};
use crate::template::{self, SOURCE_EXTENSION, TEMPLATE_EXTENSION};

/// Subdirectory of each source directory holding parameter definitions
pub const TEMPLATES_DIR: &str = "templates";

/// Subdirectory of the temporary directory receiving expanded templates
pub const EXPANDED_DIR: &str = "expanded";

/// Subdirectory of the temporary directory receiving env-rendered sources and bytecode
pub const STAGED_DIR: &str = "staged";

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct GenerationSummary {
    /// Shader names in emission order
    pub shaders: Vec<String>,
    pub header_path: PathBuf,
    pub source_path: PathBuf,
}

/// A concrete shader source and the name it is emitted under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub name: String,
    pub path: PathBuf,
}

/// Derive the shader name from a source path: the file stem with every
/// character outside `[A-Za-z0-9_]` replaced by `_`
pub fn shader_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Files under `root` whose extension satisfies `wanted`, sorted by path.
/// Directories equal to `skip` are not entered.
fn collect_files(root: &Path, skip: &Path, wanted: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path() != skip)
    {
        let entry = entry.map_err(|e| Error::io(root, e.into()))?;
        if entry.file_type().is_file() && wanted(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| Error::io(path, e))
}

/// Load every definition file under `<root>/templates` into one table
pub fn load_parameters(roots: &[PathBuf], skip: &Path) -> Result<ParameterTable> {
    let mut table = ParameterTable::new();
    for root in roots {
        let dir = root.join(TEMPLATES_DIR);
        if !dir.is_dir() {
            continue;
        }
        for path in collect_files(&dir, skip, |p| DefinitionFormat::from_path(p).is_some())? {
            tracing::debug!("Loading parameters from {}", path.display());
            table.load_file(&path)?;
        }
    }
    tracing::info!("Loaded {} parameter set(s)", table.len());
    Ok(table)
}

/// Expand every template under the source roots into `out_dir`
pub fn expand_templates(
    roots: &[PathBuf],
    skip: &Path,
    table: &ParameterTable,
    env: &Env,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut templates = Vec::new();
    for root in roots {
        templates.extend(collect_files(root, skip, |p| {
            has_extension(p, TEMPLATE_EXTENSION)
        })?);
    }
    templates.sort();

    let mut expanded = Vec::new();
    for path in &templates {
        expanded.extend(template::expand(path, table, env, out_dir)?);
    }
    Ok(expanded)
}

/// Static sources under the roots plus `expanded`, sorted by path, with names checked
pub fn discover_sources(
    roots: &[PathBuf],
    skip: &Path,
    expanded: Vec<PathBuf>,
) -> Result<Vec<ShaderSource>> {
    let mut paths = expanded;
    for root in roots {
        paths.extend(collect_files(root, skip, |p| has_extension(p, SOURCE_EXTENSION))?);
    }
    paths.sort();

    let sources: Vec<ShaderSource> = paths
        .into_iter()
        .map(|path| ShaderSource {
            name: shader_name(&path),
            path,
        })
        .collect();

    emit::ensure_unique_names(sources.iter().map(|s| (s.name.as_str(), s.path.as_path())))?;
    Ok(sources)
}

/// Stage, scan and compile one source
fn build_shader(
    source: &ShaderSource,
    compiler: &ShaderCompiler,
    env: &Env,
    staged_dir: &Path,
) -> Result<CompiledShader> {
    let text = std::fs::read_to_string(&source.path).map_err(|e| Error::io(&source.path, e))?;
    let rendered = template::render(&text, env).map_err(|u| u.at(&source.path))?;

    let staged = staged_dir.join(format!("{}.{SOURCE_EXTENSION}", source.name));
    std::fs::write(&staged, &rendered).map_err(|e| Error::io(&staged, e))?;

    let metadata = metadata::extract_from_str(&rendered, &source.path)?;

    let spv = staged_dir.join(format!("{}.spv", source.name));
    compiler.compile(&staged, &spv)?;
    let words = read_spirv(&spv)?;

    let shader = CompiledShader {
        name: source.name.clone(),
        source_path: source.path.clone(),
        words,
        metadata,
    };
    tracing::info!("Compiled {} ({} bytes)", shader.name, shader.byte_len());
    Ok(shader)
}

/// Build every source on `jobs` workers; results keep input order
pub fn compile_all(
    sources: &[ShaderSource],
    compiler: &ShaderCompiler,
    env: &Env,
    staged_dir: &Path,
    jobs: usize,
) -> Result<Vec<CompiledShader>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()?;

    pool.install(|| {
        sources
            .par_iter()
            .map(|source| build_shader(source, compiler, env, staged_dir))
            .collect()
    })
}

/// Run the whole pipeline
pub fn run(config: &GeneratorConfig) -> Result<GenerationSummary> {
    create_dir(&config.tmp_dir)?;
    create_dir(&config.output_dir)?;

    // Generated files must not be rediscovered when tmp_dir sits inside a source dir
    let tmp_root = canonical(&config.tmp_dir)?;
    let expanded_dir = tmp_root.join(EXPANDED_DIR);
    let staged_dir = tmp_root.join(STAGED_DIR);
    create_dir(&expanded_dir)?;
    create_dir(&staged_dir)?;

    let roots = config
        .source_dirs
        .iter()
        .map(|dir| canonical(dir))
        .collect::<Result<Vec<_>>>()?;

    tracing::info!("Loading parameter definitions");
    let table = load_parameters(&roots, &tmp_root)?;

    tracing::info!("Expanding templates");
    let expanded = expand_templates(&roots, &tmp_root, &table, &config.env, &expanded_dir)?;

    let sources = discover_sources(&roots, &tmp_root, expanded)?;
    tracing::info!(
        "Compiling {} shader(s) with {} job(s)",
        sources.len(),
        config.jobs
    );

    let compiler = ShaderCompiler::new(&config.compiler, roots.clone(), config.timeout);
    tracing::debug!("Using compiler {}", compiler.program().display());
    let shaders = compile_all(&sources, &compiler, &config.env, &staged_dir, config.jobs)?;

    let header_path = config.header_path();
    let source_path = config.source_path();
    emit::emit(&shaders, &config.emit, &header_path, &source_path)?;

    Ok(GenerationSummary {
        shaders: shaders.into_iter().map(|s| s.name).collect(),
        header_path,
        source_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_name() {
        assert_eq!(shader_name(Path::new("dir/conv2d_4x4.glsl")), "conv2d_4x4");
        assert_eq!(shader_name(Path::new("conv2d_1.5x2.glsl")), "conv2d_1_5x2");
        assert_eq!(shader_name(Path::new("add-relu.glsl")), "add_relu");
    }

    #[test]
    fn test_discover_sorts_and_skips_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let tmp = root.join("tmp");
        std::fs::create_dir_all(tmp.join(EXPANDED_DIR)).unwrap();
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("zeta.glsl"), "").unwrap();
        std::fs::write(root.join("nested/alpha.glsl"), "").unwrap();
        std::fs::write(root.join("notes.txt"), "").unwrap();
        let expanded = tmp.join(EXPANDED_DIR).join("beta_1.glsl");
        std::fs::write(&expanded, "").unwrap();

        let sources = discover_sources(&[root.clone()], &tmp, vec![expanded]).unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta_1", "zeta"]);
    }

    #[test]
    fn test_discover_rejects_name_collision() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::write(root.join("a/copy.glsl"), "").unwrap();
        std::fs::write(root.join("b/copy.glsl"), "").unwrap();

        let err = discover_sources(&[root.clone()], &root.join("tmp"), Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Emit(crate::error::EmitError::NameCollision { ref name, .. }) if name == "copy"
        ));
    }

    #[test]
    fn test_load_parameters_aggregates_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let templates = root.join(TEMPLATES_DIR).join("nn");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(
            templates.join("conv.yaml"),
            "conv:\n  parameter_names_with_default_values: {X: 4}\n",
        )
        .unwrap();
        std::fs::write(
            root.join(TEMPLATES_DIR).join("pool.json"),
            r#"{"pool": {"parameter_names_with_default_values": {"K": 2}}}"#,
        )
        .unwrap();

        let table = load_parameters(&[root.clone()], &root.join("tmp")).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.contains("conv"));
        assert!(table.contains("pool"));
    }

    #[test]
    fn test_duplicate_entry_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let templates = root.join(TEMPLATES_DIR);
        std::fs::create_dir_all(&templates).unwrap();
        let entry = "conv:\n  parameter_names_with_default_values: {X: 4}\n";
        std::fs::write(templates.join("a.yaml"), entry).unwrap();
        std::fs::write(templates.join("b.yaml"), entry).unwrap();

        let err = load_parameters(&[root.clone()], &root.join("tmp")).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(crate::error::ConfigError::DuplicateIdentifier { ref name, .. }) if name == "conv"
        ));
    }
}
