//! Error types for the shader generator
//!
//! Every failure is fatal to the run. The variants are grouped by the stage
//! that raises them so callers (and tests) can tell a bad definition file
//! from a compiler failure without string matching.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error returned by every fallible stage of a run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    /// Compile worker pool could not be started
    #[error("failed to start compile workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Filesystem failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Parameter definitions and generator settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Two definition entries share a name (same or different files)
    #[error("{}: parameter entry `{name}` has already been loaded", origin.display())]
    DuplicateIdentifier { origin: PathBuf, name: String },

    /// An override references parameters the defaults do not declare
    #[error("{}: entry `{entry}` override #{index} uses unknown keys {keys:?}", origin.display())]
    InvalidKey {
        origin: PathBuf,
        entry: String,
        index: usize,
        keys: Vec<String>,
    },

    /// Two equal keys at the same nesting level of a definition file
    #[error("{}: duplicate key `{key}` in {location}", origin.display())]
    DuplicateKey {
        origin: PathBuf,
        key: String,
        location: String,
    },

    /// A mapping key that is itself a mapping or sequence
    #[error("{}: unhashable key in {location}", origin.display())]
    UnhashableKey { origin: PathBuf, location: String },

    /// Document shape does not match mapping-of-entries
    #[error("{}: malformed parameter definition: {reason}", origin.display())]
    MalformedInput { origin: PathBuf, reason: String },

    /// Entry or parameter name is not a valid identifier
    #[error("{}: `{name}` is not a valid identifier", origin.display())]
    InvalidIdentifier { origin: PathBuf, name: String },

    /// Parameter value outside string/integer/boolean
    #[error("{}: parameter `{name}` in entry `{entry}` has unsupported value: {found}", origin.display())]
    InvalidValue {
        origin: PathBuf,
        entry: String,
        name: String,
        found: String,
    },

    /// Syntax error reported by the underlying YAML/JSON/TOML parser
    #[error("{}: {message}", origin.display())]
    Parse { origin: PathBuf, message: String },

    /// Definition file with an extension we do not parse
    #[error("{}: unsupported parameter definition format", path.display())]
    UnsupportedDefinitionFormat { path: PathBuf },

    /// `--env` value not of the form KEY=VALUE
    #[error("invalid environment override `{0}` (expected KEY=VALUE)")]
    InvalidEnvPair(String),

    /// Required setting given neither on the command line nor in the config file
    #[error("missing required setting `{0}`")]
    MissingSetting(&'static str),

    /// Compiler executable could not be located
    #[error("shader compiler `{program}` not found: {reason}")]
    CompilerNotFound { program: String, reason: String },
}

/// Template discovery and rendering
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("{}: invalid file type for shader template `{extension}`", path.display())]
    UnsupportedTemplateType { path: PathBuf, extension: String },

    #[error("{}: template file name must be `<name>.glslt`", path.display())]
    InvalidFileName { path: PathBuf },

    #[error("{}: parameters for `{base}` have not been loaded", path.display())]
    MissingParameters { path: PathBuf, base: String },

    #[error("{}:{line}: unresolved placeholder `${placeholder}`", path.display())]
    UnresolvedPlaceholder {
        path: PathBuf,
        placeholder: String,
        line: usize,
    },
}

/// Metadata scanning of a concrete shader source
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("{}:{line}: descriptor binding has no recognised resource kind: `{text}`", path.display())]
    UnrecognizedDescriptorKind {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("{}:{line}: malformed {directive} directive: `{text}`", path.display())]
    MalformedDirective {
        path: PathBuf,
        line: usize,
        directive: &'static str,
        text: String,
    },
}

/// External compiler invocation
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Compiler exited non-zero; diagnostics are the captured output, verbatim
    #[error("compiling {} failed ({status}):\n{diagnostics}", source_path.display())]
    Failed {
        source_path: PathBuf,
        status: String,
        diagnostics: String,
    },

    #[error("compiling {} timed out after {timeout:?}", source_path.display())]
    Timeout {
        source_path: PathBuf,
        timeout: Duration,
    },

    #[error("failed to run shader compiler {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: invalid SPIR-V bytecode: {reason}", path.display())]
    InvalidBytecode { path: PathBuf, reason: String },
}

/// Artifact emission
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// Storage-class tag outside the fixed enumeration
    #[error("shader `{shader}`: unknown storage class `{tag}`")]
    UnknownStorageClass { shader: String, tag: String },

    #[error("shader name `{name}` derived from both {} and {}", first.display(), second.display())]
    NameCollision {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("failed to format generated code")]
    Format(#[from] std::fmt::Error),
}
