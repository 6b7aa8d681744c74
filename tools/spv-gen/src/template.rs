//! Shader template rendering and expansion
//!
//! A template `<name>.glslt` is rendered once per resolved variant of the
//! parameter entry `<name>`. Placeholders are `$IDENT` or `${IDENT}`; any
//! other `$` is copied through unchanged.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Env;
use crate::error::{Error, Result, TemplateError};
use crate::params::{ParameterTable, ResolvedVariant};

/// Extension identifying a shader template
pub const TEMPLATE_EXTENSION: &str = "glslt";

/// Extension of concrete shader sources
pub const SOURCE_EXTENSION: &str = "glsl";

/// Boilerplate prepended to every expanded variant, rendered against the environment
pub const STANDARD_HEADER: &str = "\
#version 450 core
#define PRECISION $precision
#define FORMAT $format

";

/// Source of placeholder values
pub trait Placeholders {
    fn lookup(&self, name: &str) -> Option<String>;
}

impl Placeholders for ResolvedVariant {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).map(ToString::to_string)
    }
}

/// Placeholder with no value, found while rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub placeholder: String,
    /// 1-based line of the placeholder
    pub line: usize,
}

impl Unresolved {
    pub(crate) fn at(self, path: &Path) -> TemplateError {
        TemplateError::UnresolvedPlaceholder {
            path: path.to_path_buf(),
            placeholder: self.placeholder,
            line: self.line,
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("placeholder pattern is valid")
    })
}

/// Substitute every placeholder in `text`
pub fn render(text: &str, values: &impl Placeholders) -> Result<String, Unresolved> {
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    let mut line = 1;

    for caps in placeholder_regex().captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always matches");
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .expect("one alternative matched")
            .as_str();

        let before = &text[last..whole.start()];
        line += before.matches('\n').count();
        output.push_str(before);

        let Some(value) = values.lookup(name) else {
            return Err(Unresolved {
                placeholder: name.to_string(),
                line,
            });
        };
        output.push_str(&value);
        last = whole.end();
    }

    output.push_str(&text[last..]);
    Ok(output)
}

/// Split `<base>.glslt` into its base identifier
pub fn template_base(path: &Path) -> Result<String, TemplateError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TemplateError::InvalidFileName {
            path: path.to_path_buf(),
        })?;

    let parts: Vec<&str> = file_name.split('.').collect();
    let [base, extension] = parts.as_slice() else {
        return Err(TemplateError::InvalidFileName {
            path: path.to_path_buf(),
        });
    };

    if *extension != TEMPLATE_EXTENSION {
        return Err(TemplateError::UnsupportedTemplateType {
            path: path.to_path_buf(),
            extension: extension.to_string(),
        });
    }
    if base.is_empty() {
        return Err(TemplateError::InvalidFileName {
            path: path.to_path_buf(),
        });
    }

    Ok(base.to_string())
}

/// Output file name of one variant: `<base>_<v1>x<v2>...glsl`
pub fn variant_file_name(base: &str, variant: &ResolvedVariant) -> String {
    let values = variant.value_strings();
    if values.is_empty() {
        format!("{base}.{SOURCE_EXTENSION}")
    } else {
        format!("{base}_{}.{SOURCE_EXTENSION}", values.join("x"))
    }
}

/// Render every variant of a template into `out_dir`.
///
/// Returns the written paths in variant order. Variants whose values are
/// identical land on the same file; the later one overwrites the earlier and
/// the path is listed once.
pub fn expand(
    template_path: &Path,
    table: &ParameterTable,
    env: &Env,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let base = template_base(template_path)?;
    let variants = table
        .resolve(&base)
        .ok_or_else(|| TemplateError::MissingParameters {
            path: template_path.to_path_buf(),
            base: base.clone(),
        })?;

    let body = std::fs::read_to_string(template_path).map_err(|e| Error::io(template_path, e))?;
    // The header is identical for every variant
    let header = render(STANDARD_HEADER, env).map_err(|u| u.at(template_path))?;

    std::fs::create_dir_all(out_dir).map_err(|e| Error::io(out_dir, e))?;

    let mut written: Vec<PathBuf> = Vec::with_capacity(variants.len());
    for variant in &variants {
        let rendered = render(&body, variant).map_err(|u| u.at(template_path))?;
        let output_path = out_dir.join(variant_file_name(&base, variant));

        if written.contains(&output_path) {
            tracing::warn!(
                "{}: variants with identical values share {}",
                template_path.display(),
                output_path.display()
            );
        } else {
            written.push(output_path.clone());
        }

        let mut content = header.clone();
        content.push_str(&rendered);
        std::fs::write(&output_path, content).map_err(|e| Error::io(&output_path, e))?;
        tracing::debug!("Expanded {}", output_path.display());
    }

    tracing::info!(
        "Expanded {} into {} shader(s)",
        template_path.display(),
        written.len()
    );
    Ok(written)
}
