//! C++ artifact generation
//!
//! Produces a declarations header and a definitions source that embed every
//! compiled shader as a `uint32_t` table plus an `api::ShaderInfo` record.
//! Both files list the same shaders in the same order and are only written
//! once both have been rendered.

use std::ffi::OsString;
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::config::EmitConfig;
use crate::error::{EmitError, Error, Result};
use crate::metadata::ShaderMetadata;

const WORDS_PER_LINE: usize = 8;

/// One shader ready to be embedded
#[derive(Debug, Clone)]
pub struct CompiledShader {
    /// Unique identifier, also the C++ symbol name
    pub name: String,
    /// Source the shader was compiled from
    pub source_path: PathBuf,
    /// SPIR-V words
    pub words: Vec<u32>,
    pub metadata: ShaderMetadata,
}

impl CompiledShader {
    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }
}

/// Storage class of weights or biases as understood by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Texture2D,
    Texture3D,
    Buffer,
    Unknown,
}

impl StorageClass {
    /// Map a directive tag; an absent tag is `Unknown`, an unlisted one is `None`
    pub fn from_tag(tag: Option<&str>) -> Option<Self> {
        match tag {
            None | Some("") => Some(StorageClass::Unknown),
            Some("TEXTURE_2D") => Some(StorageClass::Texture2D),
            Some("TEXTURE_3D") => Some(StorageClass::Texture3D),
            Some("BUFFER") => Some(StorageClass::Buffer),
            Some(_) => None,
        }
    }

    pub fn cpp_name(self) -> &'static str {
        match self {
            StorageClass::Texture2D => "api::StorageType::TEXTURE_2D",
            StorageClass::Texture3D => "api::StorageType::TEXTURE_3D",
            StorageClass::Buffer => "api::StorageType::BUFFER",
            StorageClass::Unknown => "api::StorageType::UNKNOWN",
        }
    }
}

fn storage_class(shader: &CompiledShader, tag: Option<&str>) -> Result<StorageClass, EmitError> {
    StorageClass::from_tag(tag).ok_or_else(|| EmitError::UnknownStorageClass {
        shader: shader.name.clone(),
        tag: tag.unwrap_or_default().to_string(),
    })
}

/// Fail if two sources map to the same shader name
pub fn ensure_unique_names<'a>(
    shaders: impl IntoIterator<Item = (&'a str, &'a Path)>,
) -> Result<(), EmitError> {
    let mut seen: HashMap<&str, &Path> = HashMap::new();
    for (name, path) in shaders {
        if let Some(first) = seen.insert(name, path) {
            return Err(EmitError::NameCollision {
                name: name.to_string(),
                first: first.to_path_buf(),
                second: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Rendered declarations and definitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub header: String,
    pub source: String,
}

fn namespace_open(output: &mut String, config: &EmitConfig) -> std::fmt::Result {
    for ns in &config.namespace {
        writeln!(output, "namespace {ns} {{")?;
    }
    Ok(())
}

fn namespace_close(output: &mut String, config: &EmitConfig) -> std::fmt::Result {
    for ns in config.namespace.iter().rev() {
        writeln!(output, "}} // namespace {ns}")?;
    }
    Ok(())
}

/// Render both artifacts in memory
pub fn render(shaders: &[CompiledShader], config: &EmitConfig) -> Result<Artifacts, EmitError> {
    ensure_unique_names(
        shaders
            .iter()
            .map(|s| (s.name.as_str(), s.source_path.as_path())),
    )?;

    let prefix = &config.include_prefix;

    let mut header = String::new();
    writeln!(header, "// GENERATED FILE - DO NOT EDIT")?;
    writeln!(header, "// Generator: tools/spv-gen")?;
    writeln!(header, "#pragma once")?;
    writeln!(header, "#include <stdint.h>")?;
    writeln!(header, "#include <vector>")?;
    writeln!(header, "#include <string>")?;
    writeln!(header, "#include <{prefix}/api/Types.h>")?;
    writeln!(header, "#include <{prefix}/api/vk_api.h>")?;
    namespace_open(&mut header, config)?;
    writeln!(header, "namespace api {{")?;
    writeln!(header, "struct ShaderInfo;")?;
    writeln!(header, "}} // namespace api")?;

    let mut source = String::new();
    writeln!(source, "// GENERATED FILE - DO NOT EDIT")?;
    writeln!(source, "// Generator: tools/spv-gen")?;
    writeln!(source, "#include <{prefix}/{}>", config.header_name)?;
    writeln!(source, "#include <{prefix}/api/Shader.h>")?;
    namespace_open(&mut source, config)?;

    // Binary tables stay file-local
    writeln!(source, "namespace {{")?;
    for shader in shaders {
        write_binary_table(&mut source, shader)?;
    }
    writeln!(source, "}} // namespace")?;

    for shader in shaders {
        let weight = storage_class(shader, shader.metadata.weight_storage.as_deref())?;
        let bias = storage_class(shader, shader.metadata.bias_storage.as_deref())?;

        let layout: Vec<&str> = shader
            .metadata
            .layout
            .iter()
            .map(|kind| kind.vk_name())
            .collect();
        let tile_size = match shader.metadata.tile_size {
            Some([x, y, z]) => format!("{{{x}, {y}, {z}}}"),
            None => "std::vector<uint32_t>()".to_string(),
        };

        writeln!(header, "extern const api::ShaderInfo {};", shader.name)?;

        writeln!(source, "const api::ShaderInfo {}(", shader.name)?;
        writeln!(source, "  \"{}\",", shader.name)?;
        writeln!(source, "  {}_bin,", shader.name)?;
        writeln!(source, "  {},", shader.byte_len())?;
        writeln!(source, "  {{{}}},", layout.join(", "))?;
        writeln!(source, "  {tile_size},")?;
        writeln!(source, "  {},", weight.cpp_name())?;
        writeln!(source, "  {}", bias.cpp_name())?;
        writeln!(source, ");")?;
    }

    namespace_close(&mut header, config)?;
    namespace_close(&mut source, config)?;

    Ok(Artifacts { header, source })
}

fn write_binary_table(output: &mut String, shader: &CompiledShader) -> std::fmt::Result {
    writeln!(output, "const uint32_t {}_bin[] = {{", shader.name)?;
    let rows: Vec<String> = shader
        .words
        .chunks(WORDS_PER_LINE)
        .map(|row| {
            row.iter()
                .map(|w| format!("0x{w:08x}"))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect();
    for (i, row) in rows.iter().enumerate() {
        let separator = if i + 1 < rows.len() { "," } else { "" };
        writeln!(output, "  {row}{separator}")?;
    }
    writeln!(output, "}};")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Write both artifacts: temporaries first, then rename each into place.
///
/// The header is swapped in first. If the definitions file cannot follow,
/// the new header is removed and any previous header restored, so the
/// output directory never holds one artifact of a new pair next to one of
/// an old pair or none.
pub fn write_pair(artifacts: &Artifacts, header_path: &Path, source_path: &Path) -> Result<()> {
    let header_tmp = sibling(header_path, ".tmp");
    let source_tmp = sibling(source_path, ".tmp");
    let header_backup = sibling(header_path, ".bak");

    let cleanup = || {
        let _ = std::fs::remove_file(&header_tmp);
        let _ = std::fs::remove_file(&source_tmp);
    };

    let staged = std::fs::write(&header_tmp, &artifacts.header)
        .map_err(|e| Error::io(&header_tmp, e))
        .and_then(|()| {
            std::fs::write(&source_tmp, &artifacts.source).map_err(|e| Error::io(&source_tmp, e))
        });
    if let Err(e) = staged {
        cleanup();
        return Err(e);
    }

    let had_header = header_path.is_file();
    if had_header {
        std::fs::rename(header_path, &header_backup).map_err(|e| {
            cleanup();
            Error::io(header_path, e)
        })?;
    }
    let restore_header = || {
        if had_header {
            let _ = std::fs::rename(&header_backup, header_path);
        }
    };

    if let Err(e) = std::fs::rename(&header_tmp, header_path) {
        restore_header();
        cleanup();
        return Err(Error::io(header_path, e));
    }

    if let Err(e) = std::fs::rename(&source_tmp, source_path) {
        let _ = std::fs::remove_file(header_path);
        restore_header();
        cleanup();
        return Err(Error::io(source_path, e));
    }

    if had_header {
        let _ = std::fs::remove_file(&header_backup);
    }
    Ok(())
}

/// Render and write the artifact pair
pub fn emit(
    shaders: &[CompiledShader],
    config: &EmitConfig,
    header_path: &Path,
    source_path: &Path,
) -> Result<()> {
    let artifacts = render(shaders, config)?;
    write_pair(&artifacts, header_path, source_path)?;
    tracing::info!(
        "Wrote {} shader(s) to {} and {}",
        shaders.len(),
        header_path.display(),
        source_path.display()
    );
    Ok(())
}
