//! Structural metadata embedded in shader sources
//!
//! Sources describe themselves in a leading comment block:
//!
//! ```glsl
//! /*
//!  * TILE_SIZE = (4, 4, 1)
//!  * WEIGHT_STORAGE = TEXTURE_2D
//!  * BIAS_STORAGE = BUFFER
//!  */
//! layout(set = 0, binding = 0) uniform PRECISION restrict writeonly image3D uOutput;
//! layout(set = 0, binding = 1) uniform PRECISION sampler3D uInput;
//! layout(set = 0, binding = 2) uniform restrict Block { ivec4 size; } uBlock;
//! ```
//!
//! Each line is classified on its own. Descriptor order follows line order
//! because the runtime binds resources by position.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, MetadataError, Result};

/// Resource kind of one descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    StorageImage,
    CombinedImageSampler,
    StorageBuffer,
    UniformBuffer,
}

impl DescriptorKind {
    /// Vulkan enumerator name used in the generated tables
    pub fn vk_name(self) -> &'static str {
        match self {
            DescriptorKind::StorageImage => "VK_DESCRIPTOR_TYPE_STORAGE_IMAGE",
            DescriptorKind::CombinedImageSampler => "VK_DESCRIPTOR_TYPE_COMBINED_IMAGE_SAMPLER",
            DescriptorKind::StorageBuffer => "VK_DESCRIPTOR_TYPE_STORAGE_BUFFER",
            DescriptorKind::UniformBuffer => "VK_DESCRIPTOR_TYPE_UNIFORM_BUFFER",
        }
    }
}

/// Metadata of one concrete shader source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderMetadata {
    /// Workgroup tile size, if the source declares one
    pub tile_size: Option<[u32; 3]>,
    /// Descriptor kinds in binding-declaration order
    pub layout: Vec<DescriptorKind>,
    /// Raw `WEIGHT_STORAGE` tag
    pub weight_storage: Option<String>,
    /// Raw `BIAS_STORAGE` tag
    pub bias_storage: Option<String>,
}

/// Fact contributed by a single source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineFact {
    Descriptor(DescriptorKind),
    TileSize([u32; 3]),
    WeightStorage(String),
    BiasStorage(String),
}

/// Why a recognised line could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    /// Descriptor line with none of the known resource kinds
    UnrecognizedKind,
    /// Directive prefix present but body does not parse
    Malformed(&'static str),
}

#[derive(Debug, Clone, Copy)]
enum Directive {
    Descriptor,
    TileSize,
    WeightStorage,
    BiasStorage,
}

impl Directive {
    fn label(self) -> &'static str {
        match self {
            Directive::Descriptor => "descriptor",
            Directive::TileSize => "TILE_SIZE",
            Directive::WeightStorage => "WEIGHT_STORAGE",
            Directive::BiasStorage => "BIAS_STORAGE",
        }
    }
}

/// A line prefix and the parser for lines carrying it
struct Rule {
    directive: Directive,
    prefix: Regex,
    body: Option<Regex>,
}

fn rule(directive: Directive, prefix: &str, body: Option<&str>) -> Rule {
    Rule {
        directive,
        prefix: Regex::new(prefix).expect("rule prefix is valid"),
        body: body.map(|b| Regex::new(b).expect("rule body is valid")),
    }
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            rule(Directive::Descriptor, r"^\s*layout\s*\(\s*set\b", None),
            rule(
                Directive::TileSize,
                r"^\s*(?:\*|//)\s*TILE_SIZE\s*=",
                Some(r"TILE_SIZE\s*=\s*\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*\)"),
            ),
            rule(
                Directive::WeightStorage,
                r"^\s*(?:\*|//)\s*WEIGHT_STORAGE\s*=",
                Some(r"WEIGHT_STORAGE\s*=\s*([A-Za-z0-9]+(?:_[0-9]D)?)\b"),
            ),
            rule(
                Directive::BiasStorage,
                r"^\s*(?:\*|//)\s*BIAS_STORAGE\s*=",
                Some(r"BIAS_STORAGE\s*=\s*([A-Za-z0-9]+(?:_[0-9]D)?)\b"),
            ),
        ]
    })
}

/// Resource-kind lookup, checked in order
fn kind_table() -> &'static [(Regex, DescriptorKind)] {
    static TABLE: OnceLock<Vec<(Regex, DescriptorKind)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"image[123]D\b", DescriptorKind::StorageImage),
            (r"sampler[123]D\b", DescriptorKind::CombinedImageSampler),
            (r"\bbuffer\b", DescriptorKind::StorageBuffer),
            (r"\buniform\b", DescriptorKind::UniformBuffer),
        ]
        .into_iter()
        .map(|(pattern, kind)| (Regex::new(pattern).expect("kind pattern is valid"), kind))
        .collect()
    })
}

/// Map a descriptor line to its resource kind
pub fn descriptor_kind(line: &str) -> Option<DescriptorKind> {
    kind_table()
        .iter()
        .find(|(pattern, _)| pattern.is_match(line))
        .map(|(_, kind)| *kind)
}

/// Classify one line; the first rule whose prefix matches decides
pub fn classify_line(line: &str) -> Result<Option<LineFact>, LineError> {
    let Some(rule) = rules().iter().find(|r| r.prefix.is_match(line)) else {
        return Ok(None);
    };

    let malformed = LineError::Malformed(rule.directive.label());
    let captures = match &rule.body {
        Some(body) => Some(body.captures(line).ok_or(malformed)?),
        None => None,
    };

    let fact = match (rule.directive, captures) {
        (Directive::Descriptor, _) => {
            LineFact::Descriptor(descriptor_kind(line).ok_or(LineError::UnrecognizedKind)?)
        }
        (Directive::TileSize, Some(caps)) => {
            let mut tile = [0u32; 3];
            for (i, slot) in tile.iter_mut().enumerate() {
                *slot = caps[i + 1].parse().map_err(|_| malformed)?;
            }
            LineFact::TileSize(tile)
        }
        (Directive::WeightStorage, Some(caps)) => LineFact::WeightStorage(caps[1].to_string()),
        (Directive::BiasStorage, Some(caps)) => LineFact::BiasStorage(caps[1].to_string()),
        (_, None) => return Err(malformed),
    };
    Ok(Some(fact))
}

impl ShaderMetadata {
    fn apply(&mut self, fact: LineFact) {
        match fact {
            LineFact::Descriptor(kind) => self.layout.push(kind),
            LineFact::TileSize(tile) => self.tile_size = Some(tile),
            LineFact::WeightStorage(tag) => self.weight_storage = Some(tag),
            LineFact::BiasStorage(tag) => self.bias_storage = Some(tag),
        }
    }
}

/// Scan source text top to bottom
pub fn extract_from_str(source: &str, path: &Path) -> Result<ShaderMetadata, MetadataError> {
    let mut metadata = ShaderMetadata::default();

    for (index, line) in source.lines().enumerate() {
        match classify_line(line) {
            Ok(Some(fact)) => metadata.apply(fact),
            Ok(None) => {}
            Err(LineError::UnrecognizedKind) => {
                return Err(MetadataError::UnrecognizedDescriptorKind {
                    path: path.to_path_buf(),
                    line: index + 1,
                    text: line.trim().to_string(),
                });
            }
            Err(LineError::Malformed(directive)) => {
                return Err(MetadataError::MalformedDirective {
                    path: path.to_path_buf(),
                    line: index + 1,
                    directive,
                    text: line.trim().to_string(),
                });
            }
        }
    }

    Ok(metadata)
}

/// Read and scan a shader source file
pub fn extract(path: &Path) -> Result<ShaderMetadata> {
    let source = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(extract_from_str(&source, path)?)
}
