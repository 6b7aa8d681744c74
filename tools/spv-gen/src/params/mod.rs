//! Parameter table for shader templates
//!
//! Each definition file maps entry names to a set of default parameter
//! values plus a list of partial overrides:
//!
//! ```yaml
//! conv2d:
//!   parameter_names_with_default_values:
//!     TILE_X: 4
//!     TILE_Y: 4
//!   parameter_values:
//!     - TILE_X: 8
//! ```
//!
//! Names and values are validated when the file is loaded, so a template can
//! only fail to render on placeholders its entry never declared.

mod raw;

use std::fmt;
use std::path::{Path, PathBuf};

use hashbrown::{HashMap, HashSet};

use crate::error::{ConfigError, Error, Result};
use raw::{RawMap, RawValue};

const DEFAULTS_KEY: &str = "parameter_names_with_default_values";
const OVERRIDES_KEY: &str = "parameter_values";

/// Check whether `name` is `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Single template parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Ordered name -> value mapping
pub type ParamMap = Vec<(String, ParamValue)>;

/// Named set of defaults and overrides loaded from one definition entry
#[derive(Debug, Clone)]
pub struct ParameterSet {
    pub name: String,
    pub defaults: ParamMap,
    pub overrides: Vec<ParamMap>,
    /// File the entry was loaded from
    pub origin: PathBuf,
}

impl ParameterSet {
    /// Resolve every variant: the defaults first, then one per override
    pub fn resolve(&self) -> Vec<ResolvedVariant> {
        let mut variants = Vec::with_capacity(self.overrides.len() + 1);
        variants.push(ResolvedVariant {
            set: self.name.clone(),
            values: self.defaults.clone(),
        });

        for overrides in &self.overrides {
            let mut values = self.defaults.clone();
            for (key, value) in overrides {
                if let Some(slot) = values.iter_mut().find(|(name, _)| name == key) {
                    slot.1 = value.clone();
                }
            }
            variants.push(ResolvedVariant {
                set: self.name.clone(),
                values,
            });
        }

        variants
    }
}

/// One fully resolved parameter mapping for a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVariant {
    /// Name of the parameter set this variant came from
    pub set: String,
    /// Every default key, in default order, with overrides applied in place
    pub values: ParamMap,
}

impl ResolvedVariant {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Values in mapping order, as used for output naming
    pub fn value_strings(&self) -> Vec<String> {
        self.values.iter().map(|(_, v)| v.to_string()).collect()
    }
}

/// Format of a parameter definition file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Some(DefinitionFormat::Yaml),
            Some("json") => Some(DefinitionFormat::Json),
            _ => None,
        }
    }
}

/// All parameter sets known to a run, keyed by entry name
#[derive(Debug, Default)]
pub struct ParameterTable {
    sets: Vec<ParameterSet>,
    index: HashMap<String, usize>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a definition file from disk
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let format = DefinitionFormat::from_path(path).ok_or_else(|| {
            ConfigError::UnsupportedDefinitionFormat {
                path: path.to_path_buf(),
            }
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        self.load_str(&content, format, path)?;
        Ok(())
    }

    /// Load definitions from source text.
    ///
    /// Nothing from the source is added unless every entry in it is valid.
    pub fn load_str(
        &mut self,
        source: &str,
        format: DefinitionFormat,
        origin: &Path,
    ) -> Result<(), ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            origin: origin.to_path_buf(),
            message,
        };
        let document: RawValue = match format {
            DefinitionFormat::Yaml => {
                serde_yaml::from_str(source).map_err(|e| parse_error(e.to_string()))?
            }
            DefinitionFormat::Json => {
                serde_json::from_str(source).map_err(|e| parse_error(e.to_string()))?
            }
        };

        let loader = Loader { origin };
        loader.check_duplicates(&document, "document root")?;

        let root = match document {
            RawValue::Map(map) => map,
            // Empty YAML document
            RawValue::Null => RawMap::default(),
            other => {
                return Err(loader.malformed(format!(
                    "top level must be a mapping of entries, found {}",
                    other.kind()
                )));
            }
        };

        let mut parsed = Vec::with_capacity(root.0.len());
        for (key, value) in &root.0 {
            parsed.push(loader.entry(key, value)?);
        }

        for set in &parsed {
            if self.index.contains_key(&set.name) {
                return Err(ConfigError::DuplicateIdentifier {
                    origin: origin.to_path_buf(),
                    name: set.name.clone(),
                });
            }
        }

        for set in parsed {
            tracing::debug!(
                "Loaded parameter set `{}` ({} variants)",
                set.name,
                set.overrides.len() + 1
            );
            self.index.insert(set.name.clone(), self.sets.len());
            self.sets.push(set);
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSet> {
        self.index.get(name).map(|&i| &self.sets[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Resolved variants for an entry, or `None` if it was never loaded
    pub fn resolve(&self, name: &str) -> Option<Vec<ResolvedVariant>> {
        self.get(name).map(ParameterSet::resolve)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Parameter sets in load order
    pub fn iter(&self) -> impl Iterator<Item = &ParameterSet> {
        self.sets.iter()
    }
}

/// Validation of one raw document
struct Loader<'a> {
    origin: &'a Path,
}

impl Loader<'_> {
    fn malformed(&self, reason: String) -> ConfigError {
        ConfigError::MalformedInput {
            origin: self.origin.to_path_buf(),
            reason,
        }
    }

    /// Reject repeated keys at any nesting level
    fn check_duplicates(&self, value: &RawValue, location: &str) -> Result<(), ConfigError> {
        match value {
            RawValue::Map(map) => {
                let mut seen = HashSet::with_capacity(map.0.len());
                for (key, child) in &map.0 {
                    let Some(text) = key.key_text() else {
                        return Err(ConfigError::UnhashableKey {
                            origin: self.origin.to_path_buf(),
                            location: location.to_string(),
                        });
                    };
                    if !seen.insert(text.clone()) {
                        return Err(ConfigError::DuplicateKey {
                            origin: self.origin.to_path_buf(),
                            key: text,
                            location: location.to_string(),
                        });
                    }
                    self.check_duplicates(child, &format!("{location} > `{text}`"))?;
                }
            }
            RawValue::Seq(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.check_duplicates(item, &format!("{location} > [{i}]"))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn identifier(&self, key: &RawValue) -> Result<String, ConfigError> {
        // Collection keys were rejected by `check_duplicates`
        let text = key.key_text().unwrap_or_default();
        if !is_identifier(&text) {
            return Err(ConfigError::InvalidIdentifier {
                origin: self.origin.to_path_buf(),
                name: text,
            });
        }
        Ok(text)
    }

    fn entry(&self, key: &RawValue, value: &RawValue) -> Result<ParameterSet, ConfigError> {
        let name = self.identifier(key)?;
        let RawValue::Map(fields) = value else {
            return Err(self.malformed(format!(
                "entry `{name}` must be a mapping, found {}",
                value.kind()
            )));
        };

        let mut defaults = None;
        let mut overrides = Vec::new();
        for (field, field_value) in &fields.0 {
            match field.key_text().as_deref() {
                Some(DEFAULTS_KEY) => defaults = Some(self.param_map(&name, field_value)?),
                Some(OVERRIDES_KEY) => overrides = self.overrides(&name, field_value)?,
                other => {
                    return Err(self.malformed(format!(
                        "entry `{name}` has unknown field `{}`",
                        other.unwrap_or_default()
                    )));
                }
            }
        }

        let defaults = defaults
            .ok_or_else(|| self.malformed(format!("entry `{name}` is missing `{DEFAULTS_KEY}`")))?;

        for (index, map) in overrides.iter().enumerate() {
            let unknown: Vec<String> = map
                .iter()
                .filter(|(key, _)| !defaults.iter().any(|(d, _)| d == key))
                .map(|(key, _)| key.clone())
                .collect();
            if !unknown.is_empty() {
                return Err(ConfigError::InvalidKey {
                    origin: self.origin.to_path_buf(),
                    entry: name,
                    index,
                    keys: unknown,
                });
            }
        }

        Ok(ParameterSet {
            name,
            defaults,
            overrides,
            origin: self.origin.to_path_buf(),
        })
    }

    fn overrides(&self, entry: &str, value: &RawValue) -> Result<Vec<ParamMap>, ConfigError> {
        match value {
            RawValue::Null => Ok(Vec::new()),
            RawValue::Seq(items) => items
                .iter()
                .map(|item| self.param_map(entry, item))
                .collect(),
            other => Err(self.malformed(format!(
                "`{OVERRIDES_KEY}` of entry `{entry}` must be a sequence, found {}",
                other.kind()
            ))),
        }
    }

    fn param_map(&self, entry: &str, value: &RawValue) -> Result<ParamMap, ConfigError> {
        let map = match value {
            RawValue::Map(map) => map,
            RawValue::Null => return Ok(Vec::new()),
            other => {
                return Err(self.malformed(format!(
                    "parameters of entry `{entry}` must be a mapping, found {}",
                    other.kind()
                )));
            }
        };

        let mut params = Vec::with_capacity(map.0.len());
        for (key, value) in &map.0 {
            let name = self.identifier(key)?;
            let value = match value {
                // Values become part of expanded file names
                RawValue::Str(s) if s.contains(['/', '\\']) => {
                    return Err(ConfigError::InvalidValue {
                        origin: self.origin.to_path_buf(),
                        entry: entry.to_string(),
                        name,
                        found: format!("path separator in `{s}`"),
                    });
                }
                RawValue::Str(s) => ParamValue::Str(s.clone()),
                RawValue::Int(i) => ParamValue::Int(*i),
                RawValue::Bool(b) => ParamValue::Bool(*b),
                other => {
                    return Err(ConfigError::InvalidValue {
                        origin: self.origin.to_path_buf(),
                        entry: entry.to_string(),
                        name,
                        found: other.kind().to_string(),
                    });
                }
            };
            params.push((name, value));
        }
        Ok(params)
    }
}
