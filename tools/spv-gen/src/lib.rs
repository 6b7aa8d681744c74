//! spv-gen library
//!
//! Build-time compute shader generation: expands parameterized GLSL
//! templates, compiles every concrete source to SPIR-V with an external
//! glslc-compatible compiler, reads descriptor metadata from source comments
//! and emits a C++ header/source pair embedding the bytecode.

pub mod compiler;
pub mod config;
pub mod emit;
pub mod error;
pub mod metadata;
pub mod params;
pub mod pipeline;
pub mod template;

pub use config::{ConfigFile, EmitConfig, Env, GeneratorConfig};
pub use error::{Error, Result};
pub use pipeline::{GenerationSummary, run};
