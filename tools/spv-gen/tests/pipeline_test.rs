//! End-to-end runs against a stand-in compiler
//!
//! The stand-in is a shell script, so these tests only run on Unix.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use spv_gen::config::GeneratorConfig;
use spv_gen::error::{CompileError, EmitError, Error};

/// Writing an executable while another thread forks can fail with ETXTBSY
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

fn serialize() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Writes the two SPIR-V words 0x07230203, 0x00000001 to the `-o` argument
const FAKE_GLSLC: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then
    out="$2"
    shift
  fi
  shift
done
printf '\003\002\043\007\001\000\000\000' > "$out"
"#;

const FAILING_GLSLC: &str = "#!/bin/sh\necho 'syntax error line 3' >&2\nexit 1\n";

struct Workspace {
    _dir: tempfile::TempDir,
    src: PathBuf,
    tmp: PathBuf,
    out: PathBuf,
    compiler: PathBuf,
}

impl Workspace {
    fn new(compiler_script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let src = root.join("shaders");
        std::fs::create_dir_all(src.join("templates")).unwrap();

        let compiler = root.join("fake-glslc");
        std::fs::write(&compiler, compiler_script).unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            src,
            tmp: root.join("tmp"),
            out: root.join("out"),
            compiler,
            _dir: dir,
        }
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.src.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn config(&self) -> GeneratorConfig {
        GeneratorConfig::new(
            vec![self.src.clone()],
            &self.compiler,
            &self.tmp,
            &self.out,
        )
    }

    fn read_output(&self, name: &str) -> String {
        std::fs::read_to_string(self.out.join(name)).unwrap()
    }
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("`{needle}` not found in:\n{haystack}"))
}

#[test]
fn template_expands_defaults_and_override() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    ws.write(
        "templates/foo.yaml",
        "foo:\n  parameter_names_with_default_values:\n    a: 1\n    b: 2\n  parameter_values:\n    - b: 3\n",
    );
    ws.write("foo.glslt", "const int A = $a;\nconst int B = ${b};\nvoid main() {}\n");

    let summary = spv_gen::run(&ws.config()).unwrap();
    assert_eq!(summary.shaders, ["foo_1x2", "foo_1x3"]);

    let expanded = ws.tmp.join("expanded");
    let first = std::fs::read_to_string(expanded.join("foo_1x2.glsl")).unwrap();
    let second = std::fs::read_to_string(expanded.join("foo_1x3.glsl")).unwrap();
    assert!(first.starts_with("#version 450 core\n#define PRECISION highp\n#define FORMAT rgba32f\n"));
    assert!(first.contains("const int A = 1;\nconst int B = 2;"));
    assert!(second.contains("const int A = 1;\nconst int B = 3;"));
}

#[test]
fn static_source_metadata_reaches_artifacts() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    ws.write(
        "fill.glsl",
        "#version 450 core\n\
         /*\n * TILE_SIZE = (4, 4, 1)\n */\n\
         layout(set = 0, binding = 0) uniform restrict Block { ivec4 size; } uBlock;\n\
         void main() {}\n",
    );

    spv_gen::run(&ws.config()).unwrap();

    let source = ws.read_output("spv.cpp");
    assert!(source.contains("const uint32_t fill_bin[] = {\n  0x07230203, 0x00000001\n};"));
    assert!(source.contains(
        "const api::ShaderInfo fill(\n  \"fill\",\n  fill_bin,\n  8,\n  \
         {VK_DESCRIPTOR_TYPE_UNIFORM_BUFFER},\n  {4, 4, 1},\n  \
         api::StorageType::UNKNOWN,\n  api::StorageType::UNKNOWN\n);"
    ));
    assert!(ws.read_output("spv.h").contains("extern const api::ShaderInfo fill;"));
}

#[test]
fn compiler_failure_leaves_no_artifacts() {
    let _guard = serialize();
    let ws = Workspace::new(FAILING_GLSLC);
    ws.write("broken.glsl", "void main() {\n");

    let err = spv_gen::run(&ws.config()).unwrap_err();
    assert!(matches!(err, Error::Compile(CompileError::Failed { .. })));
    assert!(err.to_string().contains("syntax error line 3"));
    assert!(!ws.out.join("spv.h").exists());
    assert!(!ws.out.join("spv.cpp").exists());
}

#[test]
fn artifacts_list_shaders_in_the_same_order() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    ws.write("relu.glsl", "void main() {}\n");
    ws.write("nested/add.glsl", "void main() {}\n");

    let summary = spv_gen::run(&ws.config()).unwrap();
    assert_eq!(summary.shaders, ["add", "relu"]);

    let header = ws.read_output("spv.h");
    let source = ws.read_output("spv.cpp");
    assert!(position(&header, "ShaderInfo add;") < position(&header, "ShaderInfo relu;"));
    assert!(position(&source, "ShaderInfo add(") < position(&source, "ShaderInfo relu("));
    assert!(position(&source, "add_bin[]") < position(&source, "relu_bin[]"));
}

#[test]
fn parallel_jobs_keep_sorted_order() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    let names = ["f", "b", "d", "a", "e", "c"];
    for name in names {
        ws.write(&format!("{name}.glsl"), "void main() {}\n");
    }

    let mut config = ws.config();
    config.jobs = 4;
    let summary = spv_gen::run(&config).unwrap();
    assert_eq!(summary.shaders, ["a", "b", "c", "d", "e", "f"]);
}

#[test]
fn static_sources_see_environment() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    ws.write("copy.glsl", "#define PRECISION $precision\nvoid main() {}\n");

    let mut config = ws.config();
    config.env.set("precision", "mediump");
    spv_gen::run(&config).unwrap();

    let staged = std::fs::read_to_string(ws.tmp.join("staged/copy.glsl")).unwrap();
    assert!(staged.starts_with("#define PRECISION mediump\n"));
}

#[test]
fn duplicate_shader_names_are_rejected() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    ws.write("a/copy.glsl", "void main() {}\n");
    ws.write("b/copy.glsl", "void main() {}\n");

    let err = spv_gen::run(&ws.config()).unwrap_err();
    assert!(matches!(err, Error::Emit(EmitError::NameCollision { .. })));
    assert!(!ws.out.join("spv.h").exists());
}

#[test]
fn unknown_storage_class_writes_nothing() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    ws.write("conv.glsl", "// WEIGHT_STORAGE = IMAGE_1D\nvoid main() {}\n");
    ws.write("relu.glsl", "void main() {}\n");

    let err = spv_gen::run(&ws.config()).unwrap_err();
    assert!(matches!(err, Error::Emit(EmitError::UnknownStorageClass { .. })));
    assert!(!ws.out.join("spv.h").exists());
    assert!(!ws.out.join("spv.cpp").exists());
}

#[test]
fn tmp_dir_inside_source_is_not_rediscovered() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    ws.write("templates/pool.yaml", "pool:\n  parameter_names_with_default_values: {K: 2}\n");
    ws.write("pool.glslt", "const int K = $K;\n");

    let mut config = ws.config();
    config.tmp_dir = ws.src.join("build");
    let summary = spv_gen::run(&config).unwrap();
    assert_eq!(summary.shaders, ["pool_2"]);

    // A second run sees the previous expansion and staging output on disk
    let summary = spv_gen::run(&config).unwrap();
    assert_eq!(summary.shaders, ["pool_2"]);
}

#[test]
fn missing_parameters_for_template() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    ws.write("orphan.glslt", "void main() {}\n");

    let err = spv_gen::run(&ws.config()).unwrap_err();
    assert!(err.to_string().contains("parameters for `orphan` have not been loaded"));
}

#[test]
fn blocked_source_artifact_leaves_no_partial_pair() {
    let _guard = serialize();
    let ws = Workspace::new(FAKE_GLSLC);
    ws.write("relu.glsl", "void main() {}\n");
    // A non-empty directory where spv.cpp belongs makes the final rename fail
    std::fs::create_dir_all(ws.out.join("spv.cpp/x")).unwrap();

    let err = spv_gen::run(&ws.config()).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
    assert!(!ws.out.join("spv.h").exists());

    let leftovers: Vec<_> = std::fs::read_dir(&ws.out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp") || name.ends_with(".bak"))
        .collect();
    assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
}
