//! External shader compiler invocation
//!
//! Runs a glslc-compatible compiler once per concrete source:
//!
//! ```text
//! glslc -fshader-stage=compute <src> -o <out> --target-env=vulkan1.0 -Werror -I <dir>...
//! ```

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{CompileError, Error, Result};

/// Vulkan environment every shader is compiled for
pub const TARGET_ENV: &str = "vulkan1.0";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Minimum wait for captured output once the compiler has exited
const OUTPUT_GRACE: Duration = Duration::from_millis(100);

/// Compiler executable plus the flags shared by every invocation
#[derive(Debug, Clone)]
pub struct ShaderCompiler {
    program: PathBuf,
    include_dirs: Vec<PathBuf>,
    timeout: Duration,
}

impl ShaderCompiler {
    pub fn new(program: impl Into<PathBuf>, include_dirs: Vec<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            include_dirs,
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for compiling `source` into `output`
    pub fn args(&self, source: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-fshader-stage=compute".into(),
            source.into(),
            "-o".into(),
            output.into(),
            format!("--target-env={TARGET_ENV}").into(),
            "-Werror".into(),
        ];
        for dir in &self.include_dirs {
            args.push("-I".into());
            args.push(dir.into());
        }
        args
    }

    /// Compile one source, blocking until the compiler exits or times out
    pub fn compile(&self, source: &Path, output: &Path) -> Result<(), CompileError> {
        let args = self.args(source, output);
        tracing::debug!("Running {} {:?}", self.program.display(), args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CompileError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        // Drain both pipes so a chatty compiler cannot block on a full buffer
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = self.wait(&mut child, source, deadline)?;
        let diagnostics = collect_output(stderr, stdout, deadline);

        if !status.success() {
            return Err(CompileError::Failed {
                source_path: source.to_path_buf(),
                status: describe_status(status),
                diagnostics,
            });
        }

        Ok(())
    }

    fn wait(
        &self,
        child: &mut Child,
        source: &Path,
        deadline: Instant,
    ) -> Result<ExitStatus, CompileError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(CompileError::Timeout {
                            source_path: source.to_path_buf(),
                            timeout: self.timeout,
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(CompileError::Spawn {
                        program: self.program.clone(),
                        source: e,
                    });
                }
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<String>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = pipe.read_to_end(&mut bytes);
            let _ = tx.send(String::from_utf8_lossy(&bytes).into_owned());
        });
        rx
    })
}

/// Gather drained output, waiting no later than `deadline` (plus a short grace).
/// A grandchild still holding a pipe open cannot stall the run; its output is dropped.
fn collect_output(
    stderr: Option<Receiver<String>>,
    stdout: Option<Receiver<String>>,
    deadline: Instant,
) -> String {
    let limit = deadline
        .saturating_duration_since(Instant::now())
        .max(OUTPUT_GRACE);
    let cutoff = Instant::now() + limit;
    let receive = |rx: Option<Receiver<String>>| {
        let Some(rx) = rx else {
            return String::new();
        };
        rx.recv_timeout(cutoff.saturating_duration_since(Instant::now()))
            .unwrap_or_else(|_| {
                tracing::warn!("Compiler output still open after exit; dropping it");
                String::new()
            })
    };
    let stderr = receive(stderr);
    let stdout = receive(stdout);

    match (stderr.is_empty(), stdout.is_empty()) {
        (_, true) => stderr,
        (true, false) => stdout,
        (false, false) => format!("{stderr}{stdout}"),
    }
}

fn describe_status(status: ExitStatus) -> String {
    status
        .code()
        .map(|c| format!("exit code {c}"))
        .unwrap_or_else(|| "terminated by signal".to_string())
}

/// Read a SPIR-V module as little-endian 32-bit words
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(spirv_words(&bytes, path)?)
}

fn spirv_words(bytes: &[u8], path: &Path) -> Result<Vec<u32>, CompileError> {
    let invalid = |reason: String| CompileError::InvalidBytecode {
        path: path.to_path_buf(),
        reason,
    };
    if bytes.is_empty() {
        return Err(invalid("file is empty".to_string()));
    }
    if bytes.len() % 4 != 0 {
        return Err(invalid(format!(
            "size {} is not a multiple of 4 bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
