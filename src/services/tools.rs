use crate::models::ToolPaths;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// The external executables the flows delegate to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// xdelta3 binary diff applier
    Xdelta,
    /// UMD-replace container splicer
    UmdReplace,
    /// psp-save save (de/en)cryptor
    PspSave,
    /// DATA.BIN cryptor
    DataBinCrypt,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tool::Xdelta => "xdelta3",
            Tool::UmdReplace => "UMD-replace",
            Tool::PspSave => "psp-save",
            Tool::DataBinCrypt => "DATA.BIN cryptor",
        };
        f.write_str(name)
    }
}

/// A fully built tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub tool: Tool,
    pub program: Utf8PathBuf,
    pub args: Vec<String>,
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.program)?;
        for arg in &self.args {
            write!(f, " \"{}\"", arg)?;
        }
        Ok(())
    }
}

/// How a finished tool process exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolOutcome {
    pub tool: Tool,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors that keep a tool from producing an exit status
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to start {tool} ({program}): {source}")]
    Spawn {
        tool: Tool,
        program: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for {tool}: {source}")]
    Wait {
        tool: Tool,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: Tool, timeout: Duration },
}

/// Launches external tools.
///
/// One call spawns one process and resolves once it exits. There is no retry;
/// a nonzero exit is reported in the [`ToolOutcome`], not as an error.
#[allow(async_fn_in_trait)]
pub trait ToolInvoker {
    /// Run `command` to completion.
    ///
    /// # Returns
    /// The [`ToolOutcome`] with the exit code, whatever it is
    ///
    /// # Errors
    /// [`ToolError`] when the process could not be started or awaited, or ran
    /// past the configured timeout (it is killed in that case)
    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutcome, ToolError>;
}

/// [`ToolInvoker`] backed by `tokio::process`
///
/// Standard streams are detached; the tools are judged by exit status alone.
/// With a timeout set, a tool still running when it expires is killed and
/// reported as [`ToolError::Timeout`].
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ToolInvoker for ProcessInvoker {
    async fn invoke(&self, command: &ToolCommand) -> Result<ToolOutcome, ToolError> {
        tracing::info!("Executing: {}", command);

        let start = Instant::now();
        let mut child = Command::new(command.program.as_std_path())
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                tool: command.tool,
                program: command.program.clone(),
                source,
            })?;

        let status = match self.timeout {
            Some(limit) => timeout(limit, child.wait()).await.map_err(|_| {
                tracing::warn!("{} timed out after {:?}", command.tool, limit);
                ToolError::Timeout {
                    tool: command.tool,
                    timeout: limit,
                }
            })?,
            None => child.wait().await,
        }
        .map_err(|source| ToolError::Wait {
            tool: command.tool,
            source,
        })?;

        let outcome = ToolOutcome {
            tool: command.tool,
            exit_code: status.code(),
            duration: start.elapsed(),
        };

        tracing::info!(
            "{} completed in {:.2}s with exit code {:?}",
            command.tool,
            outcome.duration.as_secs_f32(),
            outcome.exit_code
        );

        Ok(outcome)
    }
}

/// Builds the argument vectors of every tool from the configured locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub xdelta: Utf8PathBuf,
    pub umd_replace: Utf8PathBuf,
    pub psp_save: Utf8PathBuf,
    pub data_bin_crypt: Utf8PathBuf,
    pub save_encrypt_mode: u8,
}

impl Toolchain {
    /// Resolve configured tool paths relative to `base_dir`
    pub fn from_config(paths: &ToolPaths, save_encrypt_mode: u8, base_dir: &Utf8Path) -> Self {
        Self {
            xdelta: base_dir.join(&paths.xdelta),
            umd_replace: base_dir.join(&paths.umd_replace),
            psp_save: base_dir.join(&paths.psp_save),
            data_bin_crypt: base_dir.join(&paths.data_bin_crypt),
            save_encrypt_mode,
        }
    }

    /// `xdelta3 -d -s <source> <patch> <output>`
    pub fn xdelta_apply(&self, source: &Utf8Path, patch: &Utf8Path, output: &Utf8Path) -> ToolCommand {
        ToolCommand {
            tool: Tool::Xdelta,
            program: self.xdelta.clone(),
            args: vec![
                "-d".to_string(),
                "-s".to_string(),
                source.to_string(),
                patch.to_string(),
                output.to_string(),
            ],
        }
    }

    /// `UMD-replace <image> <logical path> <replacement>`
    pub fn umd_replace(&self, image: &Utf8Path, logical_path: &str, replacement: &Utf8Path) -> ToolCommand {
        ToolCommand {
            tool: Tool::UmdReplace,
            program: self.umd_replace.clone(),
            args: vec![image.to_string(), logical_path.to_string(), replacement.to_string()],
        }
    }

    /// `psp-save -d <key> <mode> <save> <output>`
    pub fn save_decrypt(&self, key: &Utf8Path, mode: u8, save: &Utf8Path, output: &Utf8Path) -> ToolCommand {
        ToolCommand {
            tool: Tool::PspSave,
            program: self.psp_save.clone(),
            args: vec![
                "-d".to_string(),
                key.to_string(),
                mode.to_string(),
                save.to_string(),
                output.to_string(),
            ],
        }
    }

    /// `psp-save -e <key> <mode> <save> <param in> <param out>`; the save is encrypted in place
    pub fn save_encrypt(
        &self,
        key: &Utf8Path,
        save: &Utf8Path,
        param_in: &Utf8Path,
        param_out: &Utf8Path,
    ) -> ToolCommand {
        ToolCommand {
            tool: Tool::PspSave,
            program: self.psp_save.clone(),
            args: vec![
                "-e".to_string(),
                key.to_string(),
                self.save_encrypt_mode.to_string(),
                save.to_string(),
                param_in.to_string(),
                param_out.to_string(),
            ],
        }
    }

    /// `<cryptor> -d <input> <output>`
    pub fn data_bin_decrypt(&self, input: &Utf8Path, output: &Utf8Path) -> ToolCommand {
        ToolCommand {
            tool: Tool::DataBinCrypt,
            program: self.data_bin_crypt.clone(),
            args: vec!["-d".to_string(), input.to_string(), output.to_string()],
        }
    }
}
