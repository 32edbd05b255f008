//! External tool invocation.
//!
//! The package builder and the repository indexer are configured as plain
//! command strings (`makepkg --syncdeps --force --noconfirm`) so that
//! deployments and tests can substitute their own tools.

use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// A configured external command: program plus fixed leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    /// A command with no fixed arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Split a command string on whitespace. Returns `None` if it is blank.
    ///
    /// No shell quoting is interpreted.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    /// Program name or path.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Fixed arguments following the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the program can be found (on `PATH`, or as a path).
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    /// A [`Command`] with the program and fixed arguments applied.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Run with `cwd` as working directory.
    ///
    /// When `log` is given, stdout and stderr are both written to it;
    /// otherwise they are inherited from this process.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be created or the process
    /// cannot be spawned. A non-zero exit is not an error here; inspect the
    /// returned status.
    pub fn run_in(
        &self,
        cwd: &Path,
        extra_args: &[&std::ffi::OsStr],
        log: Option<&Path>,
    ) -> std::io::Result<ExitStatus> {
        let mut cmd = self.to_command();
        cmd.args(extra_args).current_dir(cwd).stdin(Stdio::null());

        if let Some(log_path) = log {
            let log_file = std::fs::File::create(log_path)?;
            cmd.stdout(Stdio::from(log_file.try_clone()?))
                .stderr(Stdio::from(log_file));
        }

        tracing::debug!(program = %self.program, cwd = %cwd.display(), "spawning");
        cmd.status()
    }
}

impl std::fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Read the last `n` lines of a file.
///
/// Only the final 16KB are read, so huge build logs stay cheap.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn read_last_lines(path: &Path, n: usize) -> std::io::Result<String> {
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom};

    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let buffer = String::from_utf8_lossy(&bytes);

    // Seeked mid-file: drop the partial first line
    let content = if seek_pos > 0 {
        buffer.find('\n').map_or(&buffer[..], |idx| &buffer[idx + 1..])
    } else {
        &buffer[..]
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}
