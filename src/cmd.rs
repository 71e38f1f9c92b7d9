use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::error::{FsError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub code: i32,
    pub out: String,
    pub err: String,
}

impl CommandResult {
    /// Stdout split into lines, trailing newline dropped.
    pub fn out_lines(&self) -> Vec<&str> {
        self.out.lines().collect()
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub sudo: bool,
    pub timeout: Duration,
    /// Exit codes treated as success besides 0.
    pub accepted_codes: Vec<i32>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sudo: false,
            timeout: Duration::from_secs(30),
            accepted_codes: Vec::new(),
        }
    }
}

impl RunOptions {
    pub fn sudo() -> Self {
        Self {
            sudo: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn accept_codes(mut self, codes: &[i32]) -> Self {
        self.accepted_codes = codes.to_vec();
        self
    }
}

/// Run an external command and wait for it to finish. Timeout expiry is a
/// hard failure, never a retry trigger.
pub async fn run(
    program: &str,
    args: &[&str],
    dir: Option<&Path>,
    options: &RunOptions,
) -> Result<CommandResult> {
    let (program, args) = if options.sudo {
        let mut sudo_args = vec![program];
        sudo_args.extend_from_slice(args);
        ("sudo", sudo_args)
    } else {
        (program, args.to_vec())
    };

    let cmd_line = format!("{program} {}", args.join(" "));
    tracing::debug!("running command: {}", cmd_line);

    let mut command = Command::new(program);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true); // Ensure process is killed when dropped
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    let child = command.spawn().map_err(|e| {
        FsError::filesystem_io(format!("failed to spawn command '{cmd_line}'"), e)
    })?;

    let output = tokio::time::timeout(options.timeout, child.wait_with_output())
        .await
        .map_err(|_| FsError::ProcessTimeout {
            command: cmd_line.clone(),
            seconds: options.timeout.as_secs(),
        })?
        .map_err(|e| FsError::filesystem_io(format!("command '{cmd_line}' failed"), e))?;

    let code = output.status.code().unwrap_or(1);
    let out = String::from_utf8_lossy(&output.stdout).to_string();
    let err = String::from_utf8_lossy(&output.stderr).to_string();

    if code != 0 && !options.accepted_codes.contains(&code) {
        return Err(FsError::ProcessFailed {
            command: cmd_line,
            code,
            stderr: err,
        });
    }

    Ok(CommandResult { code, out, err })
}
