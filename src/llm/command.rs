//! Command-line provider: one external process per call
//!
//! The process receives a single JSON request on stdin,
//! `{"model": ..., "prompt": ..., "images": [{"page": .., "path": ..}]}`,
//! and must print the model's response text on stdout. A non-zero exit
//! status is a failed call. The child is killed when the call is dropped,
//! so the client timeout also ends the process.

use super::{PageImage, Provider, ServiceError};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Serialize)]
struct CommandRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: &'a [PageImage],
}

/// Runs a configured program for every call.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Build from `[program, args...]`, as stored in `service.command`.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).with_args(args.iter().cloned()))
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Provider for CommandProvider {
    fn name(&self) -> &str {
        &self.program
    }

    async fn analyze(
        &self,
        model: &str,
        prompt: &str,
        images: &[PageImage],
    ) -> Result<String, ServiceError> {
        let failed = |message: String| ServiceError::CallFailed {
            model: model.to_string(),
            message,
        };

        let request = serde_json::to_vec(&CommandRequest {
            model,
            prompt,
            images,
        })
        .map_err(|e| failed(format!("failed to encode request: {}", e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ServiceError::Unavailable(format!("failed to start '{}': {}", self.program, e))
        })?;

        // Stdin is written while stdout and stderr drain
        let stdin = child.stdin.take();
        let write = async move {
            match stdin {
                Some(mut stdin) => {
                    stdin.write_all(&request).await?;
                    // Dropping stdin closes the pipe so the child sees EOF
                    drop(stdin);
                    Ok::<(), std::io::Error>(())
                }
                None => Ok(()),
            }
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| failed(format!("failed to read response: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "exited with {}: {}",
                output.status,
                crate::response::snippet(stderr.trim())
            )));
        }

        match written {
            // A child that answers without reading its whole input is fine
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                return Err(failed(format!("failed to write request: {}", e)));
            }
            _ => {}
        }

        String::from_utf8(output.stdout).map_err(|e| failed(format!("response is not UTF-8: {}", e)))
    }
}
