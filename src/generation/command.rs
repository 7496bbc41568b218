//! CK-009: Local command backend — prompt on stdin, reply on stdout.

use super::{Generation, GenerationService};
use crate::core::config::GenerationConfig;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct CommandGenerationService {
    program: String,
    args: Vec<String>,
}

impl CommandGenerationService {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self, String> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| "generation.command is empty".to_string())?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }
}

#[async_trait]
impl GenerationService for CommandGenerationService {
    fn name(&self) -> &str {
        "command"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.program, e))?;

        // Feed stdin while draining stdout so large replies cannot stall the pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| format!("wait error: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }

        // A command that exits cleanly without reading all of stdin is fine.
        if let Err(e) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(format!("stdin write error: {}", e));
            }
        }

        Ok(Generation::text(
            String::from_utf8_lossy(&output.stdout).to_string(),
        ))
    }
}
