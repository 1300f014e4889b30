//! `bash` tool: execute a shell command, streaming combined stdout/stderr to
//! a per-command log file. Expiry kills the process and records a sentinel
//! marker in the log.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::traits::{Tool, ToolResult};

const PREVIEW_CHARS: usize = 500;
const TIMEOUT_MARKER: &str = "\n[TIMEOUT - process killed]\n";

pub struct BashTool {
    cwd: PathBuf,
    log_dir: PathBuf,
}

impl BashTool {
    pub fn new(cwd: PathBuf, log_dir: PathBuf) -> Self {
        Self { cwd, log_dir }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute shell command. Output streamed to file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 300)",
                    "default": 300
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'command'")?
            .to_string();
        let timeout = args.get("timeout").and_then(Value::as_u64).unwrap_or(300);

        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            return Ok(ToolResult::err(e.to_string()));
        }
        let cmd_id = uuid::Uuid::new_v4().to_string();
        let log_path = self.log_dir.join(format!("cmd_{}.txt", &cmd_id[..8]));

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::err(format!("failed to spawn process: {e}"))),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut log_file = match tokio::fs::File::create(&log_path).await {
            Ok(f) => f,
            Err(e) => return Ok(ToolResult::err(e.to_string())),
        };

        let mut output = String::new();
        let mut timed_out = false;

        // Interleave both pipes line-by-line into the log.
        let stream = async {
            let mut out_lines = stdout.map(|s| BufReader::new(s).lines());
            let mut err_lines = stderr.map(|s| BufReader::new(s).lines());
            let mut out_open = out_lines.is_some();
            let mut err_open = err_lines.is_some();
            while out_open || err_open {
                tokio::select! {
                    line = async {
                        match out_lines.as_mut() {
                            Some(l) => l.next_line().await,
                            None => Ok(None),
                        }
                    }, if out_open => {
                        match line {
                            Ok(Some(l)) => {
                                output.push_str(&l);
                                output.push('\n');
                                let _ = log_file.write_all(l.as_bytes()).await;
                                let _ = log_file.write_all(b"\n").await;
                            }
                            _ => out_open = false,
                        }
                    }
                    line = async {
                        match err_lines.as_mut() {
                            Some(l) => l.next_line().await,
                            None => Ok(None),
                        }
                    }, if err_open => {
                        match line {
                            Ok(Some(l)) => {
                                output.push_str(&l);
                                output.push('\n');
                                let _ = log_file.write_all(l.as_bytes()).await;
                                let _ = log_file.write_all(b"\n").await;
                            }
                            _ => err_open = false,
                        }
                    }
                }
            }
        };

        if tokio::time::timeout(Duration::from_secs(timeout), stream)
            .await
            .is_err()
        {
            timed_out = true;
            let _ = child.kill().await;
            output.push_str(TIMEOUT_MARKER);
            let _ = log_file.write_all(TIMEOUT_MARKER.as_bytes()).await;
        }

        let exit_code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => return Ok(ToolResult::err(format!("failed to wait for process: {e}"))),
        };
        let _ = log_file.flush().await;

        let preview: String = output.chars().take(PREVIEW_CHARS).collect();
        let truncated = output.chars().count() > PREVIEW_CHARS;

        let value = json!({
            "exit_code": exit_code,
            "output_file": log_path.display().to_string(),
            "output_preview": preview,
            "truncated": truncated,
            "timed_out": timed_out,
        });
        if exit_code == 0 && !timed_out {
            Ok(ToolResult::ok(value))
        } else {
            Ok(ToolResult {
                value,
                success: false,
            })
        }
    }
}
