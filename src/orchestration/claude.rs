//! Claude Code headless executor.
//!
//! The `ClaudeHeadless` struct provides programmatic execution of Claude Code
//! in headless mode (`-p` flag) with JSON output parsing. Both the
//! decomposition step and the real agent worker drive Claude through it.

use crate::config::Config;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default timeout for Claude execution (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// The result type from a Claude execution.
///
/// Represents either a successful completion with output text,
/// or an error with an error message.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultType {
    /// Successful execution with output.
    Success {
        /// The text output from Claude.
        output: String,
    },
    /// Failed execution with error message.
    Error {
        /// The error message describing what went wrong.
        message: String,
    },
}

/// Response from a Claude headless execution.
///
/// Contains the session ID (for potential continuation), the result
/// (success or error), and optional cost information.
#[derive(Debug, Clone)]
pub struct ClaudeResponse {
    /// Session ID for potential continuation (if available).
    pub session_id: Option<String>,
    /// The result of the execution.
    pub result: ResultType,
    /// Cost in USD (if available).
    pub cost_usd: Option<f64>,
    /// Duration in milliseconds (if available).
    pub duration_ms: Option<u64>,
    /// Number of turns/iterations (if available).
    pub num_turns: Option<u32>,
}

impl ClaudeResponse {
    /// Check if the response indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self.result, ResultType::Success { .. })
    }

    /// Get the output text if successful.
    pub fn output(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { output } => Some(output),
            ResultType::Error { .. } => None,
        }
    }

    /// Get the error message if failed.
    pub fn error_message(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { .. } => None,
            ResultType::Error { message } => Some(message),
        }
    }
}

/// Internal struct for deserializing Claude JSON response.
#[derive(Debug, Deserialize)]
struct RawClaudeResponse {
    /// The response type (currently unused but kept for future extensibility).
    #[serde(rename = "type")]
    #[allow(dead_code)]
    response_type: Option<String>,
    subtype: Option<String>,
    result: Option<String>,
    session_id: Option<String>,
    total_cost_usd: Option<f64>,
    duration_ms: Option<u64>,
    num_turns: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

/// Claude Code headless executor.
///
/// Executes Claude Code in non-interactive mode using the `-p` flag with
/// JSON output format. Parses the response and returns structured results.
///
/// # Example
///
/// ```ignore
/// use hive::orchestration::ClaudeHeadless;
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
///
/// let claude = ClaudeHeadless::new()?;
/// let response = claude
///     .execute("Explain this code", Path::new("."), &CancellationToken::new())
///     .await?;
///
/// if response.is_success() {
///     println!("Output: {}", response.output().unwrap());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ClaudeHeadless {
    /// The agent command: binary plus fixed leading arguments.
    command: Vec<String>,
    /// Output format (always "json").
    output_format: String,
    /// Timeout for execution.
    timeout: Duration,
}

impl ClaudeHeadless {
    /// Create a new ClaudeHeadless executor.
    ///
    /// Resolves the agent command from the user configuration (default
    /// `claude`) and verifies the binary exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent binary cannot be found.
    pub fn new() -> Result<Self> {
        Self::from_config(&Config::load()?)
    }

    /// Create an executor from an explicit configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let command: Vec<String> = config
            .effective_command()
            .split_whitespace()
            .map(String::from)
            .collect();
        let binary = command
            .first()
            .cloned()
            .unwrap_or_else(|| "claude".to_string());
        which::which(&binary).map_err(|_| Error::AgentBinaryNotFound(binary))?;
        Ok(Self {
            command,
            output_format: "json".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Create an executor with a specific binary path.
    ///
    /// Useful for testing or when the agent is installed in a non-standard
    /// location. The binary is not existence-checked.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            command: vec![binary.to_string_lossy().to_string()],
            output_format: "json".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Set a custom timeout for execution.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the binary path.
    pub fn binary(&self) -> &str {
        self.command.first().map(|s| s.as_str()).unwrap_or("claude")
    }

    /// Get the output format.
    pub fn output_format(&self) -> &str {
        &self.output_format
    }

    /// Get the timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute a prompt in Claude headless mode.
    ///
    /// Runs Claude with the given prompt in the specified working directory,
    /// parses the JSON output, and returns a structured response. The child
    /// process is killed if the cancellation token fires or the timeout
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to spawn, times out, or is
    /// cancelled.
    pub async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<ClaudeResponse> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut cmd = Command::new(self.binary());
        for arg in self.command.iter().skip(1) {
            cmd.arg(arg);
        }
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg(&self.output_format)
            .current_dir(cwd)
            .kill_on_drop(true);

        let output = tokio::select! {
            output = tokio::time::timeout(self.timeout, cmd.output()) => {
                output
                    .map_err(|_| Error::Timeout(self.timeout))?
                    .map_err(Error::Io)?
            }
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // Try to parse JSON response
        if let Ok(response) = Self::parse_json_response(&stdout) {
            return Ok(response);
        }

        // If JSON parsing failed, check exit code
        if !output.status.success() {
            let error_msg = if stderr.is_empty() {
                format!(
                    "Claude execution failed with exit code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };

            return Ok(ClaudeResponse {
                session_id: None,
                result: ResultType::Error { message: error_msg },
                cost_usd: None,
                duration_ms: None,
                num_turns: None,
            });
        }

        // Non-JSON success output (shouldn't happen with --output-format json)
        Ok(ClaudeResponse {
            session_id: None,
            result: ResultType::Success {
                output: stdout.trim().to_string(),
            },
            cost_usd: None,
            duration_ms: None,
            num_turns: None,
        })
    }

    /// Parse a JSON response from Claude.
    pub fn parse_json_response(json_str: &str) -> Result<ClaudeResponse> {
        let raw: RawClaudeResponse = serde_json::from_str(json_str)?;

        let result = match raw.subtype.as_deref() {
            Some("success") => ResultType::Success {
                output: raw.result.unwrap_or_default(),
            },
            Some("error") => ResultType::Error {
                message: raw.error.or(raw.result).unwrap_or_default(),
            },
            _ => {
                // If no subtype, check if we have a result or error
                if let Some(error) = raw.error {
                    ResultType::Error { message: error }
                } else if let Some(result) = raw.result {
                    ResultType::Success { output: result }
                } else {
                    ResultType::Error {
                        message: "Unknown response format".to_string(),
                    }
                }
            }
        };

        Ok(ClaudeResponse {
            session_id: raw.session_id,
            result,
            cost_usd: raw.total_cost_usd,
            duration_ms: raw.duration_ms,
            num_turns: raw.num_turns,
        })
    }
}
