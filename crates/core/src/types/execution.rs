use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

// =============================================================================
// Language
// =============================================================================

/// Language of an execution payload.
///
/// Selects the interpreter invoked inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Language {
    /// `python -c <code>`
    #[default]
    Python,
    /// `bash -c <code>`
    Bash,
    /// `sh -c <code>`
    Sh,
    /// `node -e <code>`
    Node,
}

impl Language {
    /// All supported languages.
    pub const ALL: [Language; 4] = [Self::Python, Self::Bash, Self::Sh, Self::Node];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Bash => "bash",
            Self::Sh => "sh",
            Self::Node => "node",
        }
    }

    /// Interpreter argv prefix; the payload is appended as one final argument.
    pub fn invocation(&self) -> [&'static str; 2] {
        match self {
            Self::Python => ["python", "-c"],
            Self::Bash => ["bash", "-c"],
            Self::Sh => ["sh", "-c"],
            Self::Node => ["node", "-e"],
        }
    }

    /// Build the full argv for running `code`.
    pub fn command(&self, code: &str) -> Vec<String> {
        let [program, flag] = self.invocation();
        vec![program.to_string(), flag.to_string(), code.to_string()]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Self::Python),
            "bash" => Ok(Self::Bash),
            "sh" | "shell" => Ok(Self::Sh),
            "node" | "javascript" | "js" => Ok(Self::Node),
            other => Err(Error::invalid_request(format!(
                "Unsupported language: {}. Supported: python, bash, sh, node, javascript",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Language {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

// =============================================================================
// Execution Request
// =============================================================================

/// A payload to run inside a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source text to run.
    pub code: String,
    /// Interpreter selection.
    #[serde(default)]
    pub language: Language,
}

impl ExecutionRequest {
    /// Create a new request.
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
        }
    }

    /// Reject payloads that are empty after trimming.
    ///
    /// Called before any sandbox is acquired.
    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(Error::invalid_request("No code provided"));
        }
        Ok(())
    }
}

// =============================================================================
// Execution Result
// =============================================================================

/// Infrastructure-level failure attached to an execution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    EnvironmentFailure,
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::EnvironmentFailure => "environment_failure",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

/// Outcome of one execution attempt.
///
/// `exit_code` reports what the payload did; `error` reports what the
/// infrastructure did. A completed attempt carries exactly one of an exit code
/// or a timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub error: Option<ErrorKind>,
    /// Human-readable infrastructure message, present iff `error` is.
    pub message: Option<String>,
    /// Whether stdout or stderr was cut at the output limit.
    pub truncated: bool,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// A payload that ran to completion.
    pub fn completed(stdout: String, stderr: String, exit_code: i64) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: Some(exit_code),
            error: None,
            message: None,
            truncated: false,
            duration_ms: 0,
        }
    }

    /// A payload killed at the wall-clock bound. Partial output is kept.
    pub fn timed_out(stdout: String, stderr: String, timeout_ms: u64) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: None,
            error: Some(ErrorKind::Timeout),
            message: Some(format!("Execution timed out after {}ms", timeout_ms)),
            truncated: false,
            duration_ms: 0,
        }
    }

    /// The sandbox itself failed while running the payload.
    pub fn environment_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: Some(ErrorKind::EnvironmentFailure),
            message: Some(message.into()),
            truncated: false,
            duration_ms: 0,
        }
    }

    /// Exit code 0 and no infrastructure error.
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }

    pub fn timed_out_flag(&self) -> bool {
        self.error == Some(ErrorKind::Timeout)
    }

    /// Label used for metrics and logs.
    pub fn outcome_label(&self) -> &'static str {
        match (self.error, self.exit_code) {
            (Some(kind), _) => kind.as_str(),
            (None, Some(0)) => "success",
            (None, _) => "nonzero_exit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_aliases() {
        assert_eq!("javascript".parse::<Language>().unwrap(), Language::Node);
        assert_eq!("JS".parse::<Language>().unwrap(), Language::Node);
        assert_eq!(" Python ".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("sh".parse::<Language>().unwrap(), Language::Sh);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_command_keeps_code_as_single_arg() {
        let cmd = Language::Bash.command("echo 'a b' && rm -rf x");
        assert_eq!(cmd, vec!["bash", "-c", "echo 'a b' && rm -rf x"]);
    }

    #[test]
    fn test_request_deserialize_defaults_to_python() {
        let req: ExecutionRequest = serde_json::from_str(r#"{"code": "print(1)"}"#).unwrap();
        assert_eq!(req.language, Language::Python);

        let req: ExecutionRequest =
            serde_json::from_str(r#"{"code": "1", "language": "javascript"}"#).unwrap();
        assert_eq!(req.language, Language::Node);

        let bad = serde_json::from_str::<ExecutionRequest>(r#"{"code": "1", "language": "ruby"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_validate_rejects_blank_code() {
        assert!(ExecutionRequest::new("", Language::Python).validate().is_err());
        assert!(ExecutionRequest::new(" \n\t ", Language::Sh).validate().is_err());
        assert!(ExecutionRequest::new("print(1)", Language::Python)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_result_invariants() {
        let ok = ExecutionResult::completed("hi".into(), String::new(), 0);
        assert!(ok.success());
        assert_eq!(ok.outcome_label(), "success");

        let failed = ExecutionResult::completed(String::new(), "boom".into(), 2);
        assert!(!failed.success());
        assert_eq!(failed.outcome_label(), "nonzero_exit");

        let timeout = ExecutionResult::timed_out("partial".into(), String::new(), 1000);
        assert!(timeout.exit_code.is_none());
        assert!(timeout.timed_out_flag());
        assert_eq!(timeout.outcome_label(), "timeout");
    }
}
