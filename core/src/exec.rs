//! Exec types for synchronous in-container command execution.
//!
//! Shared between the runtime delegates that run commands and the
//! adapter that shapes them into `ExecSync` responses.

use thiserror::Error;

/// Output from a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured stdout bytes.
    pub stdout: Vec<u8>,
    /// Captured stderr bytes.
    pub stderr: Vec<u8>,
}

/// A command that started but exited with a non-zero status.
///
/// Carries whatever output was captured before the process exited.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("command exited with status {code}")]
pub struct ExitError {
    /// Process exit status.
    pub code: i32,
    /// Captured stdout bytes.
    pub stdout: Vec<u8>,
    /// Captured stderr bytes.
    pub stderr: Vec<u8>,
}

impl ExitError {
    /// Exit error with no captured output.
    pub fn with_code(code: i32) -> Self {
        Self {
            code,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}
