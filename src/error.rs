//! Error types for XML-CLI sessions and the configuration workflow.
//!
//! Every failure the device can report, every transport failure, and every
//! locally detected precondition violation ends up as one [`XrError`] variant.

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur while driving an IOS-XR XML-CLI session.
#[derive(Error, Debug)]
pub enum XrError {
    /// No expected pattern was seen before the deadline.
    ///
    /// Carries the output buffered so far, for diagnosis.
    #[error("timed out waiting for device output: {0}")]
    Timeout(String),

    /// The session stream ended while a prompt or reply was expected.
    ///
    /// Carries whatever the device sent before the stream closed.
    #[error("session ended unexpectedly: {0}")]
    Eof(String),

    /// The device reported an error, either as a structured XML error
    /// (`ErrorCode`/`ErrorMsg` attributes) or as a plain `ERROR: 0x...` line.
    ///
    /// Covers lock contention, commit validation failures and an XML agent
    /// that is not running. `code` is empty when the device supplied none.
    #[error("XML-CLI error {code}: {message}")]
    XmlCli { code: String, message: String },

    /// The device rejected malformed CLI input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A configuration operation was attempted from a state where it is not legal.
    ///
    /// Raised before any exchange is sent to the device.
    #[error("{operation} is not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Candidate content could not be obtained.
    #[error("candidate configuration error: {0}")]
    Content(String),

    /// The session has not been opened yet.
    #[error("session is not open")]
    NotOpen,

    /// The session was closed and cannot be reused.
    #[error("session closed")]
    SessionClosed,

    /// The device kept asking for a password.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Fetching the continuation of an iterated reply failed.
    #[error("iterator error: {0}")]
    IteratorId(String),

    /// A prompt or marker pattern failed to compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Local I/O failed (candidate files, transcript sink).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to hand data to the shell I/O task.
    #[error("failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),

    #[error("internal error: {0}")]
    InternalServerError(String),

    /// Offline replay found no recorded exchange for a request.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),
}

impl XrError {
    /// True for failures that leave the underlying stream unusable.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            XrError::Timeout(_) | XrError::Eof(_) | XrError::SendDataError(_)
        )
    }
}
