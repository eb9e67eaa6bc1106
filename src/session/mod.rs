//! IOS-XR XML-CLI sessions.
//!
//! This module drives one interactive terminal session per device: login,
//! the switch into the `xml` sub-shell, strictly half-duplex request/reply
//! exchanges, and the lock / candidate / commit workflow layered on top.
//!
//! # Main Components
//!
//! - [`XrSession`] - One device session with its configuration state machine
//! - [`Transport`] / [`Connector`] - The terminal stream capability a session consumes
//! - [`ChannelTransport`] - Buffered pattern waiter over a pair of channels
//! - [`SshConnector`] - Default connector opening an SSH shell channel
//! - [`SessionRecorder`] / [`SessionReplayer`] - Exchange recording and offline replay

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use async_trait::async_trait;
use log::{debug, trace, warn};
use regex::Regex;
use russh::{ChannelMsg, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

use crate::classify;
use crate::config::{self, DeviceConfig, LogTarget};
use crate::error::XrError;
use crate::prompt::{
    LOGIN_PROMPTS, LoginPrompt, PromptSet, REPLY_MARKERS, ReplyMarker, XML_MODE_PROMPTS,
    XML_READY, XmlModePrompt, earliest_match,
};

pub use recording::{
    NormalizeOptions, RecordedExchange, ReplayContext, SessionEvent, SessionRecordEntry,
    SessionRecordLevel, SessionRecorder, SessionReplayer,
};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use ssh::SshConnector;
pub use transcript::Transcript;
pub use transport::ChannelTransport;
pub use workflow::{CommitOptions, ConfigOp};

/// Result of waiting for a set of patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectOutcome {
    /// Index of the pattern that matched first.
    Matched(usize),
    Timeout,
    Eof,
}

/// An open interactive terminal stream to a device.
///
/// Implementations buffer device output; `expect` consumes it up to the end
/// of the first match.
#[async_trait]
pub trait Transport: Send {
    /// Sends `text` followed by a newline.
    async fn send_line(&mut self, text: &str) -> Result<(), XrError>;

    /// Waits until one of `patterns` appears in the output, the timeout
    /// elapses, or the stream ends.
    async fn expect(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<ExpectOutcome, XrError>;

    /// Output consumed by the last `expect`, or everything buffered when it
    /// timed out or hit end-of-stream.
    fn last_output(&self) -> &str;

    /// Drops any output that arrived outside an exchange.
    fn discard_pending(&mut self) {}

    /// Ends the stream. Further calls must be harmless.
    async fn terminate(&mut self) -> Result<(), XrError>;
}

/// Opens transports to a device.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn spawn(&self, config: &DeviceConfig) -> Result<Box<dyn Transport>, XrError>;
}

/// Lifecycle of a session object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Constructed, or a previous `open` failed.
    Idle,
    Open,
    /// Closed for good.
    Closed,
}

/// Which shell the terminal is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    Raw,
    Xml,
}

/// Configuration workflow state, mirroring what the device is believed to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfigState {
    Unlocked,
    Locked,
    CandidateStaged,
    Committed,
    Discarded,
}

impl fmt::Display for ConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigState::Unlocked => "unlocked",
            ConfigState::Locked => "locked",
            ConfigState::CandidateStaged => "candidate_staged",
            ConfigState::Committed => "committed",
            ConfigState::Discarded => "discarded",
        };
        f.write_str(name)
    }
}

/// Where a staged candidate came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    File(PathBuf),
    Inline,
}

/// The configuration text currently staged on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source: CandidateSource,
    pub content: String,
}

/// Raw output of one logical RPC, one entry per reply chunk.
///
/// Iterated replies contribute one chunk per `GetNext` round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcReply {
    pub chunks: Vec<String>,
}

impl RpcReply {
    /// The `<Response>` documents of all chunks, echo removed, newline separated.
    pub fn raw(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| {
                classify::response_body(chunk)
                    .unwrap_or_else(|| classify::strip_echo(chunk).trim())
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Concatenated CLI payload of all chunks, or `None` when no chunk had one.
    pub fn cli_text(&self) -> Option<String> {
        let mut text = None::<String>;
        for chunk in &self.chunks {
            if let Some(payload) = classify::cli_payload(chunk) {
                text.get_or_insert_with(String::new).push_str(&payload);
            }
        }
        text
    }
}

/// One configuration session with an IOS-XR device.
///
/// Every operation takes `&mut self`, so at most one exchange is ever in
/// flight. Independent sessions share nothing.
pub struct XrSession {
    config: DeviceConfig,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    status: SessionStatus,
    mode: ShellMode,
    state: ConfigState,
    candidate: Option<Candidate>,
    transcript: Transcript,
    recorder: Option<SessionRecorder>,
}

mod client;
mod recording;
mod security;
mod ssh;
mod transcript;
mod transport;
mod workflow;
