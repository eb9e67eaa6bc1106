//! Prompt and marker recognition for the XR terminal stream.
//!
//! A [`PromptSet`] is an ordered list of `(pattern, state)` pairs. Waiting on
//! it through a [`Transport`] yields the state of the pattern that matched
//! first, or a typed timeout / end-of-stream failure carrying the buffered
//! output. Session lifecycle code is written entirely in terms of these sets.

use std::time::Duration;

use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::XrError;
use crate::session::{ExpectOutcome, Transport};

/// Host authenticity confirmation from an interactive ssh client.
pub const HOST_KEY_PROMPT: &str = r"\(yes/no(/\[fingerprint\])?\)\?\s*$";
/// Password request during login.
pub const PASSWORD_PROMPT: &str = r"(?i)password:\s*$";
/// Exec-mode shell prompt, e.g. `RP/0/RSP0/CPU0:edge1#`.
pub const SHELL_PROMPT: &str = r"(?m)^[^\s#]+#\s*$";
/// Login rejected outright.
pub const LOGIN_DENIED: &str = r"(?i)(permission denied|authentication failed|% bad passwords)";
/// XML-CLI sub-shell prompt.
pub const XML_PROMPT: &str = r"XML>\s*$";
/// Plain CLI error line, e.g. `ERROR: 0x24319600 'XML-TTY' detected ...`.
pub const CLI_ERROR_LINE: &str = r"ERROR: 0x[0-9a-fA-F]+[^\r\n]*";
/// Closing tag of an XML-CLI reply.
pub const RESPONSE_END: &str = r"</Response>";

/// States reachable while logging in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPrompt {
    HostKey,
    Password,
    Shell,
    Denied,
}

/// Outcome of the `xml` mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlModePrompt {
    Ready,
    Unavailable,
}

/// End of one XML-CLI exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMarker {
    Response,
    CliError,
}

/// An ordered set of patterns, each bound to the state it signals.
#[derive(Debug, Clone)]
pub struct PromptSet<S> {
    patterns: Vec<Regex>,
    states: Vec<S>,
}

impl<S: Copy + std::fmt::Debug> PromptSet<S> {
    /// Compiles the pairs in order. Earlier pairs win ties.
    pub fn new<P: AsRef<str>>(pairs: Vec<(P, S)>) -> Result<Self, XrError> {
        let mut patterns = Vec::with_capacity(pairs.len());
        let mut states = Vec::with_capacity(pairs.len());
        for (pattern, state) in pairs {
            let regex = Regex::new(pattern.as_ref()).map_err(|err| {
                XrError::InvalidPattern(format!(
                    "pattern for {:?} '{}': {}",
                    state,
                    pattern.as_ref(),
                    err
                ))
            })?;
            patterns.push(regex);
            states.push(state);
        }
        if patterns.is_empty() {
            return Err(XrError::InvalidPattern("prompt set is empty".to_string()));
        }
        Ok(Self { patterns, states })
    }

    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    /// State bound to a pattern index.
    pub fn state(&self, index: usize) -> Option<S> {
        self.states.get(index).copied()
    }

    /// Waits until one of the patterns appears on the transport.
    ///
    /// Timeout and end-of-stream become [`XrError::Timeout`] and
    /// [`XrError::Eof`] carrying the transport's last output.
    pub async fn wait(&self, transport: &mut dyn Transport, timeout: Duration) -> Result<S, XrError> {
        match transport.expect(&self.patterns, timeout).await? {
            ExpectOutcome::Matched(index) => {
                let state = self.state(index).ok_or_else(|| {
                    XrError::InternalServerError(format!(
                        "transport matched unknown pattern index {index}"
                    ))
                })?;
                trace!("Matched {:?}", state);
                Ok(state)
            }
            ExpectOutcome::Timeout => Err(XrError::Timeout(transport.last_output().to_string())),
            ExpectOutcome::Eof => Err(XrError::Eof(transport.last_output().to_string())),
        }
    }
}

fn builtin<S: Copy + std::fmt::Debug>(name: &str, pairs: Vec<(&str, S)>) -> PromptSet<S> {
    match PromptSet::new(pairs) {
        Ok(set) => set,
        Err(err) => panic!("invalid built-in prompt set {name}: {err}"),
    }
}

/// Login sequence: host key confirmation, password, shell prompt or rejection.
pub static LOGIN_PROMPTS: Lazy<PromptSet<LoginPrompt>> = Lazy::new(|| {
    builtin(
        "LOGIN_PROMPTS",
        vec![
            (HOST_KEY_PROMPT, LoginPrompt::HostKey),
            (PASSWORD_PROMPT, LoginPrompt::Password),
            (SHELL_PROMPT, LoginPrompt::Shell),
            (LOGIN_DENIED, LoginPrompt::Denied),
        ],
    )
});

/// Reply to the `xml` command.
pub static XML_MODE_PROMPTS: Lazy<PromptSet<XmlModePrompt>> = Lazy::new(|| {
    builtin(
        "XML_MODE_PROMPTS",
        vec![
            (XML_PROMPT, XmlModePrompt::Ready),
            (CLI_ERROR_LINE, XmlModePrompt::Unavailable),
        ],
    )
});

/// End of an exchange: a complete reply or a plain error line.
pub static REPLY_MARKERS: Lazy<PromptSet<ReplyMarker>> = Lazy::new(|| {
    builtin(
        "REPLY_MARKERS",
        vec![
            (RESPONSE_END, ReplyMarker::Response),
            (CLI_ERROR_LINE, ReplyMarker::CliError),
        ],
    )
});

/// The XML prompt that follows every reply.
pub static XML_READY: Lazy<PromptSet<XmlModePrompt>> =
    Lazy::new(|| builtin("XML_READY", vec![(XML_PROMPT, XmlModePrompt::Ready)]));

/// Finds the earliest match of any pattern in `haystack`.
///
/// Returns `(pattern_index, match_end)`. When two patterns match at the same
/// position the lower index wins.
pub fn earliest_match(haystack: &str, patterns: &[Regex]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, usize)> = None;
    for (index, regex) in patterns.iter().enumerate() {
        if let Some(m) = regex.find(haystack) {
            let better = match best {
                Some((_, start, _)) => m.start() < start,
                None => true,
            };
            if better {
                best = Some((index, m.start(), m.end()));
            }
        }
    }
    best.map(|(index, _, end)| (index, end))
}
