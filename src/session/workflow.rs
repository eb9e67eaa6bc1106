use super::*;

/// Longest commit comment the device accepts.
pub const MAX_COMMENT_LEN: usize = 60;
/// Allowed range for a confirmed commit timeout, in seconds.
pub const CONFIRMED_RANGE: std::ops::RangeInclusive<u32> = 30..=300;

/// Configuration workflow operations, used for precondition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOp {
    Lock,
    Unlock,
    LoadCandidate,
    Compare,
    CompareReplace,
    Commit,
    CommitReplace,
    Discard,
    Rollback,
}

impl ConfigOp {
    pub fn name(self) -> &'static str {
        match self {
            ConfigOp::Lock => "lock",
            ConfigOp::Unlock => "unlock",
            ConfigOp::LoadCandidate => "load_candidate_config",
            ConfigOp::Compare => "compare_config",
            ConfigOp::CompareReplace => "compare_replace_config",
            ConfigOp::Commit => "commit_config",
            ConfigOp::CommitReplace => "commit_replace_config",
            ConfigOp::Discard => "discard_config",
            ConfigOp::Rollback => "rollback",
        }
    }
}

impl ConfigState {
    /// Whether this session believes it holds the device lock.
    pub fn lock_held(self) -> bool {
        !matches!(self, ConfigState::Unlocked)
    }

    /// Whether `op` may be attempted from this state.
    pub fn permits(self, op: ConfigOp) -> bool {
        match op {
            ConfigOp::Lock | ConfigOp::Unlock => true,
            ConfigOp::LoadCandidate | ConfigOp::Rollback => self.lock_held(),
            ConfigOp::Compare
            | ConfigOp::CompareReplace
            | ConfigOp::Commit
            | ConfigOp::CommitReplace
            | ConfigOp::Discard => self == ConfigState::CandidateStaged,
        }
    }

    /// State after `op` succeeded on the device.
    pub fn after(self, op: ConfigOp) -> ConfigState {
        match op {
            ConfigOp::Lock => {
                if self.lock_held() {
                    self
                } else {
                    ConfigState::Locked
                }
            }
            ConfigOp::Unlock => ConfigState::Unlocked,
            ConfigOp::LoadCandidate => ConfigState::CandidateStaged,
            ConfigOp::Compare | ConfigOp::CompareReplace | ConfigOp::Rollback => self,
            ConfigOp::Commit | ConfigOp::CommitReplace => ConfigState::Committed,
            ConfigOp::Discard => ConfigState::Discarded,
        }
    }
}

/// Optional parameters of a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOptions {
    pub label: Option<String>,
    /// Truncated to 60 characters on the wire.
    pub comment: Option<String>,
    /// Seconds the device waits for a confirming commit before reverting.
    pub confirmed: Option<u32>,
}

impl CommitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_confirmed(mut self, seconds: u32) -> Self {
        self.confirmed = Some(seconds);
        self
    }

    /// Builds the `<Commit .../>` request body.
    pub fn to_request(&self, replace: bool) -> Result<String, XrError> {
        let mut request = String::from("<Commit");
        if let Some(label) = self.label.as_deref() {
            request.push_str(&format!(r#" Label="{}""#, classify::escape_xml(label)));
        }
        if let Some(comment) = self.comment.as_deref() {
            let comment: String = comment.chars().take(MAX_COMMENT_LEN).collect();
            request.push_str(&format!(r#" Comment="{}""#, classify::escape_xml(&comment)));
        }
        if let Some(seconds) = self.confirmed {
            if !CONFIRMED_RANGE.contains(&seconds) {
                return Err(XrError::InvalidInput(format!(
                    "confirmed commit timeout must be between {} and {} seconds, got {}",
                    CONFIRMED_RANGE.start(),
                    CONFIRMED_RANGE.end(),
                    seconds
                )));
            }
            request.push_str(&format!(r#" Confirmed="{seconds}""#));
        }
        if replace {
            request.push_str(r#" Replace="true""#);
        }
        request.push_str("/>");
        Ok(request)
    }
}

const LOCK_REQUEST: &str = "<Lock/>";
const UNLOCK_REQUEST: &str = "<Unlock/>";
const DIFF_COMMAND: &str = "show configuration changes diff";
const TARGET_COMMAND: &str = "show configuration";
const CLEAR_COMMAND: &str = "clear";

impl XrSession {
    pub fn config_state(&self) -> ConfigState {
        self.state
    }

    pub fn lock_held(&self) -> bool {
        self.status == SessionStatus::Open && self.state.lock_held()
    }

    /// The candidate currently staged on the device, if any.
    pub fn candidate(&self) -> Option<&Candidate> {
        self.candidate.as_ref()
    }

    /// Fails before any exchange when `op` is not legal right now.
    fn guard(&self, op: ConfigOp) -> Result<(), XrError> {
        match self.status {
            SessionStatus::Open => {}
            SessionStatus::Idle => return Err(XrError::NotOpen),
            SessionStatus::Closed => return Err(XrError::SessionClosed),
        }
        if self.state.permits(op) {
            Ok(())
        } else {
            Err(XrError::InvalidState {
                operation: op.name(),
                state: self.state.to_string(),
            })
        }
    }

    fn transition(&mut self, to: ConfigState) {
        if self.state == to {
            return;
        }
        debug!(
            "{} Config state {} -> {}",
            self.config.device_addr(),
            self.state,
            to
        );
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::StateChanged {
                from: self.state,
                to,
            });
        }
        self.state = to;
    }

    /// Acquires the device configuration lock.
    ///
    /// Does nothing if this session already holds it. When another session
    /// holds the lock the device rejects the request and the state stays
    /// `Unlocked`.
    pub async fn lock(&mut self) -> Result<(), XrError> {
        self.guard(ConfigOp::Lock)?;
        if self.state.lock_held() {
            return Ok(());
        }
        self.rpc(LOCK_REQUEST).await?;
        let next = self.state.after(ConfigOp::Lock);
        self.transition(next);
        Ok(())
    }

    /// Releases the device configuration lock. Does nothing if not held.
    pub async fn unlock(&mut self) -> Result<(), XrError> {
        self.guard(ConfigOp::Unlock)?;
        if !self.state.lock_held() {
            return Ok(());
        }
        self.rpc(UNLOCK_REQUEST).await?;
        self.candidate = None;
        self.transition(ConfigState::Unlocked);
        Ok(())
    }

    /// Stages a candidate configuration on the device.
    ///
    /// `filename` takes precedence over `config` when both are given. A
    /// previously staged candidate is cleared first, so the new text
    /// replaces it.
    pub async fn load_candidate_config(
        &mut self,
        filename: Option<&Path>,
        config: Option<&str>,
    ) -> Result<(), XrError> {
        self.guard(ConfigOp::LoadCandidate)?;

        let candidate = match (filename, config) {
            (Some(path), _) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    XrError::Content(format!("cannot read {}: {}", path.display(), e))
                })?;
                Candidate {
                    source: CandidateSource::File(path.to_path_buf()),
                    content,
                }
            }
            (None, Some(text)) => Candidate {
                source: CandidateSource::Inline,
                content: text.to_string(),
            },
            (None, None) => {
                return Err(XrError::Content(
                    "either a filename or a configuration string is required".to_string(),
                ));
            }
        };

        if self.state == ConfigState::CandidateStaged {
            self.rpc(&classify::config_command(CLEAR_COMMAND)).await?;
            self.candidate = None;
            self.transition(ConfigState::Locked);
        }

        if let Err(err) = self.rpc(&classify::config_command(&candidate.content)).await {
            // After a transport failure the connection is already gone.
            if err.is_transport_failure() {
                return Err(err);
            }
            if let Err(clear_err) = self.rpc(&classify::config_command(CLEAR_COMMAND)).await {
                warn!(
                    "{} Could not clear rejected candidate: {}",
                    self.config.device_addr(),
                    clear_err
                );
            }
            if self.is_open() {
                self.candidate = None;
                self.transition(ConfigState::Locked);
            }
            return Err(err);
        }

        if let Some(recorder) = self.recorder.as_ref() {
            let source = match &candidate.source {
                CandidateSource::File(path) => path.display().to_string(),
                CandidateSource::Inline => "inline".to_string(),
            };
            let _ = recorder.record_event(SessionEvent::CandidateStaged {
                source,
                bytes: candidate.content.len(),
                sha256: format!("{:x}", Sha256::digest(candidate.content.as_bytes())),
            });
        }
        self.candidate = Some(candidate);
        self.transition(ConfigState::CandidateStaged);
        Ok(())
    }

    /// Diff between the running configuration and the staged candidate,
    /// exactly as the device reports it.
    pub async fn compare_config(&mut self) -> Result<String, XrError> {
        self.guard(ConfigOp::Compare)?;
        self.target_text(DIFF_COMMAND).await
    }

    /// The full target configuration a replace commit would install.
    pub async fn compare_replace_config(&mut self) -> Result<String, XrError> {
        self.guard(ConfigOp::CompareReplace)?;
        self.target_text(TARGET_COMMAND).await
    }

    async fn target_text(&mut self, command: &str) -> Result<String, XrError> {
        let raw = self.rpc(&classify::config_command(command)).await?;
        classify::cli_payload(&raw).ok_or_else(|| {
            XrError::InternalServerError(format!("reply to '{command}' has no CLI payload"))
        })
    }

    /// Applies the staged candidate.
    ///
    /// On rejection the candidate stays staged and the device error is
    /// returned unchanged.
    pub async fn commit_config(&mut self, options: &CommitOptions) -> Result<(), XrError> {
        self.commit(ConfigOp::Commit, options, false).await
    }

    /// Applies the staged candidate as a full replacement of the running configuration.
    pub async fn commit_replace_config(&mut self, options: &CommitOptions) -> Result<(), XrError> {
        self.commit(ConfigOp::CommitReplace, options, true).await
    }

    async fn commit(
        &mut self,
        op: ConfigOp,
        options: &CommitOptions,
        replace: bool,
    ) -> Result<(), XrError> {
        self.guard(op)?;
        let request = options.to_request(replace)?;
        self.rpc(&request).await?;
        self.candidate = None;
        let next = self.state.after(op);
        self.transition(next);
        Ok(())
    }

    /// Drops the staged candidate without applying it.
    pub async fn discard_config(&mut self) -> Result<(), XrError> {
        self.guard(ConfigOp::Discard)?;
        self.rpc(&classify::config_command(CLEAR_COMMAND)).await?;
        self.candidate = None;
        self.transition(ConfigState::Discarded);
        Ok(())
    }

    /// Reverts the running configuration to the previous commit.
    pub async fn rollback(&mut self) -> Result<(), XrError> {
        self.rollback_to(1).await
    }

    /// Reverts the running configuration by `previous` commits.
    ///
    /// The device request releases the lock, rolls back and takes the lock
    /// again in one envelope.
    pub async fn rollback_to(&mut self, previous: u32) -> Result<(), XrError> {
        self.guard(ConfigOp::Rollback)?;
        if previous == 0 {
            return Err(XrError::InvalidInput(
                "rollback needs at least one previous commit".to_string(),
            ));
        }
        let request = format!(
            "{UNLOCK_REQUEST}<Rollback><Previous>{previous}</Previous></Rollback>{LOCK_REQUEST}"
        );
        self.rpc(&request).await?;
        let next = self.state.after(ConfigOp::Rollback);
        self.transition(next);
        Ok(())
    }
}
