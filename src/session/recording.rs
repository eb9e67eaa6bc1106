use super::*;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    #[default]
    KeyEventsOnly,
    /// Record key events and raw terminal chunks.
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw terminal chunk events.
    pub keep_raw_chunks: bool,
    /// Keep configuration state transitions.
    pub keep_state_changed: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_state_changed: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        device_addr: String,
        #[serde(default)]
        lock_on_connect: bool,
    },
    ConnectionClosed {
        reason: String,
    },
    /// One XML-CLI request and the raw reply text that ended it.
    RpcExchange {
        request: String,
        reply: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    StateChanged {
        from: ConfigState,
        to: ConfigState,
    },
    /// Candidate text pushed to the device, identified by size and digest.
    CandidateStaged {
        source: String,
        bytes: usize,
        sha256: String,
    },
    RawChunk {
        data: String,
    },
}

/// In-memory session recorder.
///
/// Clones share the same entry list, so a caller can keep one handle while
/// the session records into another.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), XrError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| XrError::InternalServerError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record raw terminal output when enabled.
    pub fn record_raw_chunk(&self, data: String) -> Result<(), XrError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, XrError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| XrError::InternalServerError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    pub fn clear(&self) -> Result<(), XrError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| XrError::InternalServerError(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, XrError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| XrError::InternalServerError(format!("record encode error: {e}")))?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore a recorder from JSONL lines. Blank lines are skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, XrError> {
        let mut parsed = Vec::new();
        for (line_no, line) in jsonl.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                XrError::InternalServerError(format!(
                    "record decode error on line {}: {e}",
                    line_no + 1
                ))
            })?;
            parsed.push(entry);
        }

        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Events are sorted by timestamp (stable for equal stamps) and noisy
    /// event kinds are filtered out according to `options`.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, XrError> {
        let mut entries = Self::from_jsonl(jsonl)?.entries()?;
        entries.sort_by_key(|entry| entry.ts_ms);

        let filtered = entries
            .into_iter()
            .filter(|entry| match &entry.event {
                SessionEvent::RawChunk { .. } => options.keep_raw_chunks,
                SessionEvent::StateChanged { .. } => options.keep_state_changed,
                _ => true,
            })
            .collect::<Vec<_>>();

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::default())
    }
}

/// Connection facts captured at the start of a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayContext {
    pub device_addr: String,
    pub lock_on_connect: bool,
}

/// One recorded request with the reply the device gave to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExchange {
    pub request: String,
    pub reply: String,
    pub success: bool,
    pub error: Option<String>,
}

impl RecordedExchange {
    /// CLI payload of the recorded reply, unescaped.
    pub fn cli_text(&self) -> Option<String> {
        classify::cli_payload(&self.reply)
    }
}

/// Offline replayer backed by session recording data.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

impl SessionReplayer {
    /// Build a replayer from a recorder snapshot.
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        let entries = recorder.entries().unwrap_or_default();
        Self { entries, cursor: 0 }
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, XrError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Connection context of the first `connection_established` event.
    pub fn initial_context(&self) -> Option<ReplayContext> {
        self.entries.iter().find_map(|entry| match &entry.event {
            SessionEvent::ConnectionEstablished {
                device_addr,
                lock_on_connect,
            } => Some(ReplayContext {
                device_addr: device_addr.clone(),
                lock_on_connect: *lock_on_connect,
            }),
            _ => None,
        })
    }

    /// Replays the next recorded exchange whose request equals `request`.
    ///
    /// Exchanges for other requests before it are skipped.
    pub fn replay_next(&mut self, request: &str) -> Result<RecordedExchange, XrError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;

            if let SessionEvent::RpcExchange {
                request: recorded,
                reply,
                success,
                error,
            } = &entry.event
                && recorded == request
            {
                return Ok(RecordedExchange {
                    request: recorded.clone(),
                    reply: reply.clone(),
                    success: *success,
                    error: error.clone(),
                });
            }
        }
        Err(XrError::ReplayMismatchError(format!(
            "no replayable exchange found for request '{request}'"
        )))
    }

    /// Replays a sequence of requests in order.
    pub fn replay_script(&mut self, requests: &[&str]) -> Result<Vec<RecordedExchange>, XrError> {
        requests
            .iter()
            .map(|request| self.replay_next(request))
            .collect()
    }

    /// Every configuration state the session entered, in order.
    pub fn state_trail(&self) -> Vec<ConfigState> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.event {
                SessionEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
