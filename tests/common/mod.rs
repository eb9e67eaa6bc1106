#![allow(dead_code)]

//! Test doubles: a simulated IOS-XR device speaking the XML-CLI shell over
//! channels, and a scripted transport for exact prompt sequences.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rxrcli::classify::{self, REQUEST_PREFIX, REQUEST_SUFFIX};
use rxrcli::config::DeviceConfig;
use rxrcli::error::XrError;
use rxrcli::prompt::PromptSet;
use rxrcli::session::{ChannelTransport, Connector, ExpectOutcome, Transport, XrSession};
use tokio::sync::mpsc::{self, Receiver, Sender};

pub const SHELL: &str = "RP/0/RSP0/CPU0:fake-xr#";
pub const XML_UNAVAILABLE: &str = "ERROR: 0x24319600 'XML-TTY' detected the 'informational' condition 'The XML TTY Agent has not yet been started. Check that the configuration 'xml agent tty' has been committed.'";
pub const NOT_WELL_FORMED: &str = "ERROR: 0xa367a600 'XML Service Library' detected the 'fatal' condition 'The XML document is not well-formed'";
pub const LOCK_CONTENTION: &str = "'XML Service Library' detected the 'warning' condition 'The configuration is locked by another agent'";
pub const COMMIT_FAILED: &str = "'CfgMgr' detected the 'warning' condition 'Failed to commit one or more configuration items during a pseudo-atomic operation. All changes made have been reverted.'";
pub const DIFF_HEADER: &str = "Building configuration...\n!! IOS XR Configuration version = 7.3.2\n";
pub const CLOCK: &str = "\n12:00:00.000 UTC Fri Oct 16 2026\n";
/// Exec command answered with a plain error line followed by a structured error.
pub const DOUBLE_FAULT: &str = "show platform fault";
pub const PLATFORM_BUSY: &str = "ERROR: 0x41e3f200 'sysdb' detected the 'warning' condition 'Resource busy'";
const PAGE_LINES: usize = 2;

static ROLLBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<Unlock/><Rollback><Previous>(\d+)</Previous></Rollback><Lock/>$").expect("regex")
});
static CONFIGURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^<CLI><Configuration>(.*)</Configuration></CLI>$").expect("regex")
});
static EXEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^<CLI><Exec>(.*)</Exec></CLI>$").expect("regex"));
static GET_NEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^<GetNext IteratorID="([^"]+)"/>$"#).expect("regex"));
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitRecord {
    pub label: Option<String>,
    pub comment: Option<String>,
    pub confirmed: Option<u32>,
    pub replace: bool,
}

#[derive(Debug, Default)]
pub struct DeviceState {
    pub lock_owner: Option<usize>,
    pub next_session: usize,
    pub running: Vec<String>,
    /// Running configuration after each commit, oldest first.
    pub history: Vec<Vec<String>>,
    pub commits: Vec<CommitRecord>,
    /// Every request envelope received, in order.
    pub requests: Vec<String>,
    pub sessions_ended: usize,
}

#[derive(Debug, Clone)]
pub struct FakeOptions {
    pub password: String,
    pub xml_enabled: bool,
    pub host_key_prompt: bool,
    /// Requests whose body contains this text are never answered.
    pub stall_on: Option<String>,
    /// Requests whose body contains this text are answered after a delay.
    pub delay_on: Option<(String, Duration)>,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            password: "secret".to_string(),
            xml_enabled: true,
            host_key_prompt: false,
            stall_on: None,
            delay_on: None,
        }
    }
}

/// A simulated router. Clones share device state, so several sessions can
/// contend for the same configuration lock.
#[derive(Clone)]
pub struct FakeXr {
    state: Arc<Mutex<DeviceState>>,
    options: FakeOptions,
}

impl FakeXr {
    pub fn new(running: &[&str]) -> Self {
        Self::with_options(running, FakeOptions::default())
    }

    pub fn with_options(running: &[&str], options: FakeOptions) -> Self {
        let running: Vec<String> = running.iter().map(|line| line.to_string()).collect();
        let state = DeviceState {
            history: vec![running.clone()],
            running,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            options,
        }
    }

    pub fn config(&self) -> DeviceConfig {
        DeviceConfig::new("fake-xr", "admin", self.options.password.clone()).with_timeout_secs(5)
    }

    pub fn session(&self, config: DeviceConfig) -> XrSession {
        XrSession::with_connector(config, Arc::new(self.clone()))
    }

    pub fn running(&self) -> Vec<String> {
        self.state().running.clone()
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.state().commits.clone()
    }

    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }

    pub fn lock_owner(&self) -> Option<usize> {
        self.state().lock_owner
    }

    pub fn sessions_ended(&self) -> usize {
        self.state().sessions_ended
    }

    /// Releases the configuration lock behind its holder's back, as a
    /// device-side session timeout would.
    pub fn drop_lock(&self) {
        self.state().lock_owner = None;
    }

    /// Waits until `count` device sessions have ended. Aborted sessions end
    /// asynchronously.
    pub async fn wait_sessions_ended(&self, count: usize) -> bool {
        for _ in 0..100 {
            if self.sessions_ended() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("device state")
    }
}

#[async_trait]
impl Connector for FakeXr {
    async fn spawn(&self, _config: &DeviceConfig) -> Result<Box<dyn Transport>, XrError> {
        let (to_device, from_client) = mpsc::channel::<String>(64);
        let (to_client, from_device) = mpsc::channel::<String>(64);
        let id = {
            let mut state = self.state();
            state.next_session += 1;
            state.next_session
        };
        let task = tokio::spawn(run_device(self.clone(), id, from_client, to_client));
        Ok(Box::new(
            ChannelTransport::new(to_device, from_device).with_io_task(task),
        ))
    }
}

/// Releases the device lock when the session's task ends or is aborted.
struct Disconnect {
    state: Arc<Mutex<DeviceState>>,
    id: usize,
}

impl Drop for Disconnect {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if state.lock_owner == Some(self.id) {
                state.lock_owner = None;
            }
            state.sessions_ended += 1;
        }
    }
}

enum Incoming {
    Request(String),
    Exit,
}

struct Io {
    rx: Receiver<String>,
    tx: Sender<String>,
    buf: String,
}

impl Io {
    async fn say(&self, text: impl Into<String>) -> Option<()> {
        self.tx.send(text.into()).await.ok()
    }

    async fn fill(&mut self) -> Option<()> {
        let data = self.rx.recv().await?;
        self.buf.push_str(&data);
        Some(())
    }

    async fn line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buf.find('\n') {
                let line: String = self.buf.drain(..=pos).collect();
                return Some(line.trim_end().to_string());
            }
            self.fill().await?;
        }
    }

    async fn request(&mut self) -> Option<Incoming> {
        loop {
            if self.buf.starts_with("exit\n") {
                self.buf.drain(.."exit\n".len());
                return Some(Incoming::Exit);
            }
            if let Some(pos) = self.buf.find(REQUEST_SUFFIX) {
                let end = pos + REQUEST_SUFFIX.len();
                let request: String = self.buf.drain(..end).collect();
                if self.buf.starts_with('\n') {
                    self.buf.remove(0);
                }
                return Some(Incoming::Request(request));
            }
            self.fill().await?;
        }
    }
}

async fn run_device(xr: FakeXr, id: usize, rx: Receiver<String>, tx: Sender<String>) {
    let _disconnect = Disconnect {
        state: xr.state.clone(),
        id,
    };
    let mut io = Io {
        rx,
        tx,
        buf: String::new(),
    };
    let _ = serve(&xr, id, &mut io).await;
}

async fn serve(xr: &FakeXr, id: usize, io: &mut Io) -> Option<()> {
    if xr.options.host_key_prompt {
        io.say("The authenticity of host 'fake-xr (192.0.2.1)' can't be established.\r\nRSA key fingerprint is SHA256:q1w2e3r4.\r\nAre you sure you want to continue connecting (yes/no)? ").await?;
        if io.line().await? != "yes" {
            return None;
        }
        io.say("\r\nWarning: Permanently added 'fake-xr' to the list of known hosts.\r\n")
            .await?;
    }
    loop {
        io.say("admin@fake-xr's Password: ").await?;
        if io.line().await? == xr.options.password {
            break;
        }
        io.say("\r\n").await?;
    }
    io.say(format!("\r\n\r\n{SHELL}")).await?;

    loop {
        let line = io.line().await?;
        match line.as_str() {
            "xml" if xr.options.xml_enabled => {
                io.say("xml\r\n").await?;
                io.say("XML> ").await?;
                break;
            }
            "xml" => io.say(format!("xml\r\n{XML_UNAVAILABLE}\r\n{SHELL}")).await?,
            "exit" => return None,
            other => io.say(format!("{other}\r\n{SHELL}")).await?,
        }
    }

    let mut shell = XmlShell {
        xr: xr.clone(),
        id,
        target: Vec::new(),
        iterator: None,
        next_iterator: 0,
    };
    loop {
        let request = match io.request().await? {
            Incoming::Exit => {
                io.say(format!("\r\n{SHELL}")).await?;
                return Some(());
            }
            Incoming::Request(request) => request,
        };
        io.say(format!("{request}\r\n")).await?;
        xr.state().requests.push(request.clone());

        let body = request
            .strip_prefix(REQUEST_PREFIX)
            .and_then(|rest| rest.strip_suffix(REQUEST_SUFFIX));
        let Some(body) = body.filter(|body| !body.contains("<Broken")) else {
            io.say(format!("{NOT_WELL_FORMED}\r\nXML> ")).await?;
            continue;
        };
        if let Some(stall) = xr.options.stall_on.as_deref()
            && body.contains(stall)
        {
            continue;
        }
        if let Some((delayed, delay)) = xr.options.delay_on.as_ref()
            && body.contains(delayed.as_str())
        {
            tokio::time::sleep(*delay).await;
        }

        let reply = shell.handle(body);
        let mut mid = reply.len() / 2;
        while !reply.is_char_boundary(mid) {
            mid += 1;
        }
        let (head, tail) = reply.split_at(mid);
        io.say(head).await?;
        io.say(format!("{tail}\r\nXML> ")).await?;
    }
}

fn response(attrs: &str, content: &str, errors: u32) -> String {
    format!(
        r#"<Response MajorVersion="1" MinorVersion="0"{attrs}>{content}<ResultSummary ErrorCount="{errors}"/></Response>"#
    )
}

fn error_element(tag: &str, code: &str, message: &str) -> String {
    response(
        "",
        &format!(
            r#"<{tag} ErrorCode="{code}" ErrorMsg="{}"/>"#,
            classify::escape_xml(message)
        ),
        1,
    )
}

fn cli(tag: &str, text: &str) -> String {
    response(
        "",
        &format!("<CLI><{tag}>{}</{tag}></CLI>", classify::escape_xml(text)),
        0,
    )
}

fn invalid_input(line: &str) -> String {
    format!("\n{line}\n^\n% Invalid input detected at '^' marker.\n")
}

/// Per-session XML-CLI state: the target buffer and an open iterator.
struct XmlShell {
    xr: FakeXr,
    id: usize,
    target: Vec<String>,
    iterator: Option<(String, VecDeque<String>)>,
    next_iterator: u32,
}

impl XmlShell {
    fn handle(&mut self, body: &str) -> String {
        match body {
            "<Lock/>" => return self.lock(),
            "<Unlock/>" => return self.unlock(),
            _ => {}
        }
        if let Some(caps) = ROLLBACK.captures(body) {
            return self.rollback(caps[1].parse().unwrap_or(0));
        }
        if body.starts_with("<Commit") {
            return self.commit(body);
        }
        if let Some(caps) = CONFIGURATION.captures(body) {
            return self.configuration(&classify::unescape_xml(&caps[1]));
        }
        if let Some(caps) = EXEC.captures(body) {
            return self.exec(&classify::unescape_xml(&caps[1]));
        }
        if let Some(caps) = GET_NEXT.captures(body) {
            return self.get_next(&caps[1]);
        }
        error_element("Request", "0xa367e000", "unsupported request")
    }

    fn owns_lock(&self) -> bool {
        self.xr.state().lock_owner == Some(self.id)
    }

    fn lock(&mut self) -> String {
        let mut state = self.xr.state();
        match state.lock_owner {
            Some(owner) if owner != self.id => error_element(
                "Lock",
                "0x4043c800",
                &format!("{LOCK_CONTENTION} (session {owner})"),
            ),
            _ => {
                state.lock_owner = Some(self.id);
                response("", "<Lock/>", 0)
            }
        }
    }

    fn unlock(&mut self) -> String {
        let mut state = self.xr.state();
        if state.lock_owner != Some(self.id) {
            return error_element(
                "Unlock",
                "0x4043d400",
                "The configuration is not locked by this session",
            );
        }
        state.lock_owner = None;
        self.target.clear();
        response("", "<Unlock/>", 0)
    }

    fn rollback(&mut self, previous: usize) -> String {
        if !self.owns_lock() {
            return error_element("Rollback", "0x4043d400", "The configuration is not locked");
        }
        let mut state = self.xr.state();
        let commits = state.history.len() - 1;
        if previous == 0 || previous > commits {
            return error_element("Rollback", "0x41864e00", "Rollback point not found");
        }
        let restored = state.history[commits - previous].clone();
        state.running = restored.clone();
        state.history.push(restored);
        response(
            "",
            &format!("<Unlock/><Rollback><Previous>{previous}</Previous></Rollback><Lock/>"),
            0,
        )
    }

    fn commit(&mut self, body: &str) -> String {
        if !self.owns_lock() {
            return error_element("Commit", "0x4043d400", "The configuration is not locked");
        }
        if self.target.iter().any(|line| line.contains("fail-validation")) {
            return error_element("Commit", "0x41866c00", COMMIT_FAILED);
        }

        let mut record = CommitRecord::default();
        for caps in ATTRIBUTE.captures_iter(body) {
            let value = classify::unescape_xml(&caps[2]);
            match &caps[1] {
                "Label" => record.label = Some(value),
                "Comment" => record.comment = Some(value),
                "Confirmed" => record.confirmed = value.parse().ok(),
                "Replace" => record.replace = value == "true",
                _ => {}
            }
        }

        let mut state = self.xr.state();
        let running = if record.replace {
            self.target
                .iter()
                .filter(|line| !line.starts_with("no "))
                .cloned()
                .collect()
        } else {
            let mut running = state.running.clone();
            for line in &self.target {
                if let Some(removed) = line.strip_prefix("no ") {
                    running.retain(|existing| existing != removed);
                } else if !running.contains(line) {
                    running.push(line.clone());
                }
            }
            running
        };
        state.running = running.clone();
        state.history.push(running);
        state.commits.push(record);
        self.target.clear();
        let commit_id = 1_000_000_000 + state.commits.len();
        response("", &format!(r#"<Commit CommitID="{commit_id}"/>"#), 0)
    }

    fn configuration(&mut self, text: &str) -> String {
        match text {
            "show configuration changes diff" => return cli("Configuration", &self.diff()),
            "show configuration" => {
                let mut out = DIFF_HEADER.to_string();
                for line in &self.target {
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str("end\n");
                return cli("Configuration", &out);
            }
            "clear" => {
                self.target.clear();
                return cli("Configuration", "");
            }
            _ => {}
        }

        let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
        if let Some(bad) = lines.iter().find(|line| line.contains("bogus")) {
            return cli("Configuration", &invalid_input(bad));
        }
        self.target
            .extend(lines.iter().map(|line| line.trim_end().to_string()));
        cli("Configuration", "")
    }

    fn diff(&self) -> String {
        let state = self.xr.state();
        let mut out = DIFF_HEADER.to_string();
        for line in &self.target {
            if let Some(removed) = line.strip_prefix("no ") {
                if state.running.iter().any(|existing| existing == removed) {
                    out.push_str(&format!("-{removed}\n"));
                }
            } else if !state.running.contains(line) {
                out.push_str(&format!("+{line}\n"));
            }
        }
        out.push_str("end\n");
        out
    }

    fn exec(&mut self, command: &str) -> String {
        match command {
            "show clock" => cli("Exec", CLOCK),
            DOUBLE_FAULT => format!(
                "{PLATFORM_BUSY}\r\n{}",
                error_element("Exec", "0x41e3f400", "Platform fault table is unavailable")
            ),
            "show running-config" => {
                let running = self.xr.running();
                let mut pages: VecDeque<String> = running
                    .chunks(PAGE_LINES)
                    .map(|page| page.iter().map(|line| format!("{line}\n")).collect())
                    .collect();
                let first = pages.pop_front().unwrap_or_default();
                let content = format!(
                    "<CLI><Exec>{}</Exec></CLI>",
                    classify::escape_xml(&first)
                );
                if pages.is_empty() {
                    return response("", &content, 0);
                }
                self.next_iterator += 1;
                let iterator = self.next_iterator.to_string();
                let reply = response(&format!(r#" IteratorID="{iterator}""#), &content, 0);
                self.iterator = Some((iterator, pages));
                reply
            }
            other => cli("Exec", &invalid_input(other)),
        }
    }

    fn get_next(&mut self, iterator: &str) -> String {
        let Some((current, pages)) = self.iterator.as_mut().filter(|(id, _)| id == iterator)
        else {
            return response(
                "",
                &format!(
                    r#"<GetNext IteratorID="{iterator}" ErrorCode="0xa367e600" ErrorMsg="Invalid iterator ID"/>"#
                ),
                1,
            );
        };
        let current = current.clone();
        let page = pages.pop_front().unwrap_or_default();
        let more = !pages.is_empty();
        if !more {
            self.iterator = None;
        }
        let attrs = if more {
            format!(r#" IteratorID="{current}""#)
        } else {
            String::new()
        };
        response(
            &attrs,
            &format!(
                r#"<GetNext IteratorID="{current}"/><CLI><Exec>{}</Exec></CLI>"#,
                classify::escape_xml(&page)
            ),
            0,
        )
    }
}

/// One scripted reaction to an `expect` call.
#[derive(Debug, Clone)]
pub enum Step {
    Match(usize, &'static str),
    Timeout(&'static str),
    Eof(&'static str),
}

/// Transport that replays a fixed list of `expect` outcomes.
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    last: String,
    sent: Arc<Mutex<Vec<String>>>,
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_line(&mut self, text: &str) -> Result<(), XrError> {
        self.sent.lock().expect("sent lines").push(text.to_string());
        Ok(())
    }

    async fn expect(
        &mut self,
        _patterns: &[Regex],
        _timeout: Duration,
    ) -> Result<ExpectOutcome, XrError> {
        let outcome = match self.steps.pop_front() {
            Some(Step::Match(index, output)) => {
                self.last = output.to_string();
                ExpectOutcome::Matched(index)
            }
            Some(Step::Timeout(output)) => {
                self.last = output.to_string();
                ExpectOutcome::Timeout
            }
            Some(Step::Eof(output)) => {
                self.last = output.to_string();
                ExpectOutcome::Eof
            }
            None => {
                self.last.clear();
                ExpectOutcome::Eof
            }
        };
        Ok(outcome)
    }

    fn last_output(&self) -> &str {
        &self.last
    }

    async fn terminate(&mut self) -> Result<(), XrError> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ScriptedConnector {
    steps: Mutex<Option<Vec<Step>>>,
    sent: Arc<Mutex<Vec<String>>>,
    terminated: Arc<AtomicBool>,
}

impl ScriptedConnector {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(Some(steps)),
            sent: Arc::new(Mutex::new(Vec::new())),
            terminated: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lines").clone()
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn spawn(&self, _config: &DeviceConfig) -> Result<Box<dyn Transport>, XrError> {
        let steps = self
            .steps
            .lock()
            .expect("steps")
            .take()
            .ok_or_else(|| XrError::InternalServerError("script already used".to_string()))?;
        Ok(Box::new(ScriptedTransport {
            steps: steps.into(),
            last: String::new(),
            sent: self.sent.clone(),
            terminated: self.terminated.clone(),
        }))
    }
}

/// Index of the pattern in `set` bound to `state`.
pub fn index_of<S: Copy + PartialEq + Debug>(set: &PromptSet<S>, state: S) -> usize {
    (0..set.patterns().len())
        .find(|&index| set.state(index) == Some(state))
        .expect("state present in prompt set")
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
