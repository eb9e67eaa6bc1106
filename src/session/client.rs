use super::*;

/// Borrowed view of the pieces every exchange touches.
///
/// Built from disjoint `XrSession` fields so the session state can still be
/// updated while a wire is alive.
pub(super) struct Wire<'a> {
    transport: &'a mut dyn Transport,
    transcript: &'a mut Transcript,
    recorder: Option<&'a SessionRecorder>,
}

impl Wire<'_> {
    async fn send(&mut self, text: &str) -> Result<(), XrError> {
        self.transcript.sent(text);
        self.transport.send_line(text).await
    }

    async fn send_secret(&mut self, secret: &str) -> Result<(), XrError> {
        self.transcript.sent_secret();
        self.transport.send_line(secret).await
    }

    /// Waits on `set` and mirrors the consumed output.
    async fn wait<S: Copy + fmt::Debug>(
        &mut self,
        set: &PromptSet<S>,
        timeout: Duration,
    ) -> Result<S, XrError> {
        let result = set.wait(&mut *self.transport, timeout).await;
        // A timed-out wait leaves its output buffered; it is mirrored once consumed.
        if !matches!(result, Err(XrError::Timeout(_))) {
            let output = self.transport.last_output();
            self.transcript.received(output);
            if let Some(recorder) = self.recorder
                && !output.is_empty()
            {
                let _ = recorder.record_raw_chunk(output.to_string());
            }
        }
        result
    }

    /// Login and entry into the XML sub-shell.
    async fn handshake(&mut self, config: &DeviceConfig) -> Result<(), XrError> {
        let timeout = config.timeout();
        let mut password_sent = false;

        loop {
            match self.wait(&*LOGIN_PROMPTS, timeout).await? {
                LoginPrompt::HostKey => {
                    let answer = if config.accept_host_key { "yes" } else { "no" };
                    debug!("{} Answering host key prompt with '{}'", config.device_addr(), answer);
                    self.send(answer).await?;
                }
                LoginPrompt::Password => {
                    if password_sent {
                        return Err(XrError::AuthenticationFailed(format!(
                            "password rejected for {}",
                            config.device_addr()
                        )));
                    }
                    self.send_secret(&config.password).await?;
                    password_sent = true;
                }
                LoginPrompt::Shell => break,
                LoginPrompt::Denied => {
                    return Err(XrError::AuthenticationFailed(
                        self.transport.last_output().trim().to_string(),
                    ));
                }
            }
        }
        debug!("{} Shell prompt reached, entering XML mode", config.device_addr());

        self.send("xml").await?;
        match self.wait(&*XML_MODE_PROMPTS, timeout).await? {
            XmlModePrompt::Ready => Ok(()),
            XmlModePrompt::Unavailable => {
                let output = self.transport.last_output();
                Err(
                    classify::parse_cli_error_line(output).unwrap_or_else(|| XrError::XmlCli {
                        code: String::new(),
                        message: output.trim().to_string(),
                    }),
                )
            }
        }
    }

    /// Sends one enveloped request and classifies the reply.
    ///
    /// Returns the raw text of the exchange, echo included.
    pub(super) async fn exchange(
        &mut self,
        body: &str,
        timeout: Duration,
    ) -> Result<String, XrError> {
        self.transport.discard_pending();
        self.send(&classify::wrap_request(body)).await?;

        let mut raw = String::new();
        loop {
            let marker = self.wait(&*REPLY_MARKERS, timeout).await?;
            raw.push_str(self.transport.last_output());
            match marker {
                ReplyMarker::Response => {
                    self.wait(&*XML_READY, timeout).await?;
                    break;
                }
                ReplyMarker::CliError => {
                    if classify::parse_cli_error_line(classify::strip_echo(&raw)).is_none() {
                        // Error text inside the echoed request; the reply is still coming.
                        continue;
                    }
                    if classify::response_open(&raw) {
                        // Error text inside the reply payload.
                        continue;
                    }
                    // A structured reply may still follow the plain error line.
                    self.wait(&*XML_READY, timeout).await?;
                    raw.push_str(self.transport.last_output());
                    break;
                }
            }
        }

        let result = classify::classify_reply(&raw);
        if let Some(recorder) = self.recorder {
            let _ = recorder.record_event(SessionEvent::RpcExchange {
                request: body.to_string(),
                reply: classify::strip_echo(&raw).trim().to_string(),
                success: result.is_ok(),
                error: result.as_ref().err().map(|err| err.to_string()),
            });
        }
        result.map(|()| raw)
    }
}

impl XrSession {
    /// Creates a session that connects over SSH. Nothing is sent until [`open`](Self::open).
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_connector(config, Arc::new(SshConnector))
    }

    /// Creates a session that obtains its transport from `connector`.
    pub fn with_connector(config: DeviceConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            transport: None,
            status: SessionStatus::Idle,
            mode: ShellMode::Raw,
            state: ConfigState::Unlocked,
            candidate: None,
            transcript: Transcript::disabled(),
            recorder: None,
        }
    }

    /// Records session events into `recorder`.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn mode(&self) -> ShellMode {
        self.mode
    }

    /// Connects, logs in and enters XML mode.
    ///
    /// Opening an open session is a no-op. When the configuration asks for
    /// it, the configuration lock is acquired before returning; if that
    /// fails the connection is torn down again. A failed `open` leaves the
    /// session ready for another attempt.
    pub async fn open(&mut self) -> Result<(), XrError> {
        match self.status {
            SessionStatus::Open => return Ok(()),
            SessionStatus::Closed => return Err(XrError::SessionClosed),
            SessionStatus::Idle => {}
        }
        let device_addr = self.config.device_addr();
        debug!("{} Opening XML-CLI session", device_addr);

        self.transcript = Transcript::open(&self.config.log)?;
        let mut transport = self.connector.spawn(&self.config).await?;

        let handshake = Wire {
            transport: transport.as_mut(),
            transcript: &mut self.transcript,
            recorder: self.recorder.as_ref(),
        }
        .handshake(&self.config)
        .await;

        if let Err(err) = handshake {
            debug!("{} Handshake failed: {}", device_addr, err);
            if let Err(e) = transport.terminate().await {
                debug!("{} Failed to terminate transport: {}", device_addr, e);
            }
            self.transcript.flush();
            return Err(err);
        }

        self.transport = Some(transport);
        self.status = SessionStatus::Open;
        self.mode = ShellMode::Xml;
        self.state = ConfigState::Unlocked;
        self.candidate = None;
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionEstablished {
                device_addr: device_addr.clone(),
                lock_on_connect: self.config.lock_on_connect,
            });
        }
        debug!("{} XML mode ready", device_addr);

        if self.config.lock_on_connect
            && let Err(err) = self.lock().await
        {
            if self.status == SessionStatus::Open {
                self.teardown("lock_on_connect_failed").await;
            }
            self.status = SessionStatus::Idle;
            return Err(err);
        }
        Ok(())
    }

    /// Releases the lock if held and terminates the transport.
    ///
    /// Never fails. Closing a closed or never-opened session does nothing
    /// beyond marking it closed.
    pub async fn close(&mut self) {
        if self.status != SessionStatus::Open {
            self.status = SessionStatus::Closed;
            return;
        }
        if self.state.lock_held()
            && let Err(err) = self.unlock().await
        {
            debug!(
                "{} Unlock during close failed, tearing down anyway: {}",
                self.config.device_addr(),
                err
            );
        }
        if self.status == SessionStatus::Open {
            self.teardown("close").await;
        }
        self.status = SessionStatus::Closed;
    }

    async fn teardown(&mut self, reason: &str) {
        if let Some(mut transport) = self.transport.take() {
            if self.mode == ShellMode::Xml {
                self.transcript.sent("exit");
                let _ = transport.send_line("exit").await;
            }
            self.transcript.sent("exit");
            let _ = transport.send_line("exit").await;
            if let Err(err) = transport.terminate().await {
                debug!("{} Failed to terminate transport: {}", self.config.device_addr(), err);
            }
        }
        self.mode = ShellMode::Raw;
        self.state = ConfigState::Unlocked;
        self.candidate = None;
        self.transcript.flush();
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionClosed {
                reason: reason.to_string(),
            });
        }
        debug!("{} Session torn down ({})", self.config.device_addr(), reason);
    }

    pub(super) fn wire(&mut self) -> Result<Wire<'_>, XrError> {
        match self.status {
            SessionStatus::Open => {}
            SessionStatus::Idle => return Err(XrError::NotOpen),
            SessionStatus::Closed => return Err(XrError::SessionClosed),
        }
        let transport = self.transport.as_deref_mut().ok_or(XrError::NotOpen)?;
        Ok(Wire {
            transport,
            transcript: &mut self.transcript,
            recorder: self.recorder.as_ref(),
        })
    }

    /// One exchange with the default timeout, no iterator handling.
    pub(super) async fn rpc(&mut self, body: &str) -> Result<String, XrError> {
        let timeout = self.config.timeout();
        let result = self.wire()?.exchange(body, timeout).await;
        self.settle(result).await
    }

    /// Drops the connection after a transport failure.
    ///
    /// A reply that arrives after its exchange timed out would otherwise be
    /// read as the reply to the next request. The device releases the lock
    /// of a dropped session, so local state goes back to `Unlocked` and the
    /// session back to `Idle`.
    async fn settle<T>(&mut self, result: Result<T, XrError>) -> Result<T, XrError> {
        if let Err(err) = &result
            && err.is_transport_failure()
            && self.status == SessionStatus::Open
        {
            warn!(
                "{} Exchange failed, dropping the connection: {}",
                self.config.device_addr(),
                err
            );
            self.teardown("transport_failure").await;
            self.status = SessionStatus::Idle;
        }
        result
    }

    /// Runs an XML-CLI request body and collects every reply chunk.
    pub async fn execute(&mut self, body: &str) -> Result<RpcReply, XrError> {
        let timeout = self.config.timeout();
        self.execute_with_timeout(body, timeout).await
    }

    /// Like [`execute`](Self::execute) with an explicit per-exchange timeout.
    ///
    /// Replies announcing an `IteratorID` are followed with `GetNext`
    /// requests until the device stops announcing one.
    pub async fn execute_with_timeout(
        &mut self,
        body: &str,
        timeout: Duration,
    ) -> Result<RpcReply, XrError> {
        let result = self.collect(body, timeout).await;
        self.settle(result).await
    }

    async fn collect(&mut self, body: &str, timeout: Duration) -> Result<RpcReply, XrError> {
        let mut wire = self.wire()?;
        let mut reply = RpcReply {
            chunks: vec![wire.exchange(body, timeout).await?],
        };

        while let Some(iterator) = reply.chunks.last().and_then(|c| classify::iterator_id(c)) {
            trace!("Following iterator {}", iterator);
            let chunk = wire
                .exchange(&classify::get_next(&iterator), timeout)
                .await
                .map_err(|err| match err {
                    XrError::XmlCli { code, message } => XrError::IteratorId(format!(
                        "GetNext for iterator {iterator} failed: {code} {message}"
                    )),
                    other => other,
                })?;
            reply.chunks.push(chunk);
        }
        Ok(reply)
    }

    /// Runs an XML-CLI request body and returns the reply documents.
    pub async fn make_rpc_call(&mut self, body: &str) -> Result<String, XrError> {
        Ok(self.execute(body).await?.raw())
    }

    /// Runs an exec-mode CLI command and returns its text output.
    pub async fn show(&mut self, command: &str) -> Result<String, XrError> {
        self.execute(&classify::exec_command(command))
            .await?
            .cli_text()
            .ok_or_else(|| {
                XrError::InternalServerError(format!("reply to '{command}' has no CLI payload"))
            })
    }
}
