use super::*;

/// Buffered pattern waiter over a pair of string channels.
///
/// The far side of the channels is whatever produces the terminal stream:
/// the SSH I/O task spawned by [`SshConnector`], or a simulated device in
/// tests. The stream has ended once the output channel is closed.
pub struct ChannelTransport {
    sender: Sender<String>,
    recv: Receiver<String>,
    buffer: String,
    last_output: String,
    io_task: Option<JoinHandle<()>>,
    terminated: bool,
}

impl ChannelTransport {
    pub fn new(sender: Sender<String>, recv: Receiver<String>) -> Self {
        Self {
            sender,
            recv,
            buffer: String::new(),
            last_output: String::new(),
            io_task: None,
            terminated: false,
        }
    }

    /// Attaches the task feeding the channels; it is aborted on `terminate`.
    pub fn with_io_task(mut self, task: JoinHandle<()>) -> Self {
        self.io_task = Some(task);
        self
    }

    /// Output received but not yet consumed by a match.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_line(&mut self, text: &str) -> Result<(), XrError> {
        if self.terminated {
            return Err(XrError::Eof("transport terminated".to_string()));
        }
        trace!("Send: '{:?}'", text);
        self.sender.send(format!("{text}\n")).await?;
        Ok(())
    }

    async fn expect(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<ExpectOutcome, XrError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some((index, end)) = earliest_match(&self.buffer, patterns) {
                self.last_output = self.buffer.drain(..end).collect();
                return Ok(ExpectOutcome::Matched(index));
            }
            if self.terminated {
                self.last_output = std::mem::take(&mut self.buffer);
                return Ok(ExpectOutcome::Eof);
            }

            match tokio::time::timeout_at(deadline, self.recv.recv()).await {
                Ok(Some(data)) => {
                    trace!("Recv: '{:?}'", data);
                    self.buffer.push_str(&data);
                }
                Ok(None) => {
                    debug!("Output channel closed while waiting for a pattern");
                    self.last_output = std::mem::take(&mut self.buffer);
                    return Ok(ExpectOutcome::Eof);
                }
                Err(_) => {
                    // The buffer stays intact so a later wait can still match it.
                    self.last_output = self.buffer.clone();
                    return Ok(ExpectOutcome::Timeout);
                }
            }
        }
    }

    fn last_output(&self) -> &str {
        &self.last_output
    }

    fn discard_pending(&mut self) {
        while let Ok(data) = self.recv.try_recv() {
            self.buffer.push_str(&data);
        }
        if !self.buffer.is_empty() {
            trace!("Discarding stale output: '{:?}'", self.buffer);
            self.buffer.clear();
        }
    }

    async fn terminate(&mut self) -> Result<(), XrError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.recv.close();
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }
}
