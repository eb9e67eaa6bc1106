use super::*;

/// Opens an interactive shell channel over SSH.
///
/// Password authentication happens in the SSH layer, so routers usually greet
/// the session with the exec prompt straight away.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

/// [`ChannelTransport`] that also owns the SSH client keeping the channel alive.
struct SshTransport {
    inner: ChannelTransport,
    client: Option<Client>,
}

#[async_trait]
impl Connector for SshConnector {
    async fn spawn(&self, config: &DeviceConfig) -> Result<Box<dyn Transport>, XrError> {
        let device_addr = config.device_addr();
        let security_options = ConnectionSecurityOptions::for_device(config);

        let ssh_config = Config {
            preferred: security_options.preferred(),
            inactivity_timeout: None,
            ..Default::default()
        };

        let connect = Client::connect_with_config(
            (config.hostname.clone(), config.port),
            &config.username,
            AuthMethod::with_password(&config.password),
            security_options.server_check.clone(),
            ssh_config,
        );
        let client = match tokio::time::timeout(config.timeout(), connect).await {
            Ok(client) => client?,
            Err(_) => {
                return Err(XrError::Timeout(format!(
                    "connecting to {device_addr}"
                )));
            }
        };
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let text = String::from_utf8_lossy(data).into_owned();
                                if sender_to_user.send(text).await.is_err() {
                                    debug!("{} Shell output receiver dropped. Closing task.", device_addr);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", device_addr);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            debug!("{} SSH I/O task ended.", device_addr);
        });

        Ok(Box::new(SshTransport {
            inner: ChannelTransport::new(sender_to_shell, receiver_from_shell)
                .with_io_task(io_task),
            client: Some(client),
        }))
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn send_line(&mut self, text: &str) -> Result<(), XrError> {
        self.inner.send_line(text).await
    }

    async fn expect(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<ExpectOutcome, XrError> {
        self.inner.expect(patterns, timeout).await
    }

    fn last_output(&self) -> &str {
        self.inner.last_output()
    }

    fn discard_pending(&mut self) {
        self.inner.discard_pending();
    }

    async fn terminate(&mut self) -> Result<(), XrError> {
        self.inner.terminate().await?;
        // async-ssh2-tokio closes the connection when the client is dropped.
        if let Some(client) = self.client.take()
            && client.is_closed()
        {
            trace!("SSH client was already closed by the device");
        }
        Ok(())
    }
}
