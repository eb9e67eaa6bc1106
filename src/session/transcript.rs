use super::*;
use std::fs::OpenOptions;
use std::io::{self, Write};

const SECRET_MASK: &str = "********";

/// Human-readable copy of everything sent to and received from the device.
///
/// Passwords are written as a fixed mask. A sink that fails to accept writes
/// is dropped after a warning so the session itself keeps working.
pub struct Transcript {
    sink: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcript")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Transcript {
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Opens the destination named by `target`. Files are appended to.
    pub fn open(target: &LogTarget) -> Result<Self, XrError> {
        let sink: Option<Box<dyn Write + Send>> = match target {
            LogTarget::None => None,
            LogTarget::Stdout => Some(Box::new(io::stdout())),
            LogTarget::Stderr => Some(Box::new(io::stderr())),
            LogTarget::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Box::new(file))
            }
        };
        Ok(Self { sink })
    }

    /// Wraps an arbitrary writer.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Box::new(writer)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Records a line sent to the device.
    pub fn sent(&mut self, text: &str) {
        self.write(text.as_bytes());
        self.write(b"\n");
    }

    /// Records that a secret was sent without revealing it.
    pub fn sent_secret(&mut self) {
        self.write(SECRET_MASK.as_bytes());
        self.write(b"\n");
    }

    /// Records device output.
    pub fn received(&mut self, text: &str) {
        self.write(text.as_bytes());
    }

    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut()
            && let Err(e) = sink.flush()
        {
            warn!("Transcript flush failed, disabling transcript: {}", e);
            self.sink = None;
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Some(sink) = self.sink.as_mut()
            && let Err(e) = sink.write_all(bytes)
        {
            warn!("Transcript write failed, disabling transcript: {}", e);
            self.sink = None;
        }
    }
}
