/// supervisord event-listener protocol.
///
/// The listener announces `READY\n` on stdout, supervisord answers on stdin
/// with a single header line of `key:value` tokens followed by `len` bytes of
/// payload, and the listener acknowledges with `RESULT 2\nOK` before the next
/// `READY`.  stdout belongs to this protocol; nothing else may write to it.
use std::collections::BTreeMap;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const READY: &[u8] = b"READY\n";
pub const RESULT_OK: &[u8] = b"RESULT 2\nOK";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("notification channel closed by supervisord")]
    Closed,

    #[error("I/O error on notification channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header {line:?}: {reason}")]
    MalformedHeader { line: String, reason: String },
}

/// Parses space-separated `key:value` tokens (header lines and most
/// payload first lines use this format).
pub fn parse_tokens(line: &str) -> BTreeMap<String, String> {
    line.split_whitespace()
        .filter_map(|token| token.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// One event delivered by supervisord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub headers: BTreeMap<String, String>,
    pub payload: String,
}

impl Notification {
    pub fn event_name(&self) -> &str {
        self.headers.get("eventname").map(String::as_str).unwrap_or_default()
    }

    /// `TICK_5`, `TICK_60` and `TICK_3600` all count.
    pub fn is_tick(&self) -> bool {
        self.event_name().starts_with("TICK")
    }

    pub fn payload_fields(&self) -> BTreeMap<String, String> {
        parse_tokens(self.payload.lines().next().unwrap_or_default())
    }
}

/// The listener's stdin/stdout pair.
pub struct ListenerChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> ListenerChannel<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Signals readiness and blocks until the next notification arrives.
    pub async fn wait(&mut self) -> Result<Notification, ProtocolError> {
        self.send(READY).await?;

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ProtocolError::Closed);
        }
        let headers = parse_tokens(&line);
        let malformed = |reason: &str| ProtocolError::MalformedHeader {
            line: line.trim_end().to_string(),
            reason: reason.to_string(),
        };

        if !headers.contains_key("eventname") {
            return Err(malformed("missing eventname"));
        }
        let len: usize = headers
            .get("len")
            .ok_or_else(|| malformed("missing len"))?
            .parse()
            .map_err(|_| malformed("len is not a number"))?;

        // Grows with the bytes actually received, never with the claimed len.
        let mut payload = Vec::new();
        let read = (&mut self.reader).take(len as u64).read_to_end(&mut payload).await?;
        if read < len {
            return Err(ProtocolError::Closed);
        }

        Ok(Notification {
            headers,
            payload: String::from_utf8_lossy(&payload).into_owned(),
        })
    }

    /// Acknowledges the current notification as handled.
    pub async fn ok(&mut self) -> Result<(), ProtocolError> {
        self.send(RESULT_OK).await
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    #[cfg(test)]
    pub fn writer(&self) -> &W {
        &self.writer
    }
}
