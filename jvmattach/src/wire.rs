//! Attach protocol codec.
//!
//! Works over any already-connected byte stream; knows nothing about how the
//! stream was obtained. A request is NUL-delimited fields: protocol version,
//! command, then exactly three argument slots (unused slots sent as empty
//! strings). A response is an ASCII decimal status code terminated by the
//! first non-digit byte, followed by a payload read to end-of-stream.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Version token sent as the first request field.
pub const PROTOCOL_VERSION: &str = "1";

/// Reserved status code: the target rejected our protocol version.
const ATTACH_ERROR_BADVERSION: u32 = 101;

/// Every command carries exactly this many argument slots on the wire.
const COMMAND_ARG_SLOTS: usize = 3;

const PAYLOAD_CHUNK: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("malformed response: expected status digits")]
    MalformedResponse,

    #[error("protocol mismatch with target VM")]
    ProtocolMismatch,

    #[error("command failed in target VM (status {0})")]
    CommandFailed(u32),
}

/// Codec over one connected channel to the attach listener.
pub struct WireStream<S> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WireStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Frame and send one request: version, command, three argument slots.
    /// Callers may pass fewer arguments; trailing slots are padded with empty
    /// strings, never omitted.
    pub async fn send_request(&mut self, command: &str, args: &[&str]) -> Result<(), WireError> {
        self.write_field(PROTOCOL_VERSION.as_bytes()).await?;
        self.write_field(command.as_bytes()).await?;
        for slot in 0..COMMAND_ARG_SLOTS {
            let arg = args.get(slot).copied().unwrap_or("");
            self.write_field(arg.as_bytes()).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn write_field(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        // write_all turns a short write into an error, which is the
        // transport-error contract for partial frames.
        self.stream.write_all(bytes).await?;
        self.stream.write_all(b"\0").await?;
        Ok(())
    }

    /// Read and classify the status line. The terminating non-digit byte is
    /// consumed and discarded. `Ok(())` only for status 0.
    pub async fn read_status(&mut self) -> Result<(), WireError> {
        match self.read_status_code().await? {
            0 => Ok(()),
            ATTACH_ERROR_BADVERSION => Err(WireError::ProtocolMismatch),
            code => Err(WireError::CommandFailed(code)),
        }
    }

    /// Accumulate ASCII digits one byte at a time. The first non-digit byte
    /// (or end-of-stream) terminates the code; no digits by then is a
    /// malformed response.
    async fn read_status_code(&mut self) -> Result<u32, WireError> {
        let mut digits = String::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.stream.read(&mut byte).await?;
            if n == 0 || !byte[0].is_ascii_digit() {
                if digits.is_empty() {
                    return Err(WireError::MalformedResponse);
                }
                return digits.parse().map_err(|_| WireError::MalformedResponse);
            }
            digits.push(byte[0] as char);
        }
    }

    /// Drain the response payload to end-of-stream. The target terminates
    /// each of its own writes, so the final byte of every chunk as received
    /// is trimmed. Clean end-of-stream ends the payload; it is not an error.
    pub async fn read_payload(&mut self) -> Result<String, WireError> {
        let mut payload = Vec::new();
        let mut buf = [0u8; PAYLOAD_CHUNK];
        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            payload.extend_from_slice(&buf[..n - 1]);
        }
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }
}
