//! Content-Length framed JSON over a byte stream.
//!
//! Every message on the wire looks like:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io::{self, BufRead, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum accepted message size (16 MB).
const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown header {0:?}")]
    UnknownHeader(String),

    #[error("malformed Content-Length header value")]
    MalformedContentLength,

    #[error("message size {size} exceeds maximum allowed {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("JSON deserialization failed: {0}")]
    JsonDeserialize(#[source] serde_json::Error),

    #[error("JSON serialization failed: {0}")]
    JsonSerialize(#[source] serde_json::Error),
}

/// Reads framed messages off a [`BufRead`] stream.
pub struct FramedReader<R> {
    input: R,
    max_message_size: usize,
}

impl<R> FramedReader<R>
where
    R: BufRead,
{
    pub fn new(input: R) -> Self {
        Self {
            input,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Read the next message, blocking until one arrives.
    ///
    /// Returns `Ok(None)` on a clean end of stream.
    pub fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();

        loop {
            line.clear();
            let read = self.input.read_line(&mut line)?;
            if read == 0 {
                return Ok(None);
            }

            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                // End of headers.
                break;
            }

            match trimmed.split_once(':') {
                Some(("Content-Length", value)) => {
                    let length = value
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| CodecError::MalformedContentLength)?;
                    content_length = Some(length);
                }
                _ => return Err(CodecError::UnknownHeader(trimmed.to_string())),
            }
        }

        let content_length = content_length.ok_or(CodecError::MalformedContentLength)?;
        if content_length > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: content_length,
                max: self.max_message_size,
            });
        }

        let mut body = vec![0; content_length];
        self.input.read_exact(&mut body)?;
        let body = std::str::from_utf8(&body).map_err(|_| CodecError::InvalidUtf8)?;
        let message = serde_json::from_str(body).map_err(CodecError::JsonDeserialize)?;
        Ok(Some(message))
    }
}

/// Write one framed message and flush.
pub fn write_message<W: Write, T: Serialize>(output: &mut W, message: &T) -> Result<(), CodecError> {
    let body = serde_json::to_vec(message).map_err(CodecError::JsonSerialize)?;
    write!(output, "Content-Length: {}\r\n\r\n", body.len())?;
    output.write_all(&body)?;
    output.flush()?;
    Ok(())
}
