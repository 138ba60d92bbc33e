//! Framed I/O for the line protocol.
//!
//! Commands are written as `\n`-terminated lines. Replies are read line by
//! line, accepting either `\n` or `\r\n` as the terminator.

#![allow(clippy::missing_errors_doc)]

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Line-framed connection.
pub struct LineStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
}

impl<S> LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads one line without its terminator.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection. A final
    /// line the peer closed without terminating is still returned.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&buf[..pos]);
                self.reader.consume(pos + 1);
                break;
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::LineTooLong(MAX_LINE_LENGTH));
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Writes a serialized command or raw payload and flushes it.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;

        Ok(())
    }

    /// Shuts down the write half of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.reader.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_line_terminators() {
        let mock = Builder::new()
            .read(b"250 OK\r\n213 1 bob")
            .read(b" 5 17 Hi\n213 END")
            .build();
        let mut stream = LineStream::new(mock);

        assert_eq!(stream.read_line().await.unwrap().unwrap(), "250 OK");
        assert_eq!(
            stream.read_line().await.unwrap().unwrap(),
            "213 1 bob 5 17 Hi"
        );
        assert_eq!(stream.read_line().await.unwrap().unwrap(), "213 END");
        assert_eq!(stream.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_empty_line() {
        let mock = Builder::new().read(b"\n\r\n").build();
        let mut stream = LineStream::new(mock);

        assert_eq!(stream.read_line().await.unwrap().unwrap(), "");
        assert_eq!(stream.read_line().await.unwrap().unwrap(), "");
        assert_eq!(stream.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let long = vec![b'a'; MAX_LINE_LENGTH + DEFAULT_BUFFER_SIZE];
        let mock = Builder::new().read(&long).build();
        let mut stream = LineStream::new(mock);

        let result = stream.read_line().await;
        assert!(matches!(result, Err(Error::LineTooLong(MAX_LINE_LENGTH))));
    }

    #[tokio::test]
    async fn test_write_all() {
        let mock = Builder::new().write(b"NOOP\n").build();
        let mut stream = LineStream::new(mock);
        stream.write_all(b"NOOP\n").await.unwrap();
    }
}
