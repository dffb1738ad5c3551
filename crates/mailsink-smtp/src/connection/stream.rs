//! Line-oriented server stream with an optional TLS layer.

use crate::error::{Error, Result};
use bytes::BytesMut;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

/// Default buffer size for reading and writing.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Transport under the line framing.
#[derive(Debug)]
enum Transport<S> {
    /// Plain TCP connection.
    Plain(BufReader<S>),
    /// TLS-encrypted connection.
    Tls(Box<BufReader<TlsStream<S>>>),
}

/// One line read from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Line contents without the terminator.
    Complete(Vec<u8>),
    /// Line longer than the limit, skipped through its terminator.
    Oversized,
}

/// What to do with a line that exceeds the limit.
#[derive(Debug, Clone, Copy)]
enum Overflow {
    Fail,
    Skip,
}

/// SMTP server stream: reads lines, writes replies.
#[derive(Debug)]
pub struct SmtpStream<S> {
    transport: Transport<S>,
    write_buffer: BytesMut,
}

impl<S> SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a plain stream.
    pub fn new(stream: S) -> Self {
        Self {
            transport: Transport::Plain(BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream)),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Returns `true` once the stream is encrypted.
    pub const fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }

    /// Reads one line and strips its `\r\n` or `\n` terminator.
    ///
    /// Returns `Ok(None)` when the peer closed the connection. A final line
    /// without a terminator is returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LineTooLong`] if no terminator appears within
    /// `max_length` bytes, or an I/O error.
    pub async fn read_line(&mut self, max_length: usize) -> Result<Option<Vec<u8>>> {
        match self.read(max_length, Overflow::Fail).await? {
            Some(Line::Complete(line)) => Ok(Some(line)),
            Some(Line::Oversized) => Err(Error::LineTooLong(max_length)),
            None => Ok(None),
        }
    }

    /// Reads one line of message data.
    ///
    /// Unlike [`read_line`](Self::read_line), a line longer than
    /// `max_length` does not fail the read: its bytes are dropped up to the
    /// next line break and [`Line::Oversized`] is returned, so the stream
    /// stays in step with the client.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    pub async fn read_data_line(&mut self, max_length: usize) -> Result<Option<Line>> {
        self.read(max_length, Overflow::Skip).await
    }

    async fn read(&mut self, max_length: usize, overflow: Overflow) -> Result<Option<Line>> {
        match &mut self.transport {
            Transport::Plain(reader) => read_line_limited(reader, max_length, overflow).await,
            Transport::Tls(reader) => {
                read_line_limited(reader.as_mut(), max_length, overflow).await
            }
        }
    }

    /// Writes data to the stream and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);

        match &mut self.transport {
            Transport::Plain(reader) => {
                let stream = reader.get_mut();
                stream.write_all(&self.write_buffer).await?;
                stream.flush().await?;
            }
            Transport::Tls(reader) => {
                let stream = reader.get_mut();
                stream.write_all(&self.write_buffer).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Shuts down the write side.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        match &mut self.transport {
            Transport::Plain(reader) => reader.get_mut().shutdown().await?,
            Transport::Tls(reader) => reader.get_mut().shutdown().await?,
        }
        Ok(())
    }

    /// Gives back the plain stream when nothing is left in the read buffer.
    #[cfg(test)]
    pub(crate) fn into_plain(self) -> Option<S> {
        match self.transport {
            Transport::Plain(reader) if reader.buffer().is_empty() => Some(reader.into_inner()),
            _ => None,
        }
    }

    /// Performs the server side of a STARTTLS handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted, if the client
    /// pipelined data after `STARTTLS`, or if the handshake fails.
    pub async fn upgrade_to_tls(self, acceptor: &TlsAcceptor) -> Result<Self> {
        let reader = match self.transport {
            Transport::Plain(reader) => reader,
            Transport::Tls(_) => return Err(Error::Protocol("Already using TLS".into())),
        };

        // Plaintext sent after STARTTLS must not leak into the encrypted session.
        if !reader.buffer().is_empty() {
            return Err(Error::Protocol("Data received after STARTTLS".into()));
        }

        let tls_stream = acceptor.accept(reader.into_inner()).await?;
        Ok(Self {
            transport: Transport::Tls(Box::new(BufReader::with_capacity(
                DEFAULT_BUFFER_SIZE,
                tls_stream,
            ))),
            write_buffer: self.write_buffer,
        })
    }
}

async fn read_line_limited<R>(
    reader: &mut R,
    max_length: usize,
    overflow: Overflow,
) -> Result<Option<Line>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut oversized = false;

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(if oversized {
                Some(Line::Oversized)
            } else if line.is_empty() {
                None
            } else {
                Some(Line::Complete(line))
            });
        }

        let newline = buf.iter().position(|&b| b == b'\n');
        let end = newline.unwrap_or(buf.len());
        if !oversized {
            line.extend_from_slice(&buf[..end]);
        }
        reader.consume(newline.map_or(end, |pos| pos + 1));

        if newline.is_some() {
            if oversized {
                return Ok(Some(Line::Oversized));
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > max_length {
                return match overflow {
                    Overflow::Fail => Err(Error::LineTooLong(max_length)),
                    Overflow::Skip => Ok(Some(Line::Oversized)),
                };
            }
            return Ok(Some(Line::Complete(line)));
        }

        // One extra byte may be the `\r` of a line exactly at the limit.
        if !oversized && line.len() > max_length + 1 {
            match overflow {
                Overflow::Fail => return Err(Error::LineTooLong(max_length)),
                Overflow::Skip => {
                    oversized = true;
                    line = Vec::new();
                }
            }
        }
    }
}
