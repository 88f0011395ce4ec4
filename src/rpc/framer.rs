use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

/// Read half of a framer. The peer's reader task owns this exclusively.
#[async_trait]
pub trait FrameRead: Send {
    /// Reads the next frame. Returns [`Error::Eof`] when the stream is
    /// exhausted; never returns an empty frame as success.
    async fn read_frame(&mut self) -> Result<Vec<u8>>;
}

/// Write half of a framer. The peer's writer task owns this exclusively.
#[async_trait]
pub trait FrameWrite: Send {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Line-delimited JSON framing: one JSON object per `\n`-terminated line.
pub struct LineFramer;

impl LineFramer {
    /// Splits a duplex byte stream into line-framed read and write halves.
    pub fn split<S>(stream: S) -> (LineFrameReader<io::ReadHalf<S>>, LineFrameWriter<io::WriteHalf<S>>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = io::split(stream);
        (
            LineFrameReader {
                reader: BufReader::new(read),
            },
            LineFrameWriter { writer: write },
        )
    }
}

pub struct LineFrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Send + Unpin> LineFrameReader<R> {
    pub fn new(read: R) -> Self {
        Self {
            reader: BufReader::new(read),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Send + Unpin> FrameRead for LineFrameReader<R> {
    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = self.reader.read_until(b'\n', &mut buf).await?;
            if n == 0 {
                return Err(Error::Eof);
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            if !buf.is_empty() {
                return Ok(buf);
            }
        }
    }
}

pub struct LineFrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Send + Unpin> LineFrameWriter<W> {
    pub fn new(write: W) -> Self {
        Self { writer: write }
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> FrameWrite for LineFrameWriter<W> {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.contains(&b'\n') {
            return Err(Error::InvalidContent);
        }
        let mut buf = sanitize_utf8(frame);
        buf.push(b'\n');
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Drops invalid UTF-8 sequences from the payload, keeping everything else.
fn sanitize_utf8(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut rest = input;
    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(_) => {
                out.extend_from_slice(rest);
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.extend_from_slice(&rest[..valid]);
                let skip = e.error_len().unwrap_or(rest.len() - valid);
                rest = &rest[valid + skip..];
            }
        }
    }
    out
}
