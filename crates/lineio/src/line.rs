use std::collections::VecDeque;

use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;
use memchr::memchr2;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

const DEFAULT_MAX_LINE_LEN: usize = 8 * 1024;
const READ_CHUNK: usize = 4096;

/// How a [`LineFramer`] treats bytes that are not yet terminated when a chunk ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// Keep the unterminated tail and complete it with later chunks.
    #[default]
    Buffered,
    /// Every chunk is assumed to hold whole lines. An unterminated tail is emitted
    /// as its own line and nothing is carried into the next chunk.
    PerChunk,
}

impl std::str::FromStr for FramingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffered" => Ok(FramingMode::Buffered),
            "per_chunk" | "per-chunk" | "chunk" => Ok(FramingMode::PerChunk),
            other => Err(format!("unknown framing mode: {other:?}")),
        }
    }
}

/// Splits byte chunks into lines terminated by `\r`, `\n` or `\r\n`.
///
/// Terminators are stripped. Empty segments between two terminators come out as
/// empty lines, so `"a\n\nb\n"` yields `"a"`, `""`, `"b"`.
#[derive(Debug)]
pub struct LineFramer {
    mode: FramingMode,
    buf: BytesMut,
    max_line_len: usize,
    // Previous chunk ended on `\r`; a leading `\n` in the next one completes that CRLF.
    after_cr: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(FramingMode::default())
    }
}

impl LineFramer {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            buf: BytesMut::with_capacity(1024),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            after_cr: false,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }

    /// Feed one chunk, returning every line it completes, in order.
    ///
    /// In buffered mode an unterminated tail longer than `max_line_len` is an
    /// `InvalidData` error.
    pub fn push(&mut self, chunk: &[u8]) -> std::io::Result<Vec<Bytes>> {
        let mut chunk = chunk;
        if std::mem::take(&mut self.after_cr) && chunk.first() == Some(&b'\n') {
            chunk = &chunk[1..];
        }
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(i) = memchr2(b'\r', b'\n', &self.buf) {
            let line = self.buf.split_to(i).freeze();
            let eol = self.buf[0];
            self.buf.advance(1);
            if eol == b'\r' {
                match self.buf.first().copied() {
                    Some(b'\n') => self.buf.advance(1),
                    Some(_) => {}
                    None => self.after_cr = true,
                }
            }
            lines.push(line);
        }

        match self.mode {
            FramingMode::PerChunk => {
                self.after_cr = false;
                if !self.buf.is_empty() {
                    lines.push(self.buf.split().freeze());
                }
            }
            FramingMode::Buffered => {
                if self.buf.len() > self.max_line_len {
                    self.buf.clear();
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "line too long",
                    ));
                }
            }
        }

        Ok(lines)
    }

    /// Bytes still waiting for a terminator (always empty in per-chunk mode).
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

/// Reads lines from an `AsyncRead` through a [`LineFramer`].
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    framer: LineFramer,
    ready: VecDeque<Bytes>,
    chunk: Box<[u8]>,
    eof: bool,
}

impl<R> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_framer(inner, LineFramer::default())
    }

    pub fn with_framer(inner: R, framer: LineFramer) -> Self {
        Self {
            inner,
            framer,
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
            eof: false,
        }
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Read one line with its terminator stripped.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` for a line (may be empty),
    /// - `Ok(None)` on clean EOF with no buffered data.
    pub async fn read_line(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                self.eof = true;
                if !self.framer.pending().is_empty() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "eof while reading line",
                    ));
                }
                continue;
            }

            let lines = self.framer.push(&self.chunk[..n])?;
            self.ready.extend(lines);
        }
    }
}
