//! Request bodies.
//!
//! # Responsibilities
//! - Expose request bodies to handlers as a sequence of chunks
//! - Decode HTTP/1.1 framing (Content-Length and chunked) lazily off the socket
//! - Drain whatever a handler left unread so keep-alive framing stays correct
//!
//! # Design Decisions
//! - HTTP/1.1 bodies are never buffered by the server; the handler pulls them
//! - HTTP/2 bodies arrive as DATA frames written into a per-stream pipe

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Largest chunk handed out per read from a streaming body.
const READ_CHUNK: usize = 16 * 1024;

/// Maximum length of a chunk-size line or trailer line.
const MAX_CHUNK_LINE: usize = 4096;

/// Limits on the trailer section after the last chunk.
const MAX_TRAILER_FIELDS: usize = 64;
const MAX_TRAILER_BYTES: usize = 16 * 1024;

/// A pull-based source of body bytes.
#[async_trait]
pub trait BodyReader: Send {
    /// Next chunk of the body, or `None` once the body is complete.
    async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>>;
}

/// A request body.
pub struct Body<'a> {
    source: Source<'a>,
}

enum Source<'a> {
    Empty,
    Buffered(Bytes),
    Streaming(Box<dyn BodyReader + 'a>),
}

impl<'a> Body<'a> {
    pub fn empty() -> Self {
        Self { source: Source::Empty }
    }

    pub fn buffered(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        Self {
            source: Source::Buffered(bytes),
        }
    }

    pub fn streaming(reader: impl BodyReader + 'a) -> Self {
        Self {
            source: Source::Streaming(Box::new(reader)),
        }
    }

    /// Next chunk of the body.
    pub async fn chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        // A read error leaves the body empty; the connection is unusable anyway.
        match std::mem::replace(&mut self.source, Source::Empty) {
            Source::Empty => Ok(None),
            Source::Buffered(bytes) => Ok(Some(bytes)),
            Source::Streaming(mut reader) => {
                let chunk = reader.next_chunk().await?;
                if chunk.is_some() {
                    self.source = Source::Streaming(reader);
                }
                Ok(chunk)
            }
        }
    }

    /// Read the remaining body, failing once it exceeds `limit` bytes.
    pub async fn to_bytes(&mut self, limit: usize) -> std::io::Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            if out.len() + chunk.len() > limit {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("request body exceeds {} bytes", limit),
                ));
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Discard the remaining body. Returns the number of bytes dropped.
    pub async fn drain(&mut self) -> std::io::Result<u64> {
        let mut drained = 0u64;
        while let Some(chunk) = self.chunk().await? {
            drained += chunk.len() as u64;
        }
        Ok(drained)
    }

    /// True once nothing is left to read.
    pub fn is_end(&self) -> bool {
        matches!(self.source, Source::Empty)
    }
}

impl std::fmt::Debug for Body<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Source::Empty => f.write_str("Body::Empty"),
            Source::Buffered(b) => write!(f, "Body::Buffered({} bytes)", b.len()),
            Source::Streaming(_) => f.write_str("Body::Streaming"),
        }
    }
}

/// HTTP/1.1 body framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Exactly this many bytes follow the head.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// Reads an HTTP/1.1 body directly off the connection.
pub struct Http1Body<'a, R> {
    reader: &'a mut R,
    state: ChunkState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Fixed-length body with this many bytes left.
    Remaining(u64),
    /// Expecting a chunk-size line.
    Size,
    /// Inside a chunk with this many bytes left.
    Chunk(u64),
    /// Expecting the CRLF after a chunk.
    ChunkEnd,
    Done,
}

impl<'a, R> Http1Body<'a, R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: &'a mut R, framing: Framing) -> Self {
        let state = match framing {
            Framing::Length(0) => ChunkState::Done,
            Framing::Length(n) => ChunkState::Remaining(n),
            Framing::Chunked => ChunkState::Size,
        };
        Self { reader, state }
    }

    async fn read_up_to(&mut self, n: u64) -> std::io::Result<Bytes> {
        let want = n.min(READ_CHUNK as u64) as usize;
        let mut buf = vec![0u8; want];
        let read = self.reader.read(&mut buf).await?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-body",
            ));
        }
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }

    async fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = Vec::new();
        let read = (&mut *self.reader)
            .take(MAX_CHUNK_LINE as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 || !line.ends_with(b"\n") {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "truncated chunk framing line",
            ));
        }
        let text = String::from_utf8_lossy(&line);
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Consume the trailer section up to its terminating empty line.
    async fn skip_trailers(&mut self) -> std::io::Result<()> {
        let mut fields = 0;
        let mut bytes = 0;
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                return Ok(());
            }
            fields += 1;
            bytes += line.len();
            if fields > MAX_TRAILER_FIELDS || bytes > MAX_TRAILER_BYTES {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "trailer section too large",
                ));
            }
        }
    }
}

#[async_trait]
impl<R> BodyReader for Http1Body<'_, R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            match self.state {
                ChunkState::Done => return Ok(None),
                ChunkState::Remaining(n) => {
                    let chunk = self.read_up_to(n).await?;
                    let left = n - chunk.len() as u64;
                    self.state = if left == 0 {
                        ChunkState::Done
                    } else {
                        ChunkState::Remaining(left)
                    };
                    return Ok(Some(chunk));
                }
                ChunkState::Size => {
                    let line = self.read_line().await?;
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.skip_trailers().await?;
                        self.state = ChunkState::Done;
                        return Ok(None);
                    }
                    self.state = ChunkState::Chunk(size);
                }
                ChunkState::Chunk(n) => {
                    let chunk = self.read_up_to(n).await?;
                    let left = n - chunk.len() as u64;
                    self.state = if left == 0 {
                        ChunkState::ChunkEnd
                    } else {
                        ChunkState::Chunk(left)
                    };
                    return Ok(Some(chunk));
                }
                ChunkState::ChunkEnd => {
                    if !self.read_line().await?.is_empty() {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "missing CRLF after chunk",
                        ));
                    }
                    self.state = ChunkState::Size;
                }
            }
        }
    }
}

fn parse_chunk_size(line: &str) -> std::io::Result<u64> {
    let digits = line.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(digits, 16).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid chunk size {:?}", line),
        )
    })
}
