//! Per-stream request body pipe.
//!
//! DATA payloads are written into one end as the worker pops them; the
//! request body reads the other end. The pipe holds at most `capacity`
//! bytes, and writing past that is an error rather than a wait, because the
//! handler only starts reading once the request side has ended.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::http::BodyReader;

const READ_CHUNK: usize = 16 * 1024;

/// Create a pipe holding up to `capacity` body bytes.
pub(crate) fn body_pipe(capacity: usize) -> (BodyPipe, PipeBody) {
    let (writer, reader) = tokio::io::duplex(capacity.max(1));
    (
        BodyPipe {
            writer: Some(writer),
            capacity,
            written: 0,
        },
        PipeBody { reader },
    )
}

/// Write end, owned by the stream worker.
pub(crate) struct BodyPipe {
    writer: Option<DuplexStream>,
    capacity: usize,
    written: usize,
}

impl BodyPipe {
    /// Append one DATA payload.
    ///
    /// Fails with `InvalidData` once the body would exceed the capacity; the
    /// write end is closed at that point.
    pub(crate) async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.written + data.len() > self.capacity {
            self.writer = None;
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("request body exceeds {} bytes", self.capacity),
            ));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        writer.write_all(data).await?;
        self.written += data.len();
        Ok(())
    }

    /// Signal end of body to the reader.
    pub(crate) async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    pub(crate) fn written(&self) -> usize {
        self.written
    }
}

/// Read end, installed as the request body.
pub(crate) struct PipeBody {
    reader: DuplexStream,
}

#[async_trait]
impl BodyReader for PipeBody {
    async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let n = self.reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }
}
