//! Per-stream frame model.
//!
//! The reader turns every event it observes for a stream into a
//! [`StreamFrame`] and pushes it onto that stream's queue.

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use h2::{Reason, RecvStream};
use http::HeaderMap;

/// One unit of work for a stream worker.
#[derive(Debug)]
pub enum StreamFrame {
    /// Opening HEADERS of a request.
    Headers {
        parts: http::request::Parts,
        /// `:protocol` of an extended CONNECT.
        protocol: Option<String>,
        end_stream: bool,
    },
    Data {
        data: Bytes,
        end_stream: bool,
    },
    /// Trailing HEADERS; always ends the request side.
    Trailers(HeaderMap),
    /// Peer sent RST_STREAM.
    Reset(Reason),
    /// The whole connection is gone.
    ConnectionTerminated,
}

impl StreamFrame {
    /// True if no further frames will follow on this stream.
    pub fn ends_stream(&self) -> bool {
        match self {
            StreamFrame::Headers { end_stream, .. } | StreamFrame::Data { end_stream, .. } => {
                *end_stream
            }
            StreamFrame::Trailers(_) | StreamFrame::Reset(_) | StreamFrame::ConnectionTerminated => {
                true
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamFrame::Headers { .. } => "HEADERS",
            StreamFrame::Data { .. } => "DATA",
            StreamFrame::Trailers(_) => "TRAILERS",
            StreamFrame::Reset(_) => "RST_STREAM",
            StreamFrame::ConnectionTerminated => "TERMINATED",
        }
    }
}

/// Stream of `(stream_id, frame)` pairs for one request body.
///
/// Ends after the frame that closes the request side.
pub(crate) fn body_frames(stream_id: u32, body: RecvStream) -> BoxStream<'static, (u32, StreamFrame)> {
    stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        let frame = match body.data().await {
            Some(Ok(data)) => {
                let end_stream = body.is_end_stream();
                let frame = StreamFrame::Data { data, end_stream };
                return Some(((stream_id, frame), (!end_stream).then_some(body)));
            }
            Some(Err(err)) => error_frame(&err),
            None => match body.trailers().await {
                Ok(Some(trailers)) => StreamFrame::Trailers(trailers),
                Ok(None) => StreamFrame::Data {
                    data: Bytes::new(),
                    end_stream: true,
                },
                Err(err) => error_frame(&err),
            },
        };
        Some(((stream_id, frame), None))
    })
    .boxed()
}

fn error_frame(err: &h2::Error) -> StreamFrame {
    if err.is_reset() {
        StreamFrame::Reset(err.reason().unwrap_or(Reason::CANCEL))
    } else {
        StreamFrame::ConnectionTerminated
    }
}
