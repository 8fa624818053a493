//! Request echo.
//!
//! Answers every request with a JSON description of what the server saw
//! after rewriting: method, path, query, headers and body.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::BytesMut;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::Serialize;

use crate::http::{HandlerError, HttpError, Request, Response};
use crate::routing::Handler;

/// Default cap on echoed bodies.
pub const DEFAULT_MAX_BODY: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
struct EchoDocument<'r> {
    method: &'r str,
    path: &'r str,
    query: Option<&'r str>,
    target: &'r str,
    version: String,
    connection_id: String,
    stream_id: Option<u32>,
    header_count: usize,
    headers: BTreeMap<String, Vec<String>>,
    body: String,
    body_length: usize,
}

/// Echoes the request back as JSON.
#[derive(Debug, Clone)]
pub struct EchoHandler {
    max_body: usize,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self {
            max_body: DEFAULT_MAX_BODY,
        }
    }

    pub fn with_max_body(max_body: usize) -> Self {
        Self { max_body }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> Result<(), HandlerError> {
        let mut body = BytesMut::new();
        while let Some(chunk) = request.body().chunk().await? {
            if body.len() + chunk.len() > self.max_body {
                return Err(HttpError::with_message(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("echo bodies are limited to {} bytes", self.max_body),
                )
                .into());
            }
            body.extend_from_slice(&chunk);
        }

        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in request.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let document = EchoDocument {
            method: request.method().as_str(),
            path: request.path(),
            query: request.query(),
            target: request.target(),
            version: format!("{:?}", request.version()),
            connection_id: request.connection_id().to_string(),
            stream_id: request.stream_id(),
            header_count: request.headers().len(),
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            body_length: body.len(),
        };
        let json = serde_json::to_vec(&document).map_err(HandlerError::other)?;

        response.set_status(StatusCode::OK);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.write(json);
        Ok(())
    }
}
