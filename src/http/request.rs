//! Parsed requests as handlers see them.
//!
//! # Responsibilities
//! - Hold method, URL, headers and body for one request
//! - Build the absolute request URL from the target and `Host`
//! - Present HTTP/2 request heads in the same header-map shape as HTTP/1.1
//!
//! # Design Decisions
//! - Header names are always lower-case (`http::HeaderMap`)
//! - HTTP/2 pseudo-headers are folded into plain headers without the colon
//! - The URL is absolute so rewriting can touch the path while keeping query
//!   and fragment intact

use http::header::{HeaderName, HeaderValue, HOST};
use http::{HeaderMap, Method, Version};
use url::Url;

use crate::http::body::Body;
use crate::net::connection::ConnectionId;

/// Error building a request from its head.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid request target {0:?}")]
    InvalidTarget(String),
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
}

/// A request routed to a handler.
#[derive(Debug)]
pub struct Request<'a> {
    method: Method,
    url: Url,
    target: String,
    version: Version,
    headers: HeaderMap,
    protocol: Option<String>,
    connection_id: ConnectionId,
    stream_id: Option<u32>,
    body: Body<'a>,
}

impl<'a> Request<'a> {
    /// Build a request from an origin-form or absolute-form target.
    pub fn new(
        method: Method,
        target: &str,
        version: Version,
        headers: HeaderMap,
        scheme: &str,
        connection_id: ConnectionId,
    ) -> Result<Self, RequestError> {
        let url = absolute_url(target, &headers, scheme)?;
        Ok(Self {
            method,
            url,
            target: target.to_string(),
            version,
            headers,
            protocol: None,
            connection_id,
            stream_id: None,
            body: Body::empty(),
        })
    }

    /// Build a request from an HTTP/2 stream's opening HEADERS.
    pub fn from_h2(
        view: H2HeaderView,
        connection_id: ConnectionId,
        stream_id: u32,
    ) -> Result<Self, RequestError> {
        let scheme = view.scheme.clone().unwrap_or_else(|| "https".to_string());
        let url = absolute_url(&view.target, &view.headers, &scheme)?;
        Ok(Self {
            method: view.method,
            url,
            target: view.target,
            version: Version::HTTP_2,
            headers: view.headers,
            protocol: view.protocol,
            connection_id,
            stream_id: Some(stream_id),
            body: Body::empty(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    /// The request target exactly as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// First value of a header as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The extended CONNECT `:protocol`, if any.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn stream_id(&self) -> Option<u32> {
        self.stream_id
    }

    pub fn body(&mut self) -> &mut Body<'a> {
        &mut self.body
    }

    pub fn set_body(&mut self, body: Body<'a>) {
        self.body = body;
    }

    /// Whether the client asked for the connection to close after this request.
    pub fn wants_close(&self) -> bool {
        let connection = self
            .header("connection")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();
        match self.version {
            Version::HTTP_10 => !connection.split(',').any(|t| t.trim() == "keep-alive"),
            _ => connection.split(',').any(|t| t.trim() == "close"),
        }
    }
}

fn absolute_url(target: &str, headers: &HeaderMap, scheme: &str) -> Result<Url, RequestError> {
    if target.starts_with('/') {
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or("localhost");
        let mut url = Url::parse(&format!("{}://{}/", scheme, host))
            .or_else(|_| Url::parse(&format!("{}://localhost/", scheme)))
            .map_err(|_| RequestError::InvalidTarget(target.to_string()))?;
        // The target is always a path here, even when it starts with "//".
        let (rest, fragment) = match target.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (target, None),
        };
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        url.set_path(path);
        url.set_query(query);
        url.set_fragment(fragment);
        Ok(url)
    } else if target == "*" {
        absolute_url("/", headers, scheme)
    } else {
        Url::parse(target)
            .ok()
            .filter(|u| u.has_host())
            // authority-form, as sent with CONNECT
            .or_else(|| Url::parse(&format!("{}://{}/", scheme, target)).ok())
            .filter(|u| u.has_host())
            .ok_or_else(|| RequestError::InvalidTarget(target.to_string()))
    }
}

/// HTTP/1-style view of an HTTP/2 request head.
///
/// Built once per stream from the decoded HEADERS frame.
#[derive(Debug, Clone)]
pub struct H2HeaderView {
    pub method: Method,
    pub target: String,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub protocol: Option<String>,
    pub headers: HeaderMap,
}

impl H2HeaderView {
    /// Fold the request head into a single lower-case header map.
    pub fn from_parts(
        parts: &http::request::Parts,
        protocol: Option<&str>,
    ) -> Result<Self, RequestError> {
        let method = parts.method.clone();
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let scheme = parts.uri.scheme_str().map(str::to_string);
        let authority = parts.uri.authority().map(|a| a.as_str().to_string());

        let mut headers = parts.headers.clone();
        let pseudo = [
            ("method", Some(method.as_str())),
            ("path", parts.uri.path_and_query().map(|pq| pq.as_str())),
            ("authority", authority.as_deref()),
            ("scheme", scheme.as_deref()),
            ("protocol", protocol),
        ];
        for (name, value) in pseudo {
            if let Some(value) = value {
                let value =
                    HeaderValue::from_str(value).map_err(|_| RequestError::InvalidHeader(name))?;
                headers.insert(HeaderName::from_static(name), value);
            }
        }

        if !headers.contains_key(HOST) {
            if let Some(authority) = &authority {
                let value = HeaderValue::from_str(authority)
                    .map_err(|_| RequestError::InvalidHeader("host"))?;
                headers.insert(HOST, value);
            }
        }

        Ok(Self {
            method,
            target,
            scheme,
            authority,
            protocol: protocol.map(str::to_string),
            headers,
        })
    }
}
