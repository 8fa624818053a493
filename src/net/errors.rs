//! Classification of connection-level failures.
//!
//! Peers routinely hang up mid-handshake or mid-response; those failures are
//! expected churn and only logged at debug level. Anything else is a real
//! fault and is logged with its full error chain.

use std::io::ErrorKind;

/// True for errors that mean "the peer went away".
///
/// The set is: broken pipe, connection aborted, errno 0, TLS EOF and any
/// TLS-layer error surfaced through `io::Error`.
pub fn is_acceptable(err: &std::io::Error) -> bool {
    if matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof
    ) {
        return true;
    }
    if err.raw_os_error() == Some(0) {
        return true;
    }
    err.get_ref()
        .map(|inner| inner.is::<rustls::Error>())
        .unwrap_or(false)
}

/// Same classification for HTTP/2 connection errors.
pub fn is_acceptable_h2(err: &h2::Error) -> bool {
    if err.is_go_away() && err.is_remote() {
        return true;
    }
    err.get_io().map(is_acceptable).unwrap_or(false)
}

/// Log a connection failure at the level its classification calls for.
pub fn log_connection_error(connection_id: impl std::fmt::Display, err: &std::io::Error) {
    if is_acceptable(err) {
        tracing::debug!(connection_id = %connection_id, error = %err, "Peer disconnected");
    } else {
        tracing::error!(
            connection_id = %connection_id,
            error = %crate::http::error::error_chain(err),
            details = ?err,
            "Connection failed"
        );
    }
}
