//! Error types for the localhost service.
//!
//! # Design
//! Only two kinds of fault ever reach the host: a bad configuration at
//! startup and a malformed state buffer at reconstruction. Everything that goes wrong while
//! serving a guest call is a `BridgeError`, which is folded into an ordinary
//! response with a status code instead of escaping as a fault.

use thiserror::Error;

use crate::packet::HEADER_SIZE;

/// Faults reported to the host.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The origin URL is missing, relative, or has no host.
    #[error("localhost URL is invalid: {0}")]
    Config(String),

    /// A non-empty state buffer is shorter than one packet header.
    #[error("state buffer is too short: {len} bytes, header is {}", HEADER_SIZE)]
    InvalidState { len: usize },

    /// A state buffer's length field holds neither suspend marker.
    #[error("state buffer has unknown suspend marker {0}")]
    UnknownMarker(u32),
}

/// Malformed table encodings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A field header or value runs past the end of the buffer.
    #[error("table is truncated")]
    Truncated,

    /// A string field is not valid UTF-8.
    #[error("field {tag} is not valid UTF-8")]
    Utf8 { tag: u8 },

    /// A scalar field has the wrong width for its type.
    #[error("field {tag} has size {len}, expected {expected}")]
    FieldSize { tag: u8, len: usize, expected: usize },
}

/// Failures while serving a guest HTTP call. Each one is answered with a
/// status code; none of them aborts the call.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The guest URI does not parse.
    #[error("invalid request URI: {0}")]
    ClientUri(String),

    /// The guest URI names a scheme or authority of its own.
    #[error("request URI targets a foreign host: {0}")]
    ClientHostMismatch(String),

    /// The upstream round-trip failed before a response head arrived.
    #[error("upstream transport failed: {0}")]
    UpstreamTransport(String),

    /// The response head arrived but the body could not be read in full.
    #[error("upstream body read failed: {0}")]
    UpstreamRead(String),
}

impl BridgeError {
    /// Status code the guest sees in place of this error.
    pub fn status_code(&self) -> i32 {
        match self {
            BridgeError::ClientUri(_) | BridgeError::ClientHostMismatch(_) => 400,
            BridgeError::UpstreamTransport(_) => 502,
            BridgeError::UpstreamRead(_) => 500,
        }
    }
}
