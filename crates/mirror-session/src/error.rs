use std::io;

use thiserror::Error;

/// Errors surfaced by the session engine.
///
/// Construction failures (`InvalidAddress`, `InvalidKeyMaterial`) mean no
/// session exists. `Socket` is fatal to a start attempt; the caller may retry
/// with a fresh session. `Stream` terminates the worker loop only — the
/// session object stays valid and must still be stopped or dropped.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid remote address length {0} (expected 4 or 16)")]
    InvalidAddress(usize),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(&'static str),

    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),

    #[error("stream failed: {0}")]
    Stream(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
