//! Error taxonomy for the session core.
//!
//! One `thiserror` enum covers every failure mode named in the specification:
//! policy misconfiguration, transport-level failures, TLS pin mismatches,
//! exhausted alternative routing, application-level API errors, and SRP/PGP
//! authentication failures. Transport errors are the only ones ever retried
//! (via alternative routing) and only by [`crate::request_engine`]; every
//! other variant propagates straight to the caller.

use std::collections::HashMap;

use thiserror::Error;

/// Errors surfaced by this crate.
#[derive(Error, Debug)]
pub enum SessionError {
    /// `allow_alt` was never set before a request was attempted.
    #[error("alternative routing policy not configured before making API requests")]
    PolicyNotConfigured,

    /// TCP/TLS connection could not be established.
    #[error("connection error: {0}")]
    NewConnection(String),

    /// The request did not complete before its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The TLS handshake completed but no pinned SPKI digest matched.
    ///
    /// Built directly by [`crate::request_engine`] from the pin diagnostic
    /// [`crate::transport::Transport`] records during the failed handshake —
    /// never produced by [`From<reqwest::Error>`], which has no way to tell a
    /// pin mismatch apart from any other TLS failure. Never retried against
    /// the same host.
    #[error("TLS pin mismatch for host {host}: observed {observed:?}")]
    TlsPinning {
        /// Host the handshake was attempted against.
        host: String,
        /// SHA-256 SPKI digests observed in the presented chain, base64-encoded.
        observed: Vec<String>,
    },

    /// All alternative-routing candidates were exhausted without success.
    #[error("network error: no reachable route (original or alternative)")]
    NetworkError,

    /// The application envelope carried a `Code` outside of the success set.
    #[error("API error {code}: {message}")]
    ApiError {
        /// `Code` field from the envelope, or the HTTP status for non-JSON bodies.
        code: i64,
        /// `Error`/reason string.
        message: String,
        /// Response headers, flattened to strings, for caller inspection.
        headers: HashMap<String, String>,
        /// `Details.HumanVerificationToken`, present only when `code == 9001`
        /// (§4.6 point 7) — [`crate::session::Session`] captures this for
        /// later use and clears it again on `code == 12087`.
        human_verification_token: Option<String>,
    },

    /// The server-supplied modulus failed PGP verification.
    #[error("invalid modulus: {0}")]
    InvalidModulus(String),

    /// The server's SRP challenge could not be processed (e.g. `B ≡ 0 mod N`).
    #[error("invalid SRP challenge")]
    InvalidChallenge,

    /// `/auth` succeeded at the transport level but returned no `ServerProof`.
    #[error("invalid password")]
    InvalidPassword,

    /// The server's proof did not match the client's computed value.
    #[error("invalid server proof")]
    InvalidServerProof,

    /// `/auth/info` reported an SRP version this crate does not implement.
    #[error("unsupported SRP auth version: {0}")]
    UnsupportedAuthVersion(i64),

    /// Caller passed a method string outside `{get, post, put, delete, patch}`.
    #[error("unknown HTTP method: {0}")]
    BadMethod(String),

    /// A required runtime dependency (e.g. a configured DoH provider) is missing.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// Catch-all for transport failures that don't fit the other variants.
    #[error("unknown connection error: {0}")]
    Unknown(String),
}

/// Result type alias used throughout this crate.
pub type SessionResult<T> = Result<T, SessionError>;

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Unknown(format!("JSON error: {err}"))
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SessionError::Timeout(err.to_string())
        } else if err.is_connect() {
            SessionError::NewConnection(err.to_string())
        } else {
            SessionError::Unknown(err.to_string())
        }
    }
}
