//! Pluggable structured-event logging.
//!
//! The core never decides *where* events go — that's an external collaborator
//! (spec §1's non-goals). It only ever emits through a [`SessionObserver`].
//! [`TracingObserver`] is the default: it forwards every event to `tracing` at
//! an appropriate level, so a caller who does nothing still gets useful
//! output through whatever `tracing` subscriber they've installed.

use std::fmt;

/// One structured event the session core can emit.
#[derive(Debug, Clone)]
pub enum SessionEvent<'a> {
    /// A request is being attempted against `url`.
    RequestStarted { url: &'a str, method: &'a str },
    /// A transport-level failure occurred and alt-routing may be attempted.
    TransportFailed { url: &'a str, reason: &'a str },
    /// The liveness probe (`/tests/ping`) returned `reachable`.
    LivenessProbe { reachable: bool },
    /// A DoH provider was queried.
    DohQuery { provider: &'a str, encoded_name: &'a str },
    /// An alternative host was tried during the alt-routing retry loop.
    AltRouteAttempt { host: &'a str, succeeded: bool },
    /// An alternative route was persisted to the route cache.
    AltRouteStored { host: &'a str },
    /// A TLS handshake was aborted due to a pin mismatch.
    PinMismatch { host: &'a str },
    /// Authentication completed (successfully or not).
    AuthResult { username: &'a str, ok: bool },
}

impl fmt::Display for SessionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::RequestStarted { url, method } => {
                write!(f, "{method} {url}")
            }
            SessionEvent::TransportFailed { url, reason } => {
                write!(f, "transport failure against {url}: {reason}")
            }
            SessionEvent::LivenessProbe { reachable } => {
                write!(f, "liveness probe: reachable={reachable}")
            }
            SessionEvent::DohQuery { provider, encoded_name } => {
                write!(f, "DoH query {encoded_name} via {provider}")
            }
            SessionEvent::AltRouteAttempt { host, succeeded } => {
                write!(f, "alt route {host}: succeeded={succeeded}")
            }
            SessionEvent::AltRouteStored { host } => {
                write!(f, "stored alt route {host}")
            }
            SessionEvent::PinMismatch { host } => {
                write!(f, "pin mismatch for {host}")
            }
            SessionEvent::AuthResult { username, ok } => {
                write!(f, "authenticate({username}): ok={ok}")
            }
        }
    }
}

/// Receives structured events emitted by the session core.
///
/// Implementations must not block meaningfully; the core calls this
/// synchronously from request-handling code paths.
pub trait SessionObserver: Send + Sync {
    /// Handle one emitted event.
    fn on_event(&self, event: SessionEvent<'_>);
}

/// Default observer: forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: SessionEvent<'_>) {
        match &event {
            SessionEvent::PinMismatch { .. } | SessionEvent::TransportFailed { .. } => {
                tracing::warn!(%event, "session event");
            }
            SessionEvent::AuthResult { ok: false, .. } => {
                tracing::warn!(%event, "session event");
            }
            _ => tracing::debug!(%event, "session event"),
        }
    }
}

/// Observer that discards every event. Useful for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: SessionEvent<'_>) {}
}
