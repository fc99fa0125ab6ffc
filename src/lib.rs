//! Halcyon Session Core
//!
//! Client-side session library: SRP-6a authentication against a
//! server-dictated group, TLS transport pinned to known SPKI digests, and
//! DNS-over-HTTPS discovery of an alternative API host when the primary one
//! is unreachable.
//!
//! - **srp**: SRP-6a client, password-hash expansion, session-key derivation
//! - **pgp**: verifies the server-supplied SRP modulus is signed by the
//!   embedded key before it is ever used
//! - **pins** / **transport**: certificate pinning and the pinned HTTPS client
//! - **doh** / **route_cache**: alternative-host discovery and caching
//! - **request_engine**: dispatch + alt-routing retry policy
//! - **session**: the public `Session` type tying all of the above together
//!
//! Callers construct a [`Session`], authenticate, and issue requests through
//! it; everything below that is an implementation detail.

pub mod config;
pub mod doh;
pub mod error;
pub mod logger;
pub mod pgp;
pub mod pins;
pub mod request_engine;
pub mod route_cache;
pub mod session;
pub mod srp;
pub mod transport;

pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use logger::{NullObserver, SessionEvent, SessionObserver, TracingObserver};
pub use session::{ApiBody, Session, SessionData, SessionDump};
