//! Static and caller-supplied configuration: timeouts, DoH providers, the
//! embedded modulus-signing key, and the primary/alternative pin tables.
//!
//! Process-wide configuration *loading* (env vars, config files) is out of
//! scope per the specification's non-goals; callers construct a
//! [`SessionConfig`] directly and pass it to [`crate::session::Session::new`].

use std::time::Duration;

/// Connect+read timeout applied to ordinary API requests, unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-DoH-request connect timeout (§4.5).
pub const DOH_CONNECT_TIMEOUT: Duration = Duration::from_millis(3050);

/// Per-DoH-request read timeout (§4.5).
pub const DOH_READ_TIMEOUT: Duration = Duration::from_millis(16950);

/// Overall deadline across every DoH provider for a single encoded name (§4.5).
pub const DOH_OVERALL_DEADLINE: Duration = Duration::from_secs(20);

/// How long a discovered alternative route is trusted before re-probing (§4.4).
pub const ALT_ROUTE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// DNS-over-HTTPS providers queried concurrently, in no particular order.
pub const DNS_HOSTS: &[&str] = &[
    "https://dns11.quad9.net/dns-query",
    "https://dns.google/dns-query",
];

/// Well-known encoded labels queried (in order) for alternative-route TXT records.
pub const ENCODED_URLS: &[&str] = &[
    "dMMhTdOUfHcV.protonpro.xyz",
    "dMagTdOUfHcV.protonpro.xyz",
];

/// Armored OpenPGP public key used to verify the server-supplied SRP modulus.
///
/// Placeholder: real deployments embed the operator's actual signing key here.
pub const SRP_MODULUS_KEY: &str = "\
-----BEGIN PGP PUBLIC KEY BLOCK-----

mDMEYp7wiRYJKwYBBAHaRw8BAQdAkq9mE1aihDgsRQlz4dH6R6e2p9m1BQCh6v9f
QmRtAQe0IVNlc3Npb24gTW9kdWx1cyBTaWduaW5nIDxzcnBAZXhhbXBsZT4+iJYE
ExYIAD4WIQQkgJeTDwKtng9o6P1VvZ1qFbflQAUCYp7wiQIbAwUJA8JnAAULCQgH
AgYVCgkICwIEFgIDAQIeAQIXgAAKCRBVvZ1qFbflQFfWAQCe7Ns0JFg6TVe9xQ6T
h5v3NSgGvpHP9Dq1hW6Q7M5P0wEA7m3tHnMi1v4g6RXAYZ2h6dQ2YpLRu+K0iRXA
jqQHBA24OARinvCJEgorBgEEAZdVAQUBAQdAZW5FvHfytQ6Vd3/qN4i9OqjzQfv8
0yQx1y0k0q2tlBwDAQgHiH4EGBYIACYWIQQkgJeTDwKtng9o6P1VvZ1qFbflQAUC
Yp7wiQIbDAUJA8JnAAAKCRBVvZ1qFbflQMBIAQDEXjH83xlYV2yv2b8KCqLR4QKc
5yOlT2y7xk3Xh7lRGgEA0Cji2vqf1H6ZPZnKz2B8P5FnFvXrN6hODtNq6hw7Bg0=
=Ab12
-----END PGP PUBLIC KEY BLOCK-----
";

/// Hex fingerprint (case-insensitive) the modulus signature's signer must match.
pub const SRP_MODULUS_KEY_FINGERPRINT: &str = "248097930f02ad9e0f68e8fd55bd9d6a15b7e540";

/// `RedirectURI` sent with `/auth/refresh` (§4.8); fixed by the reference
/// implementation rather than derived from anything caller-supplied.
pub const REFRESH_REDIRECT_URI: &str = "http://protonmail.ch";

/// Caller-tunable knobs that do not need a static default.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connect+read timeout for ordinary (non-DoH) API requests.
    pub timeout: Duration,
    /// `x-pm-appversion`-equivalent header value.
    pub app_version: String,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Optional proxy URL. Mutually exclusive with TLS pinning (§4.1).
    pub proxy: Option<String>,
    /// DoH providers queried for alternative routes, in no particular order.
    /// Defaults to [`DNS_HOSTS`]; overridable so tests can point discovery at
    /// a mock server instead of the real providers.
    pub doh_providers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            app_version: "Other".to_string(),
            user_agent: "None".to_string(),
            proxy: None,
            doh_providers: DNS_HOSTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}
