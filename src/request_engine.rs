//! Request Engine (§4.6, §4.7): dispatches one API call, classifies
//! transport failures, and — when alternative routing is enabled — retries
//! through a DoH-discovered host before giving up.
//!
//! This module owns no authentication state; it only knows how to get bytes
//! to and from the API given a base URL, a method, a path, and a body.
//! [`crate::session::Session`] is the only caller.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use serde_json::Value;
use url::Url;

use crate::config::SessionConfig;
use crate::doh;
use crate::error::{SessionError, SessionResult};
use crate::logger::{SessionEvent, SessionObserver};
use crate::pins::{PinSet, ALT_PINS, PRIMARY_PINS};
use crate::route_cache;
use crate::transport::{PinScope, Transport};

/// Sentinel application codes the reference implementation treats specially,
/// regardless of HTTP status (§4.6).
const CODE_SUCCESS: i64 = 1000;
const CODE_MULTIPLE_SESSIONS: i64 = 9001;
const CODE_HUMAN_VERIFICATION_REQUIRED: i64 = 12087;

/// One API response: either a decoded JSON envelope, or — for a 2xx status
/// whose body failed to parse as JSON (§9) — the raw bytes the server sent.
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    pub raw_body: Option<Vec<u8>>,
    pub headers: HashMap<String, String>,
}

impl ApiResponse {
    fn code(&self) -> i64 {
        self.body
            .get("Code")
            .and_then(Value::as_i64)
            .unwrap_or(self.status as i64)
    }

    fn is_success(&self) -> bool {
        self.code() == CODE_SUCCESS || (200..300).contains(&self.status)
    }
}

/// Whether alternative routing is permitted. `Unset` is the starting state
/// and is distinct from `Disabled`: a caller that never calls
/// [`RequestEngine::set_allow_alt`] has not made a decision at all, and
/// [`RequestEngine::api_request`] refuses to guess (§8 invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum AltRoutingPolicy {
    #[default]
    Unset,
    Enabled,
    Disabled,
}

/// Dispatches requests against a fixed original host, retrying through an
/// alternative host discovered via DoH when the original is unreachable.
pub struct RequestEngine {
    original_base: Url,
    config: SessionConfig,
    allow_alt: AltRoutingPolicy,
    force_skip_alt: bool,
    cookie_jar: Arc<Jar>,
}

impl RequestEngine {
    pub fn new(original_base: Url, config: SessionConfig) -> Self {
        Self {
            original_base,
            config,
            allow_alt: AltRoutingPolicy::Unset,
            force_skip_alt: false,
            cookie_jar: Arc::new(Jar::default()),
        }
    }

    pub fn set_allow_alt(&mut self, allow: bool) {
        self.allow_alt = if allow {
            AltRoutingPolicy::Enabled
        } else {
            AltRoutingPolicy::Disabled
        };
    }

    pub fn set_force_skip_alt(&mut self, force: bool) {
        self.force_skip_alt = force;
    }

    pub fn base_url(&self) -> &Url {
        &self.original_base
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current cookies held for the original host, as `name -> value` pairs
    /// (spec §3's "cookies" map; per-attribute detail isn't retrievable back
    /// out of `reqwest`'s jar, so only the name/value the server set is kept).
    pub fn cookies(&self) -> HashMap<String, String> {
        let Some(header) = self.cookie_jar.cookies(&self.original_base) else {
            return HashMap::new();
        };
        let Ok(header) = header.to_str() else {
            return HashMap::new();
        };
        header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Re-seed the cookie jar from a previously dumped session (§4.8 `load`).
    pub fn seed_cookies(&self, cookies: &HashMap<String, String>) {
        for (name, value) in cookies {
            self.cookie_jar
                .add_cookie_str(&format!("{name}={value}"), &self.original_base);
        }
    }

    fn host(&self) -> String {
        self.original_base.host_str().unwrap_or_default().to_string()
    }

    /// Issue one request, with headers and an optional JSON body, applying
    /// the alt-routing retry policy (§4.7).
    pub async fn api_request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        extra_headers: &HashMap<String, String>,
        observer: &dyn SessionObserver,
    ) -> SessionResult<ApiResponse> {
        let allow_alt = match self.allow_alt {
            AltRoutingPolicy::Unset => return Err(SessionError::PolicyNotConfigured),
            AltRoutingPolicy::Enabled => true,
            AltRoutingPolicy::Disabled => false,
        };

        let host = self.host();
        let try_original = route_cache::try_original_url(&host, allow_alt, self.force_skip_alt);

        if try_original {
            match self
                .dispatch(&self.original_base, PinScope::Primary, &PRIMARY_PINS, method, path, body.clone(), extra_headers, observer)
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) if is_transport_failure(&err) => {
                    observer.on_event(SessionEvent::TransportFailed {
                        url: self.original_base.as_str(),
                        reason: &err.to_string(),
                    });
                    if !allow_alt || self.force_skip_alt {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        self.retry_via_alternative(method, path, body, extra_headers, observer)
            .await
    }

    /// §4.7: the original host is unreachable (or a cached alt route already
    /// exists); probe liveness, discover (or reuse) an alternative host, and
    /// retry there. Exhausting every option surfaces [`SessionError::NetworkError`].
    async fn retry_via_alternative(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        extra_headers: &HashMap<String, String>,
        observer: &dyn SessionObserver,
    ) -> SessionResult<ApiResponse> {
        let host = self.host();

        if let Some(cached) = route_cache::get_alternative_url(&host) {
            if let Ok(alt_base) = Url::parse(&cached) {
                match self
                    .dispatch(&alt_base, PinScope::Alternative, &ALT_PINS, method, path, body.clone(), extra_headers, observer)
                    .await
                {
                    Ok(response) => {
                        observer.on_event(SessionEvent::AltRouteAttempt { host: &host, succeeded: true });
                        return Ok(response);
                    }
                    Err(_) => {
                        route_cache::invalidate(&host);
                        observer.on_event(SessionEvent::AltRouteAttempt { host: &host, succeeded: false });
                    }
                }
            }
        }

        let reachable = self.probe_liveness(observer).await;
        observer.on_event(SessionEvent::LivenessProbe { reachable });
        if reachable {
            // The original host answers after all; nothing alternative to try.
            return Err(SessionError::NetworkError);
        }

        let providers: Vec<&str> = self.config.doh_providers.iter().map(String::as_str).collect();
        let candidates = doh::discover_alternative_hosts(&providers, observer).await;

        // §4.7 step 2: try every discovered host in turn; persist and return on
        // the first that works, log and continue past any failure, and only
        // fail with `NetworkError` once the whole set is exhausted (step 3).
        for candidate in &candidates {
            let Some(alt_base) = alt_base_url(candidate) else { continue };
            match self
                .dispatch(&alt_base, PinScope::Alternative, &ALT_PINS, method, path, body.clone(), extra_headers, observer)
                .await
            {
                Ok(response) => {
                    route_cache::store_alternative_route(&host, alt_base.to_string());
                    observer.on_event(SessionEvent::AltRouteStored { host: &host });
                    observer.on_event(SessionEvent::AltRouteAttempt { host: candidate, succeeded: true });
                    return Ok(response);
                }
                Err(_) => {
                    observer.on_event(SessionEvent::AltRouteAttempt { host: candidate, succeeded: false });
                }
            }
        }

        Err(SessionError::NetworkError)
    }

    /// Probe `/tests/ping` against the original host, bypassing alt routing
    /// for the probe itself (it would be circular otherwise). `true` means
    /// the original host is still reachable; `false` means it is not.
    async fn probe_liveness(&self, observer: &dyn SessionObserver) -> bool {
        self.dispatch(
            &self.original_base,
            PinScope::Primary,
            &PRIMARY_PINS,
            "get",
            "/tests/ping",
            None,
            &HashMap::new(),
            observer,
        )
        .await
        .is_ok()
    }

    async fn dispatch(
        &self,
        base: &Url,
        scope: PinScope,
        pins: &'static PinSet,
        method: &str,
        path: &str,
        body: Option<Value>,
        extra_headers: &HashMap<String, String>,
        observer: &dyn SessionObserver,
    ) -> SessionResult<ApiResponse> {
        let transport = Transport::build(
            scope,
            pins,
            &self.config.user_agent,
            &self.config.app_version,
            self.config.proxy.as_deref(),
            self.cookie_jar.clone(),
        )?;

        let url = base
            .join(path)
            .map_err(|e| SessionError::Unknown(format!("invalid path {path}: {e}")))?;

        let reqwest_method = parse_method(method)?;
        let mut builder = transport
            .client
            .request(reqwest_method, url)
            .timeout(self.config.timeout);

        for (key, value) in extra_headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                if let Some(diag) = transport.take_pin_diagnostic() {
                    observer.on_event(SessionEvent::PinMismatch { host: &diag.host });
                    return Err(SessionError::TlsPinning {
                        host: diag.host,
                        observed: diag.observed,
                    });
                }
                return Err(classify_reqwest_error(err));
            }
        };

        let status = response.status().as_u16();
        let reason = response
            .status()
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        let headers = flatten_headers(response.headers());
        let bytes = response.bytes().await.map_err(classify_reqwest_error)?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(body) => {
                let parsed = ApiResponse { status, body, raw_body: None, headers };
                match parsed.code() {
                    CODE_MULTIPLE_SESSIONS | CODE_HUMAN_VERIFICATION_REQUIRED => Err(parsed.into_error()),
                    _ if parsed.is_success() => Ok(parsed),
                    _ => Err(parsed.into_error()),
                }
            }
            // A 2xx with a body that isn't JSON at all is handed back to the
            // caller verbatim (§9); anything else is an opaque transport-level
            // API error, since there's no `Code`/`Error` envelope to report.
            Err(_) if (200..300).contains(&status) => Ok(ApiResponse {
                status,
                body: Value::Null,
                raw_body: Some(bytes.to_vec()),
                headers,
            }),
            Err(_) => Err(SessionError::ApiError {
                code: status as i64,
                message: reason,
                headers,
                human_verification_token: None,
            }),
        }
    }
}

/// Build the alt-route base URL for a discovered `host` (§4.7 step 2:
/// "Construct `https://<host>`"). Real DoH TXT answers are bare hostnames,
/// so this always prepends `https://`; a `host` that already carries a
/// scheme (e.g. a test double pointing at a fixed origin) is used verbatim
/// instead of being re-prefixed into something unparseable.
fn alt_base_url(host: &str) -> Option<Url> {
    if host.contains("://") {
        Url::parse(host).ok()
    } else {
        Url::parse(&format!("https://{host}")).ok()
    }
}

fn flatten_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

impl ApiResponse {
    /// §4.6 point 7: `Code=9001` carries `Details.HumanVerificationToken`,
    /// which the caller ([`crate::session::Session`]) must capture for later
    /// requests. Every other code carries no token.
    fn into_error(self) -> SessionError {
        let code = self.code();
        let message = self
            .body
            .get("Error")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        let human_verification_token = if code == CODE_MULTIPLE_SESSIONS {
            self.body
                .get("Details")
                .and_then(|d| d.get("HumanVerificationToken"))
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };
        SessionError::ApiError {
            code,
            message,
            headers: self.headers,
            human_verification_token,
        }
    }
}

fn parse_method(method: &str) -> SessionResult<reqwest::Method> {
    match method.to_ascii_lowercase().as_str() {
        "get" => Ok(reqwest::Method::GET),
        "post" => Ok(reqwest::Method::POST),
        "put" => Ok(reqwest::Method::PUT),
        "delete" => Ok(reqwest::Method::DELETE),
        "patch" => Ok(reqwest::Method::PATCH),
        other => Err(SessionError::BadMethod(other.to_string())),
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> SessionError {
    SessionError::from(err)
}

fn is_transport_failure(err: &SessionError) -> bool {
    matches!(
        err,
        SessionError::NewConnection(_) | SessionError::Timeout(_) | SessionError::TlsPinning { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_methods() {
        let err = parse_method("trace").unwrap_err();
        assert!(matches!(err, SessionError::BadMethod(m) if m == "trace"));
    }

    #[test]
    fn accepts_known_methods() {
        assert!(parse_method("GET").is_ok());
        assert!(parse_method("Post").is_ok());
    }

    #[test]
    fn success_code_or_2xx_status_both_count_as_success() {
        let by_code = ApiResponse {
            status: 400,
            body: serde_json::json!({"Code": CODE_SUCCESS}),
            raw_body: None,
            headers: HashMap::new(),
        };
        assert!(by_code.is_success());

        let by_status = ApiResponse {
            status: 204,
            body: Value::Null,
            raw_body: None,
            headers: HashMap::new(),
        };
        assert!(by_status.is_success());

        let failure = ApiResponse {
            status: 422,
            body: serde_json::json!({"Code": 2001}),
            raw_body: None,
            headers: HashMap::new(),
        };
        assert!(!failure.is_success());
    }

    #[test]
    fn into_error_carries_the_real_response_headers() {
        let mut headers = HashMap::new();
        headers.insert("x-request-id".to_string(), "abc-123".to_string());
        let response = ApiResponse {
            status: 422,
            body: serde_json::json!({"Code": 2001, "Error": "bad thing"}),
            raw_body: None,
            headers: headers.clone(),
        };
        let err = response.into_error();
        match err {
            SessionError::ApiError { headers: got, .. } => assert_eq!(got, headers),
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unset_alt_routing_policy_is_rejected_before_any_dispatch() {
        // 127.0.0.1:1 never accepts connections; if this reached `dispatch`
        // it would fail as a connection error, not `PolicyNotConfigured`.
        let engine = RequestEngine::new(Url::parse("https://127.0.0.1:1").unwrap(), SessionConfig::default());
        let result = engine
            .api_request("get", "/ping", None, &HashMap::new(), &crate::logger::NullObserver)
            .await;
        assert!(matches!(result, Err(SessionError::PolicyNotConfigured)));
    }

    #[test]
    fn transport_failures_are_classified_for_retry() {
        assert!(is_transport_failure(&SessionError::NewConnection("x".into())));
        assert!(is_transport_failure(&SessionError::Timeout("x".into())));
        assert!(is_transport_failure(&SessionError::TlsPinning {
            host: "h".into(),
            observed: vec![],
        }));
        assert!(!is_transport_failure(&SessionError::InvalidPassword));
    }
}
