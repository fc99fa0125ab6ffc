//! Session Manager (§4.8): the crate's public surface. Owns credential
//! state (`UID`, tokens, scope), drives the SRP handshake against
//! `/auth/info` → `/auth`, and exposes the alt-routing policy knobs that
//! [`crate::request_engine::RequestEngine`] consults on every call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::config::{SessionConfig, REFRESH_REDIRECT_URI, SRP_MODULUS_KEY, SRP_MODULUS_KEY_FINGERPRINT};
use crate::error::{SessionError, SessionResult};
use crate::logger::{SessionEvent, SessionObserver, TracingObserver};
use crate::pgp::PgpVerifier;
use crate::request_engine::RequestEngine;
use crate::srp::SrpClientSession;

/// Everything needed to resume a session without re-authenticating (§3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionData {
    pub uid: String,
    pub access_token: String,
    pub refresh_token: String,
    pub password_mode: i64,
    pub scope: Vec<String>,
}

/// The full persisted blob (§6 "Dump format"): `api_url`/`appversion`/
/// `User-Agent` so [`Session::load`] can reconstruct identical standard
/// headers, the cookie jar contents, and `session_data` (empty pre-auth).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionDump {
    pub api_url: String,
    pub appversion: String,
    #[serde(rename = "User-Agent")]
    pub user_agent: String,
    pub cookies: HashMap<String, String>,
    pub session_data: Option<SessionData>,
}

/// One API response as handed back to a caller of [`Session::api_request`]:
/// either the decoded JSON envelope, or raw bytes for a 2xx response whose
/// body wasn't JSON at all (§9) — e.g. a downloadable config blob.
#[derive(Debug, Clone)]
pub enum ApiBody {
    Json(Value),
    Raw(Vec<u8>),
}

/// A client-side API session: authentication state plus the request engine
/// that routes every call through it.
pub struct Session {
    engine: RequestEngine,
    pgp: PgpVerifier,
    observer: Box<dyn SessionObserver>,
    data: Option<SessionData>,
    human_verification_token: Option<String>,
    captcha_url: Option<String>,
}

impl Session {
    /// Build a new, unauthenticated session against `api_base` (e.g.
    /// `https://api.example.com`). Alternative routing is disabled until
    /// [`Self::enable_alternative_routing`] is called (§9: callers must opt
    /// in explicitly; the engine refuses alt-routing retries otherwise).
    pub fn new(api_base: &str, config: SessionConfig) -> SessionResult<Self> {
        let base = Url::parse(api_base).map_err(|e| SessionError::Unknown(format!("invalid API base: {e}")))?;
        let pgp = PgpVerifier::new(SRP_MODULUS_KEY, SRP_MODULUS_KEY_FINGERPRINT)?;
        Ok(Self {
            engine: RequestEngine::new(base, config),
            pgp,
            observer: Box::new(TracingObserver),
            data: None,
            human_verification_token: None,
            captcha_url: None,
        })
    }

    /// Replace the default [`TracingObserver`] with a caller-supplied one.
    pub fn set_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observer = observer;
    }

    /// Restore a previously [`Self::dump`]ed session without re-authenticating.
    ///
    /// `config`'s `timeout`/`proxy` apply as usual (neither is part of the
    /// persisted blob — spec §6); `app_version`/`user_agent` are overridden
    /// from `dump` so the restored session reissues byte-identical standard
    /// headers (§8 invariant 3), and the cookie jar is re-seeded.
    pub fn load(mut config: SessionConfig, dump: SessionDump) -> SessionResult<Self> {
        config.app_version = dump.appversion;
        config.user_agent = dump.user_agent;
        let mut session = Self::new(&dump.api_url, config)?;
        session.engine.seed_cookies(&dump.cookies);
        session.data = dump.session_data;
        Ok(session)
    }

    /// Serialize the current state for later [`Self::load`] (§6 "Dump format").
    pub fn dump(&self) -> SessionDump {
        SessionDump {
            api_url: self.engine.base_url().to_string(),
            appversion: self.engine.config().app_version.clone(),
            user_agent: self.engine.config().user_agent.clone(),
            cookies: self.engine.cookies(),
            session_data: self.data.clone(),
        }
    }

    /// §4.4: enable or disable alt-routing retries on transport failure.
    /// Must be called at least once before the first [`Self::api_request`] —
    /// the engine otherwise treats the policy as unset (§9).
    pub fn enable_alternative_routing(&mut self, allow: bool) {
        self.engine.set_allow_alt(allow);
    }

    /// §4.4: force every request to skip alt-routing, overriding the allow flag.
    pub fn force_skip_alternative_routing(&mut self, force: bool) {
        self.engine.set_force_skip_alt(force);
    }

    /// Authenticate with username/password via SRP-6a (§4.8).
    ///
    /// Logs out any existing session first; a failure during that logout is
    /// swallowed (SPEC_FULL.md §B) since an unreachable server shouldn't
    /// block a fresh login attempt.
    pub async fn authenticate(&mut self, username: &str, password: &[u8]) -> SessionResult<()> {
        let _ = self.logout().await;

        let info = self
            .api_request_json("post", "/auth/info", Some(json!({ "Username": username })))
            .await?;

        let armored_modulus = info
            .get("Modulus")
            .and_then(Value::as_str)
            .ok_or(SessionError::InvalidChallenge)?;
        let modulus = self.pgp.verify_modulus(armored_modulus)?;

        let salt = info
            .get("Salt")
            .and_then(Value::as_str)
            .and_then(|s| base64_decode(s).ok())
            .ok_or(SessionError::InvalidChallenge)?;
        let server_ephemeral = info
            .get("ServerEphemeral")
            .and_then(Value::as_str)
            .and_then(|s| base64_decode(s).ok())
            .ok_or(SessionError::InvalidChallenge)?;
        let version = info.get("Version").and_then(Value::as_i64).unwrap_or(0);
        let srp_session_id = info
            .get("SRPSession")
            .and_then(Value::as_str)
            .ok_or(SessionError::InvalidChallenge)?
            .to_string();

        let mut srp = SrpClientSession::new(&modulus)?;
        let client_proof = srp
            .process_challenge(password, username, &salt, &server_ephemeral, version)?
            .ok_or(SessionError::InvalidChallenge)?;

        let auth_result = self
            .api_request_json(
                "post",
                "/auth",
                Some(json!({
                    "Username": username,
                    "ClientEphemeral": base64_encode(srp.get_challenge()),
                    "ClientProof": base64_encode(&client_proof),
                    "SRPSession": srp_session_id,
                })),
            )
            .await;

        let auth_result = match auth_result {
            Ok(body) => body,
            Err(err) => {
                self.observer.on_event(SessionEvent::AuthResult { username, ok: false });
                return Err(err);
            }
        };

        let server_proof = auth_result
            .get("ServerProof")
            .and_then(Value::as_str)
            .and_then(|s| base64_decode(s).ok())
            .ok_or(SessionError::InvalidPassword)?;

        if !srp.verify_session(&server_proof) {
            self.observer.on_event(SessionEvent::AuthResult { username, ok: false });
            return Err(SessionError::InvalidServerProof);
        }

        self.captcha_url = auth_result
            .get("Details")
            .and_then(|d| d.get("HumanVerificationURL"))
            .and_then(Value::as_str)
            .map(str::to_string);

        self.data = Some(SessionData {
            uid: field_str(&auth_result, "UID")?,
            access_token: field_str(&auth_result, "AccessToken")?,
            refresh_token: field_str(&auth_result, "RefreshToken")?,
            password_mode: auth_result.get("PasswordMode").and_then(Value::as_i64).unwrap_or(1),
            scope: auth_result
                .get("Scope")
                .and_then(Value::as_str)
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        });

        self.observer.on_event(SessionEvent::AuthResult { username, ok: true });
        Ok(())
    }

    /// Submit a two-factor code against an already-authenticated session.
    pub async fn provide_2fa(&mut self, code: &str) -> SessionResult<()> {
        let response = self
            .api_request_json("post", "/auth/2fa", Some(json!({ "TwoFactorCode": code })))
            .await?;
        if let Some(data) = self.data.as_mut() {
            if let Some(scope) = response.get("Scope").and_then(Value::as_str) {
                data.scope = scope.split_whitespace().map(str::to_string).collect();
            }
        }
        Ok(())
    }

    /// Refresh the access token using the stored refresh token (§4.8).
    ///
    /// `RedirectURI` is a fixed constant the reference implementation always
    /// sends; there is no `UID` field in this request.
    pub async fn refresh(&mut self) -> SessionResult<()> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| SessionError::Unknown("no session data to refresh".to_string()))?;
        let body = json!({
            "ResponseType": "token",
            "GrantType": "refresh_token",
            "RefreshToken": data.refresh_token,
            "RedirectURI": REFRESH_REDIRECT_URI,
        });
        let response = self.api_request_json("post", "/auth/refresh", Some(body)).await?;

        if let Some(data) = self.data.as_mut() {
            data.access_token = field_str(&response, "AccessToken")?;
            data.refresh_token = field_str(&response, "RefreshToken")?;
        }
        Ok(())
    }

    /// §9: logout clears local credential state even if the server is
    /// unreachable; the remote session is best-effort.
    pub async fn logout(&mut self) -> SessionResult<()> {
        if self.data.is_none() {
            return Ok(());
        }
        let result = self.api_request("delete", "/auth", None).await;
        self.data = None;
        self.human_verification_token = None;
        self.captcha_url = None;
        result.map(|_| ())
    }

    /// The human-verification URL surfaced by the last failed/challenged
    /// authentication attempt, if any.
    pub fn captcha_url(&self) -> Option<&str> {
        self.captcha_url.as_deref()
    }

    /// Current human-verification token, attached to subsequent requests
    /// as `x-pm-human-verification-token` until cleared.
    pub fn human_verification_token(&self) -> Option<&str> {
        self.human_verification_token.as_deref()
    }

    pub fn set_human_verification_token(&mut self, token: String) {
        self.human_verification_token = Some(token);
    }

    /// Pop-semantics clear, matching the reference implementation (the
    /// header is meant to be attached to exactly one subsequent request).
    pub fn clear_human_verification_token(&mut self) {
        self.human_verification_token = None;
    }

    pub fn uid(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.uid.as_str())
    }

    pub fn access_token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.refresh_token.as_str())
    }

    pub fn password_mode(&self) -> Option<i64> {
        self.data.as_ref().map(|d| d.password_mode)
    }

    pub fn scope(&self) -> &[String] {
        self.data.as_ref().map(|d| d.scope.as_slice()).unwrap_or(&[])
    }

    /// Issue an authenticated API request, attaching `UID`/`Authorization`
    /// and any pending human-verification token.
    ///
    /// §4.6 point 7: a `Code=9001` error captures
    /// `Details.HumanVerificationToken` for the caller to attach to a
    /// follow-up request; `Code=12087` clears whatever token was cached.
    pub async fn api_request(&mut self, method: &str, path: &str, body: Option<Value>) -> SessionResult<ApiBody> {
        let mut headers = HashMap::new();
        if let Some(data) = &self.data {
            headers.insert("x-pm-uid".to_string(), data.uid.clone());
            headers.insert("Authorization".to_string(), format!("Bearer {}", data.access_token));
        }
        if let Some(token) = &self.human_verification_token {
            headers.insert("x-pm-human-verification-token".to_string(), token.clone());
        }

        self.observer.on_event(SessionEvent::RequestStarted { url: path, method });
        let result = self.engine.api_request(method, path, body, &headers, self.observer.as_ref()).await;

        match result {
            Ok(response) => Ok(match response.raw_body {
                Some(raw) => ApiBody::Raw(raw),
                None => ApiBody::Json(response.body),
            }),
            Err(SessionError::ApiError { code, message, headers, human_verification_token }) => {
                if code == 12087 {
                    self.human_verification_token = None;
                } else if let Some(token) = human_verification_token.clone() {
                    self.human_verification_token = Some(token);
                }
                Err(SessionError::ApiError { code, message, headers, human_verification_token })
            }
            Err(err) => Err(err),
        }
    }

    /// As [`Self::api_request`], for endpoints documented to always answer
    /// with a JSON envelope — every endpoint this crate itself drives
    /// (`/auth/*`) falls in this category.
    async fn api_request_json(&mut self, method: &str, path: &str, body: Option<Value>) -> SessionResult<Value> {
        match self.api_request(method, path, body).await? {
            ApiBody::Json(value) => Ok(value),
            ApiBody::Raw(_) => Err(SessionError::Unknown(format!("expected a JSON response from {path}"))),
        }
    }
}

fn field_str(body: &Value, key: &str) -> SessionResult<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SessionError::Unknown(format!("missing {key} in response")))
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(s)
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_no_credentials() {
        let session = Session::new("https://api.example.com", SessionConfig::default()).unwrap();
        assert!(session.uid().is_none());
        assert!(session.access_token().is_none());
        assert!(session.scope().is_empty());
    }

    #[test]
    fn dump_of_fresh_session_has_no_session_data() {
        let session = Session::new("https://api.example.com", SessionConfig::default()).unwrap();
        let dump = session.dump();
        assert!(dump.session_data.is_none());
        assert_eq!(dump.api_url, "https://api.example.com/");
        assert!(dump.cookies.is_empty());
    }

    #[test]
    fn load_restores_credential_state_without_a_network_call() {
        let data = SessionData {
            uid: "uid-1".to_string(),
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            password_mode: 1,
            scope: vec!["full".to_string()],
        };
        let dump = SessionDump {
            api_url: "https://api.example.com".to_string(),
            appversion: "Other".to_string(),
            user_agent: "None".to_string(),
            cookies: HashMap::new(),
            session_data: Some(data),
        };
        let session = Session::load(SessionConfig::default(), dump).unwrap();
        assert_eq!(session.uid(), Some("uid-1"));
        assert_eq!(session.access_token(), Some("access-1"));
        assert_eq!(session.scope(), &["full".to_string()]);
    }

    #[test]
    fn dump_then_load_round_trips_cookies_and_credentials() {
        let mut cookies = HashMap::new();
        cookies.insert("sess".to_string(), "abc123".to_string());
        let dump = SessionDump {
            api_url: "https://api.example.com".to_string(),
            appversion: "MyApp_1.0.0".to_string(),
            user_agent: "MyClient/1.0".to_string(),
            cookies,
            session_data: Some(SessionData {
                uid: "uid-2".to_string(),
                access_token: "access-2".to_string(),
                refresh_token: "refresh-2".to_string(),
                password_mode: 2,
                scope: Vec::new(),
            }),
        };
        let session = Session::load(SessionConfig::default(), dump.clone()).unwrap();
        let round_tripped = session.dump();
        assert_eq!(round_tripped.cookies, dump.cookies);
        assert_eq!(round_tripped.session_data.unwrap().uid, "uid-2");
        assert_eq!(round_tripped.appversion, "MyApp_1.0.0");
        assert_eq!(round_tripped.user_agent, "MyClient/1.0");
        assert!(session.scope().is_empty());
    }

    #[test]
    fn human_verification_token_round_trips() {
        let mut session = Session::new("https://api.example.com", SessionConfig::default()).unwrap();
        assert!(session.human_verification_token().is_none());
        session.set_human_verification_token("tok".to_string());
        assert_eq!(session.human_verification_token(), Some("tok"));
        session.clear_human_verification_token();
        assert!(session.human_verification_token().is_none());
    }
}
