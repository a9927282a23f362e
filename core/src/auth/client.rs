//! Client-side HTTP authentication: proactive application of one
//! configured scheme, or reactive challenge/response on 401/407.
//!
//! Priority-ordered scheme selection and bounded retry mirror the shape
//! of the reactive path in RFC 7235 §4.1/§4.2: a client proactively
//! attaches credentials only when it already knows the server expects
//! them; otherwise it waits for a challenge and picks the
//! highest-priority scheme the server actually offered.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::AuthError;
use crate::util::hex;

/// An authentication scheme a client can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Basic,
    Bearer,
    #[cfg(feature = "smtp-auth")]
    Digest,
    OAuth,
}

/// Pre-shared or freshly minted credential material for one scheme.
#[derive(Debug, Clone)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer { token: String, expires_at_unix: Option<u64> },
    #[cfg(feature = "smtp-auth")]
    Digest { username: String, password: String },
    OAuth { token: String, refresh_token: Option<String>, expires_at_unix: Option<u64> },
}

impl Credentials {
    #[must_use]
    fn scheme(&self) -> Scheme {
        match self {
            Self::Basic { .. } => Scheme::Basic,
            Self::Bearer { .. } => Scheme::Bearer,
            #[cfg(feature = "smtp-auth")]
            Self::Digest { .. } => Scheme::Digest,
            Self::OAuth { .. } => Scheme::OAuth,
        }
    }

    /// True once the credential's timestamp has passed. Only bearer and
    /// OAuth tokens carry an expiry; other schemes never expire here.
    #[must_use]
    pub fn is_expired(&self, now_unix: u64) -> bool {
        match self {
            Self::Bearer { expires_at_unix: Some(t), .. } | Self::OAuth { expires_at_unix: Some(t), .. } => {
                now_unix >= *t
            }
            _ => false,
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// One scheme's challenge, parsed from a `WWW-Authenticate` (or
/// `Proxy-Authenticate`) field value: `Scheme param=value, param=value`.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub scheme: String,
    pub params: HashMap<String, String>,
}

/// Parse a `WWW-Authenticate`/`Proxy-Authenticate` header value into one
/// or more challenges. Only the quoted/unquoted `name=value` comma-list
/// form is handled; servers that offer multiple schemes send multiple
/// header fields, so this parses exactly one field's value.
pub fn parse_challenge(header: &str) -> Result<Challenge, AuthError> {
    let header = header.trim();
    let (scheme, rest) = header
        .split_once(char::is_whitespace)
        .ok_or_else(|| AuthError::MalformedChallenge(header.to_string()))?;

    let mut params = HashMap::new();
    for part in split_params(rest.trim()) {
        let (name, value) = part
            .split_once('=')
            .ok_or_else(|| AuthError::MalformedChallenge(format!("missing '=' in {part:?}")))?;
        let value = value.trim().trim_matches('"');
        params.insert(name.trim().to_ascii_lowercase(), value.to_string());
    }
    Ok(Challenge { scheme: scheme.to_string(), params })
}

/// Split a comma-separated `name=value` list, respecting commas inside
/// double-quoted values (RFC 7235 challenge parameters may contain
/// commas in quoted strings such as the `domain` parameter).
fn split_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = s[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

#[cfg(feature = "smtp-auth")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
    Sha512_256,
}

#[cfg(feature = "smtp-auth")]
impl DigestAlgorithm {
    fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "SHA-256" => Self::Sha256,
            "SHA-512-256" => Self::Sha512_256,
            _ => Self::Md5,
        }
    }

    fn digest_hex(self, data: &[u8]) -> String {
        match self {
            Self::Md5 => {
                use md5::{Digest, Md5};
                hex::to_hex(&Md5::digest(data))
            }
            Self::Sha256 => {
                use sha2::{Digest, Sha256};
                hex::to_hex(&Sha256::digest(data))
            }
            Self::Sha512_256 => {
                use sha2::{Digest, Sha512_256};
                hex::to_hex(&Sha512_256::digest(data))
            }
        }
    }
}

/// Per-nonce request counter for RFC 7616 Digest `nc`, tracked across
/// requests that reuse the same server nonce.
#[cfg(feature = "smtp-auth")]
#[derive(Debug, Default)]
struct NonceCounters {
    counts: HashMap<String, u32>,
}

#[cfg(feature = "smtp-auth")]
impl NonceCounters {
    fn next(&mut self, nonce: &str) -> u32 {
        let entry = self.counts.entry(nonce.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }
}

/// Orchestrates proactive and reactive authentication for one client
/// connection: a priority-ordered list of configured schemes, and a
/// bound on how many times a single request is retried with a new
/// challenge response.
pub struct ClientAuth {
    priority: Vec<Scheme>,
    credentials: HashMap<Scheme, Credentials>,
    max_retries: u32,
    #[cfg(feature = "smtp-auth")]
    nonce_counters: NonceCounters,
    #[cfg(feature = "smtp-auth")]
    cnonce_source: fn() -> String,
}

impl ClientAuth {
    #[must_use]
    pub fn new(priority: Vec<Scheme>, max_retries: u32) -> Self {
        Self {
            priority,
            credentials: HashMap::new(),
            max_retries,
            #[cfg(feature = "smtp-auth")]
            nonce_counters: NonceCounters::default(),
            #[cfg(feature = "smtp-auth")]
            cnonce_source: default_cnonce,
        }
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials.insert(credentials.scheme(), credentials);
    }

    /// Exchange the stored refresh token for a new access token via
    /// `refresh`, replacing the stored OAuth credentials on success.
    /// Called when a response (or [`Credentials::is_expired`]) signals
    /// the current token is no longer usable.
    pub fn refresh_oauth<F>(&mut self, refresh: F) -> Result<(), AuthError>
    where
        F: FnOnce(&str) -> Result<Credentials, String>,
    {
        let Some(Credentials::OAuth { refresh_token: Some(refresh_token), .. }) =
            self.credentials.get(&Scheme::OAuth)
        else {
            return Err(AuthError::RefreshFailed("no refresh token on file".into()));
        };
        let refresh_token = refresh_token.clone();
        let new_credentials = refresh(&refresh_token).map_err(AuthError::RefreshFailed)?;
        self.set_credentials(new_credentials);
        Ok(())
    }

    /// Build the `Authorization` value for a proactive request, if a
    /// configured scheme has usable (non-expired) credentials and
    /// doesn't require a server-issued nonce (Basic, Bearer, OAuth
    /// only; Digest needs a prior challenge).
    pub fn proactive_authorization(&self) -> Option<String> {
        for scheme in &self.priority {
            if matches!(scheme, Scheme::Basic | Scheme::Bearer | Scheme::OAuth) {
                if let Some(creds) = self.credentials.get(scheme) {
                    if !creds.is_expired(now_unix()) {
                        return encode_simple(creds);
                    }
                }
            }
        }
        None
    }

    /// Select a scheme from `challenges` matching the configured
    /// priority list, compute the response, and return the
    /// `Authorization` header value. `attempt` is the 1-based retry
    /// count for this request; exceeding `max_retries` is an error.
    pub fn respond(
        &mut self,
        challenges: &[Challenge],
        method: &str,
        uri: &str,
        body: &[u8],
        attempt: u32,
    ) -> Result<String, AuthError> {
        if attempt > self.max_retries {
            return Err(AuthError::RetryLimitExceeded(self.max_retries));
        }

        for scheme in &self.priority {
            let offered = challenges.iter().find(|c| scheme_matches(*scheme, &c.scheme));
            let (Some(challenge), Some(creds)) = (offered, self.credentials.get(scheme)) else {
                continue;
            };
            if creds.is_expired(now_unix()) {
                return Err(AuthError::Expired);
            }
            return match (scheme, creds) {
                (Scheme::Basic, _) | (Scheme::Bearer, _) | (Scheme::OAuth, _) => {
                    encode_simple(creds).ok_or_else(|| AuthError::NoMatchingScheme(challenge.scheme.clone()))
                }
                #[cfg(feature = "smtp-auth")]
                (Scheme::Digest, Credentials::Digest { username, password }) => {
                    self.encode_digest(challenge, username, password, method, uri, body)
                }
                #[cfg(feature = "smtp-auth")]
                (Scheme::Digest, _) => Err(AuthError::NoMatchingScheme("digest".into())),
            };
        }

        let offered: Vec<_> = challenges.iter().map(|c| c.scheme.clone()).collect();
        Err(AuthError::NoMatchingScheme(offered.join(", ")))
    }

    #[cfg(feature = "smtp-auth")]
    fn encode_digest(
        &mut self,
        challenge: &Challenge,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        body: &[u8],
    ) -> Result<String, AuthError> {
        let realm = challenge.params.get("realm").cloned().unwrap_or_default();
        let nonce = challenge
            .params
            .get("nonce")
            .cloned()
            .ok_or_else(|| AuthError::MalformedChallenge("digest challenge missing nonce".into()))?;
        let qop = challenge.params.get("qop").cloned();
        let algorithm = DigestAlgorithm::parse(challenge.params.get("algorithm").map_or("MD5", String::as_str));
        let session = challenge.params.get("algorithm").is_some_and(|a| a.ends_with("-sess"));

        let nc = self.nonce_counters.next(&nonce);
        let nc_hex = format!("{nc:08x}");
        let cnonce = (self.cnonce_source)();

        let ha1_base = format!("{username}:{realm}:{password}");
        let mut ha1 = algorithm.digest_hex(ha1_base.as_bytes());
        if session {
            ha1 = algorithm.digest_hex(format!("{ha1}:{nonce}:{cnonce}").as_bytes());
        }

        let ha2_base = if qop.as_deref() == Some("auth-int") {
            format!("{method}:{uri}:{}", algorithm.digest_hex(body))
        } else {
            format!("{method}:{uri}")
        };
        let ha2 = algorithm.digest_hex(ha2_base.as_bytes());

        let response = match qop.as_deref() {
            Some(qop @ ("auth" | "auth-int")) => {
                algorithm.digest_hex(format!("{ha1}:{nonce}:{nc_hex}:{cnonce}:{qop}:{ha2}").as_bytes())
            }
            _ => algorithm.digest_hex(format!("{ha1}:{nonce}:{ha2}").as_bytes()),
        };

        let mut header = format!(
            r#"Digest username="{username}", realm="{realm}", nonce="{nonce}", uri="{uri}", response="{response}""#
        );
        if let Some(qop) = &qop {
            header.push_str(&format!(r#", qop={qop}, nc={nc_hex}, cnonce="{cnonce}""#));
        }
        Ok(header)
    }
}

#[cfg(feature = "smtp-auth")]
fn default_cnonce() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::to_hex(&bytes)
}

fn scheme_matches(scheme: Scheme, offered: &str) -> bool {
    let offered = offered.to_ascii_lowercase();
    match scheme {
        Scheme::Basic => offered == "basic",
        Scheme::Bearer => offered == "bearer",
        #[cfg(feature = "smtp-auth")]
        Scheme::Digest => offered == "digest",
        Scheme::OAuth => offered == "bearer" || offered == "oauth",
    }
}

fn encode_simple(creds: &Credentials) -> Option<String> {
    match creds {
        Credentials::Basic { username, password } => {
            use base64::Engine;
            let raw = format!("{username}:{password}");
            Some(format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw)))
        }
        Credentials::Bearer { token, .. } | Credentials::OAuth { token, .. } => Some(format!("Bearer {token}")),
        #[cfg(feature = "smtp-auth")]
        Credentials::Digest { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_credentials_encode_as_base64() {
        let mut auth = ClientAuth::new(vec![Scheme::Basic], 1);
        auth.set_credentials(Credentials::Basic { username: "Aladdin".into(), password: "open sesame".into() });
        assert_eq!(auth.proactive_authorization().as_deref(), Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="));
    }

    #[test]
    fn bearer_token_past_expiry_is_not_used_proactively() {
        let mut auth = ClientAuth::new(vec![Scheme::Bearer], 1);
        auth.set_credentials(Credentials::Bearer { token: "abc".into(), expires_at_unix: Some(0) });
        assert_eq!(auth.proactive_authorization(), None);
    }

    #[test]
    fn scheme_priority_picks_the_first_offered_and_configured_scheme() {
        let mut auth = ClientAuth::new(vec![Scheme::Bearer, Scheme::Basic], 1);
        auth.set_credentials(Credentials::Basic { username: "u".into(), password: "p".into() });
        let challenges = vec![Challenge { scheme: "Basic".into(), params: HashMap::new() }];
        let header = auth.respond(&challenges, "GET", "/", b"", 1).unwrap();
        assert!(header.starts_with("Basic "));
    }

    #[test]
    fn retry_beyond_the_configured_limit_is_rejected() {
        let mut auth = ClientAuth::new(vec![Scheme::Basic], 1);
        auth.set_credentials(Credentials::Basic { username: "u".into(), password: "p".into() });
        let challenges = vec![Challenge { scheme: "Basic".into(), params: HashMap::new() }];
        assert!(matches!(
            auth.respond(&challenges, "GET", "/", b"", 2),
            Err(AuthError::RetryLimitExceeded(1))
        ));
    }

    #[test]
    fn oauth_refresh_replaces_expired_token() {
        let mut auth = ClientAuth::new(vec![Scheme::OAuth], 1);
        auth.set_credentials(Credentials::OAuth {
            token: "expired-token".into(),
            refresh_token: Some("refresh-abc".into()),
            expires_at_unix: Some(0),
        });
        assert_eq!(auth.proactive_authorization(), None);

        auth.refresh_oauth(|refresh_token| {
            assert_eq!(refresh_token, "refresh-abc");
            Ok(Credentials::OAuth { token: "fresh-token".into(), refresh_token: Some("refresh-abc".into()), expires_at_unix: None })
        })
        .unwrap();

        assert_eq!(auth.proactive_authorization().as_deref(), Some("Bearer fresh-token"));
    }

    #[test]
    fn oauth_refresh_without_a_refresh_token_fails() {
        let mut auth = ClientAuth::new(vec![Scheme::OAuth], 1);
        auth.set_credentials(Credentials::OAuth { token: "t".into(), refresh_token: None, expires_at_unix: None });
        assert!(matches!(auth.refresh_oauth(|_| unreachable!()), Err(AuthError::RefreshFailed(_))));
    }

    #[test]
    fn challenge_parsing_handles_quoted_commas() {
        let challenge = parse_challenge(r#"Digest realm="example.com", qop="auth,auth-int", nonce="abc123""#).unwrap();
        assert_eq!(challenge.scheme, "Digest");
        assert_eq!(challenge.params.get("realm").unwrap(), "example.com");
        assert_eq!(challenge.params.get("nonce").unwrap(), "abc123");
    }

    #[cfg(feature = "smtp-auth")]
    #[test]
    fn rfc2617_digest_auth_vector_with_qop_auth() {
        // RFC 2617 §3.5 worked example, MD5, qop=auth.
        let mut auth = ClientAuth::new(vec![Scheme::Digest], 1);
        auth.cnonce_source = || "0a4f113b".to_string();
        auth.set_credentials(Credentials::Digest { username: "Mufasa".into(), password: "Circle of Life".into() });
        let mut params = HashMap::new();
        params.insert("realm".to_string(), "testrealm@host.com".to_string());
        params.insert("nonce".to_string(), "dcd98b7102dd2f0e8b11d0f600bfb0c093".to_string());
        params.insert("qop".to_string(), "auth".to_string());
        params.insert("algorithm".to_string(), "MD5".to_string());
        let challenges = vec![Challenge { scheme: "Digest".into(), params }];

        let header = auth.respond(&challenges, "GET", "/dir/index.html", b"", 1).unwrap();
        assert!(header.contains(r#"response="6629fae49393a05397450978507c4ef1""#));
    }

    #[cfg(feature = "smtp-auth")]
    #[test]
    fn nonce_counter_increments_across_requests_for_the_same_nonce() {
        let mut auth = ClientAuth::new(vec![Scheme::Digest], 3);
        auth.set_credentials(Credentials::Digest { username: "u".into(), password: "p".into() });
        let mut params = HashMap::new();
        params.insert("realm".to_string(), "r".to_string());
        params.insert("nonce".to_string(), "same-nonce".to_string());
        params.insert("qop".to_string(), "auth".to_string());
        let challenges = vec![Challenge { scheme: "Digest".into(), params }];

        let first = auth.respond(&challenges, "GET", "/", b"", 1).unwrap();
        let second = auth.respond(&challenges, "GET", "/", b"", 1).unwrap();
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
    }
}
