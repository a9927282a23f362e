//! Authentication pipeline shared by client and server roles:
//! client-side HTTP challenge/response orchestration (Basic, Bearer,
//! Digest, OAuth) in [`client`], and the server-side SMTP streaming
//! auth bridge (SPF/DKIM/DMARC pipeline mechanics, not the
//! cryptographic rules themselves) in [`smtp`].

pub mod client;

#[cfg(feature = "smtp-auth")]
pub mod smtp;

use thiserror::Error;

/// Authentication pipeline failures, both client challenge/response and
/// the SMTP streaming bridge.
#[derive(Debug, Error)]
pub enum AuthError {
    /// None of the configured schemes (in priority order) matched any
    /// scheme offered in the challenge.
    #[error("no configured scheme matches the challenge: {0}")]
    NoMatchingScheme(String),

    /// `WWW-Authenticate`/`Proxy-Authenticate` could not be parsed.
    #[error("malformed challenge header: {0}")]
    MalformedChallenge(String),

    /// Retried the configured maximum number of times without success.
    #[error("retry limit of {0} exceeded")]
    RetryLimitExceeded(u32),

    /// A bearer/OAuth token's expiry timestamp has passed.
    #[error("credential expired")]
    Expired,

    /// A refresh callback failed to produce a new token.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The SMTP pipeline received data for a phase it isn't in (e.g. a
    /// second `endData` without an intervening `reset`).
    #[cfg(feature = "smtp-auth")]
    #[error("auth pipeline state error: {0}")]
    PipelineState(String),
}
