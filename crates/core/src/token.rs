//! Bearer token authorization.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

type TokenDigest = [u8; 32];

fn digest(token: &str) -> TokenDigest {
    Sha256::digest(token.as_bytes()).into()
}

/// The set of bearer tokens allowed to use the cache.
///
/// Built once at startup and shared read-only across requests. Only SHA-256
/// digests of the tokens are kept in memory.
#[derive(Clone, Default)]
pub struct TokenSet {
    digests: HashSet<TokenDigest>,
}

impl TokenSet {
    /// Build a set from individual tokens. Entries are trimmed and empty
    /// entries are dropped.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = tokens
            .into_iter()
            .filter_map(|t| {
                let t = t.as_ref().trim();
                (!t.is_empty()).then(|| digest(t))
            })
            .collect();
        Self { digests }
    }

    /// Parse a comma-separated token list such as `tok-a, tok-b`.
    pub fn from_comma_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Check whether a presented token is allowed.
    pub fn contains(&self, token: &str) -> bool {
        self.digests.contains(&digest(token))
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("len", &self.digests.len())
            .finish_non_exhaustive()
    }
}

/// Why a request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("invalid Authorization header format")]
    MalformedHeader,

    #[error("invalid token")]
    InvalidToken,
}

impl AuthRejection {
    /// Short label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader => "malformed_header",
            Self::InvalidToken => "invalid_token",
        }
    }
}

/// Proof that a request carried an allowed token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorized {
    fingerprint: String,
}

impl Authorized {
    /// First 8 hex characters of the token's SHA-256, safe to log.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Authorize a request from the raw value of its `Authorization` header.
///
/// The header must be exactly `Bearer <token>` (scheme matched
/// case-insensitively, single space, non-empty token).
pub fn authorize(header: Option<&str>, allowed: &TokenSet) -> Result<Authorized, AuthRejection> {
    let header = match header {
        Some(h) if !h.trim().is_empty() => h,
        _ => return Err(AuthRejection::MissingHeader),
    };

    let mut parts = header.split(' ');
    let token = match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None)
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() =>
        {
            token
        }
        _ => return Err(AuthRejection::MalformedHeader),
    };

    let token_digest = digest(token);
    if !allowed.digests.contains(&token_digest) {
        return Err(AuthRejection::InvalidToken);
    }

    let fingerprint = token_digest[..4]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Ok(Authorized { fingerprint })
}
