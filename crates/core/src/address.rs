//! Artifact addressing.
//!
//! Build clients identify an artifact by an opaque content hash plus an
//! optional team identifier and an optional workspace slug. The slug takes
//! precedence when both are present. The resulting object-store key is
//! `<scope>/<hash>`, or the bare hash when no scope was supplied.

use std::fmt;

/// Key under which an artifact is stored in the backing object store.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the storage key for an artifact.
///
/// The scope is `slug` when non-empty, otherwise `team_id`. An empty scope
/// yields the bare hash. This function performs no validation.
pub fn resolve(team_id: &str, slug: &str, hash: &str) -> StorageKey {
    let scope = if slug.is_empty() { team_id } else { slug };
    if scope.is_empty() {
        StorageKey(hash.to_string())
    } else {
        StorageKey(format!("{scope}/{hash}"))
    }
}

/// Check that a client-supplied identifier maps to exactly one key segment.
///
/// Rejects empty values, path separators, control characters and the
/// relative path components `.` and `..`.
pub fn validate_identifier(kind: &'static str, value: &str) -> crate::Result<()> {
    let invalid = |reason: &str| crate::Error::InvalidIdentifier {
        kind,
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(invalid("must not be a relative path component"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| *c == '/' || *c == '\\' || c.is_control())
    {
        return Err(invalid(&format!("contains forbidden character {c:?}")));
    }
    Ok(())
}

/// A validated artifact address.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ArtifactAddress {
    scope_id: String,
    hash: String,
}

impl ArtifactAddress {
    /// Build an address from the raw request identifiers.
    ///
    /// Fails with [`crate::Error::MissingScope`] when neither a team nor a
    /// slug was supplied, and with [`crate::Error::InvalidIdentifier`] when
    /// the chosen scope or the hash would not form a single key segment.
    pub fn from_identifiers(
        team_id: Option<&str>,
        slug: Option<&str>,
        hash: &str,
    ) -> crate::Result<Self> {
        let team_id = team_id.unwrap_or_default();
        let slug = slug.unwrap_or_default();
        let scope_id = if slug.is_empty() { team_id } else { slug };
        if scope_id.is_empty() {
            return Err(crate::Error::MissingScope);
        }

        validate_identifier(if slug.is_empty() { "teamId" } else { "slug" }, scope_id)?;
        validate_identifier("hash", hash)?;

        Ok(Self {
            scope_id: scope_id.to_string(),
            hash: hash.to_string(),
        })
    }

    /// The team or workspace this artifact belongs to.
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// The client-supplied content hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The object-store key for this artifact.
    pub fn storage_key(&self) -> StorageKey {
        resolve("", &self.scope_id, &self.hash)
    }
}

impl fmt::Debug for ArtifactAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactAddress({}/{})", self.scope_id, self.hash)
    }
}
