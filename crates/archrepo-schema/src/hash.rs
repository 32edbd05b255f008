//! Artifact checksums.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a string is not a usable checksum.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The hex portion is not exactly 64 characters long.
    #[error("Invalid SHA256 digest: expected 64 hex characters, got {len} in '{value}'")]
    Length {
        /// Length of the hex portion that was found.
        len: usize,
        /// The offending input.
        value: String,
    },
    /// The input contains characters outside `[0-9a-fA-F]`.
    #[error("Invalid SHA256 digest: contains non-hex characters in '{0}'")]
    NonHex(String),
}

/// A validated SHA256 digest (64 lowercase hex characters).
///
/// Validation happens at construction and deserialization time, so an
/// invalid hex string can never reach a generated recipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix (the form GitHub
    /// reports in release asset metadata).
    ///
    /// # Errors
    ///
    /// Returns an error if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
        let s = s.into();
        let hex = s.strip_prefix("sha256:").unwrap_or(&s);

        if hex.len() != 64 {
            return Err(DigestError::Length {
                len: hex.len(),
                value: s,
            });
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NonHex(s));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One entry of a package's `checksums` table.
///
/// Either a real SHA256 digest or pacman's `SKIP` marker, which is the
/// only valid value for sources that are checked out rather than
/// downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// Content hash of the downloaded source.
    Sha256(Sha256Digest),
    /// Source cannot be hashed (git checkout).
    Skip,
}

impl Checksum {
    /// Parse a catalog value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is neither `SKIP` nor a valid digest.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        if s == crate::SKIP_CHECKSUM {
            Ok(Self::Skip)
        } else {
            Sha256Digest::new(s).map(Self::Sha256)
        }
    }

    /// Text written to the catalog and to `sha256sums_<arch>`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sha256(d) => d.as_str(),
            Self::Skip => crate::SKIP_CHECKSUM,
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Sha256Digest> for Checksum {
    fn from(digest: Sha256Digest) -> Self {
        Self::Sha256(digest)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
