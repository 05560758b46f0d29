//! Content digest type
//!
//! Digests are MD5 fingerprints used for change detection, not for security.
//! They are stored as their raw 16 bytes and rendered as 32-character
//! uppercase hex, which is the form manifests carry and the form every
//! comparison in the planner and patcher uses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a string is not a 32-character hex digest
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid digest: {0}. Expected 32 hex characters")]
pub struct InvalidDigest(pub String);

/// MD5 content digest
///
/// Stored as a 16-byte array so comparisons and map lookups are byte
/// comparisons. Displays and serializes as uppercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 16]);

impl Digest {
    /// Create a digest from a hex string (case insensitive)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use content_updater::app::Digest;
    ///
    /// let lower = Digest::from_hex("50c9d1c465f3cbff652be1509c2e2a4e")?;
    /// let upper = Digest::from_hex("50C9D1C465F3CBFF652BE1509C2E2A4E")?;
    /// assert_eq!(lower, upper);
    /// # Ok::<(), content_updater::app::hash::InvalidDigest>(())
    /// ```
    pub fn from_hex(hex: &str) -> Result<Self, InvalidDigest> {
        if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidDigest(hex.to_string()));
        }

        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| InvalidDigest(hex.to_string()))?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| InvalidDigest(hex.to_string()))?;
        }

        Ok(Digest(bytes))
    }

    /// Compute the digest of an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Digest(md5::compute(data).0)
    }

    /// Convert the digest to its uppercase hex representation
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;
        self.0.iter().fold(String::with_capacity(32), |mut acc, b| {
            let _ = write!(&mut acc, "{:02X}", b);
            acc
        })
    }

    /// Raw byte representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Digest(bytes)
    }

    /// Compare against a textual digest from a manifest
    ///
    /// Manifest digests are compared as uppercase text so that values which
    /// are not well-formed hex still compare deterministically (they never
    /// match a computed digest).
    pub fn matches(&self, text: &str) -> bool {
        text.eq_ignore_ascii_case(&self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_string = String::deserialize(deserializer)?;
        Self::from_hex(&hex_string).map_err(serde::de::Error::custom)
    }
}
