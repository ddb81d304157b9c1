//! Save-file metadata.
//!
//! Metadata is written next to the data file on every successful save and
//! read first on load, so version mismatches are rejected before the
//! (possibly large) payload is touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Semantic version `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemVer {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl SemVer {
    /// Create a version.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl Default for SemVer {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Error parsing a version string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid semantic version '{0}', expected major.minor.patch")]
pub struct SemVerParseError(pub String);

impl FromStr for SemVer {
    type Err = SemVerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(SemVerParseError(s.to_string()));
        }
        let parse = |p: &str| p.parse::<u32>().map_err(|_| SemVerParseError(s.to_string()));
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

impl Serialize for SemVer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SemVer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Metadata stored alongside a persisted data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Version of the writer; must equal the reader's version exactly.
    pub version: SemVer,
    /// When the pair was last written.
    pub modified_at: DateTime<Utc>,
    /// Checksum of the final (encrypted) data bytes.
    pub checksum: String,
    /// Algorithm that produced `checksum`.
    pub checksum_algorithm: String,
    /// Free-form user key/value bag.
    #[serde(default)]
    pub user_data: BTreeMap<String, serde_json::Value>,
}

impl FileMetadata {
    /// Fresh metadata for a write that just produced `checksum`.
    pub fn new(
        version: SemVer,
        checksum: impl Into<String>,
        checksum_algorithm: impl Into<String>,
        user_data: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            version,
            modified_at: Utc::now(),
            checksum: checksum.into(),
            checksum_algorithm: checksum_algorithm.into(),
            user_data,
        }
    }

    /// Whether a reader running `running` may read this file.
    pub fn is_compatible(&self, running: &SemVer) -> bool {
        self.version == *running
    }

    /// Copy with a replaced user bag and a fresh timestamp.
    pub fn with_user_data(&self, user_data: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            user_data,
            modified_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Encode for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Decode from storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semver_parse_and_display() {
        let v: SemVer = "1.2.3".parse().unwrap();
        assert_eq!(v, SemVer::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
        assert!("1.2".parse::<SemVer>().is_err());
        assert!("1.x.0".parse::<SemVer>().is_err());
    }

    #[test]
    fn test_version_gate_is_exact() {
        let meta = FileMetadata::new(SemVer::new(1, 2, 0), "abc", "sha256", BTreeMap::new());
        assert!(meta.is_compatible(&SemVer::new(1, 2, 0)));
        assert!(!meta.is_compatible(&SemVer::new(1, 3, 0)));
        assert!(!meta.is_compatible(&SemVer::new(1, 1, 9)));
    }

    #[test]
    fn test_metadata_bytes_round_trip() {
        let mut bag = BTreeMap::new();
        bag.insert("slot".to_string(), serde_json::json!("autosave"));
        let meta = FileMetadata::new(SemVer::new(2, 0, 1), "ff00", "xxh64", bag);

        let restored = FileMetadata::from_bytes(&meta.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, meta);
        assert!(String::from_utf8(meta.to_bytes().unwrap()).unwrap().contains("\"2.0.1\""));
    }

    #[test]
    fn test_with_user_data_keeps_checksum() {
        let meta = FileMetadata::new(SemVer::default(), "abc", "sha256", BTreeMap::new());
        let mut bag = BTreeMap::new();
        bag.insert("k".to_string(), serde_json::json!(1));
        let edited = meta.with_user_data(bag);
        assert_eq!(edited.checksum, "abc");
        assert_eq!(edited.version, meta.version);
        assert_eq!(edited.user_data.len(), 1);
    }
}
