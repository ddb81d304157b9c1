//! Structural paths: hierarchical identifiers for graph nodes.
//!
//! A path is the ordered list of segments from a structural group down to a
//! node, e.g. `["level-1", "player", "inventory"]`. Paths are assigned during
//! discovery and are the only addressing used while a graph is being rebuilt,
//! so they must be deterministic for an unchanged graph.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Delimiter used when a path is flattened to a single string.
pub const PATH_DELIMITER: char = '/';

/// Escape character for segments that contain the delimiter.
const PATH_ESCAPE: char = '\\';

/// Hierarchical identifier for a node's position in the discovered graph.
///
/// Equality, ordering and hashing are by the full segment sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StructuralPath(Vec<String>);

impl StructuralPath {
    /// Create a single-segment path for a structural group.
    pub fn root(group: impl Into<String>) -> Self {
        Self(vec![group.into()])
    }

    /// Create a path from explicit segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Return a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Path with the last segment removed, or `None` for a root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// All segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// First segment (the structural group), if any.
    pub fn group(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Last segment, if any.
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &StructuralPath) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    /// Flatten to the storage representation.
    ///
    /// Delimiters and escapes inside segments are escaped so that
    /// [`StructuralPath::from_str`] restores the exact segment list.
    pub fn to_delimited(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(PATH_DELIMITER);
            }
            for c in segment.chars() {
                if c == PATH_DELIMITER || c == PATH_ESCAPE {
                    out.push(PATH_ESCAPE);
                }
                out.push(c);
            }
        }
        out
    }
}

/// Error parsing a delimited path string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
    /// The string ended in the middle of an escape sequence.
    #[error("dangling escape at end of path: {0}")]
    DanglingEscape(String),
}

impl FromStr for StructuralPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                PATH_ESCAPE => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(PathParseError::DanglingEscape(s.to_string())),
                },
                PATH_DELIMITER => segments.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        segments.push(current);
        Ok(Self(segments))
    }
}

impl fmt::Display for StructuralPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_delimited())
    }
}

impl Serialize for StructuralPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_delimited())
    }
}

impl<'de> Deserialize<'de> for StructuralPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
