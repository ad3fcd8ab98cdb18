//! Parsing and formatting for `status://` URLs.

use std::fmt;

use super::StatusError;

/// Scheme prefix shared by every path into the status tree.
pub const STATUS_PREFIX: &str = "status://";

/// Segment that matches any single child in a wildcard query.
pub const WILDCARD: &str = "*";

/// A parsed status URL: zero or more non-empty segments under `status://`.
///
/// Paths used for queries may contain `*` segments; paths used for writes
/// must be fully literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusPath {
    segments: Vec<String>,
}

impl StatusPath {
    /// The tree root, `status://`.
    pub fn root() -> Self {
        StatusPath {
            segments: Vec::new(),
        }
    }

    pub fn parse(url: &str) -> Result<Self, StatusError> {
        let rest = url
            .strip_prefix(STATUS_PREFIX)
            .ok_or_else(|| StatusError::BadPath(url.to_owned()))?;

        if rest.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(StatusError::BadPath(url.to_owned()));
            }
            segments.push(segment.to_owned());
        }

        Ok(StatusPath { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_query(&self) -> bool {
        self.segments.iter().any(|s| s == WILDCARD)
    }

    /// Index of the first wildcard segment, if any.
    pub fn first_wildcard(&self) -> Option<usize> {
        self.segments.iter().position(|s| s == WILDCARD)
    }

    /// Segments before the first wildcard (all of them for literal paths).
    pub fn literal_prefix(&self) -> &[String] {
        match self.first_wildcard() {
            Some(index) => &self.segments[..index],
            None => &self.segments,
        }
    }

    /// Returns a copy of this path with the segment at `index` replaced.
    pub fn with_segment(&self, index: usize, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments[index] = segment.to_owned();
        StatusPath { segments }
    }

    pub fn join(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_owned());
        StatusPath { segments }
    }
}

impl fmt::Display for StatusPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", STATUS_PREFIX, self.segments.join("/"))
    }
}
