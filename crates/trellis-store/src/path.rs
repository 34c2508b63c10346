//! Node addressing
//!
//! Provides [`Relid`], a node's identifier among its containment siblings,
//! and [`NodePath`], the sequence of relids leading from the root to a node.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Sibling-unique identifier of a node within its parent
///
/// Stable across moves of the parent, not portable across trees.
/// Deterministically assigned relids are decimal integer tokens.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Relid(String);

impl Relid {
    /// Create a relid from a token
    ///
    /// # Errors
    /// Returns an error if the token is empty or contains a path separator.
    pub fn new(token: impl Into<String>) -> Result<Self, PathError> {
        let token = token.into();
        if token.is_empty() {
            return Err(PathError::EmptySegment);
        }
        if token.contains(|c: char| !c.is_alphanumeric() && c != '_') {
            return Err(PathError::InvalidSegment(token));
        }
        Ok(Self(token))
    }

    /// Relid for the given non-negative integer
    #[inline]
    #[must_use]
    pub fn from_index(index: u64) -> Self {
        Self(index.to_string())
    }

    /// The token as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the token back to an integer, if it is one
    #[inline]
    #[must_use]
    pub fn as_index(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Display for Relid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a node: the relids from the root down to the node
///
/// The empty path addresses the root. Displays as `/a/b` and serializes in
/// that string form, so paths can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodePath(Vec<Relid>);

impl NodePath {
    /// The root path (no segments)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Create a path from relid segments
    #[inline]
    #[must_use]
    pub fn new(segments: Vec<Relid>) -> Self {
        Self(segments)
    }

    /// The relid segments, root first
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[Relid] {
        &self.0
    }

    /// Containment depth (root = 0)
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root path
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Parent path, `None` for the root
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last segment: the node's own relid
    #[inline]
    #[must_use]
    pub fn relid(&self) -> Option<&Relid> {
        self.0.last()
    }

    /// Append a relid, returning the child path
    #[inline]
    #[must_use]
    pub fn child(&self, relid: Relid) -> Self {
        let mut next = self.clone();
        next.0.push(relid);
        next
    }

    /// Append all segments of another path
    #[inline]
    #[must_use]
    pub fn join(&self, suffix: &Self) -> Self {
        let mut next = self.clone();
        next.0.extend(suffix.0.iter().cloned());
        next
    }

    /// Whether this path is a (non-strict) prefix of another
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Whether this path is a strict ancestor of another
    #[inline]
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.0.len() < other.0.len() && self.is_prefix_of(other)
    }

    /// The suffix of this path below `ancestor`
    ///
    /// # Errors
    /// Returns an error if `ancestor` is not a prefix of this path.
    pub fn relative_to(&self, ancestor: &Self) -> Result<Self, PathError> {
        if !ancestor.is_prefix_of(self) {
            return Err(PathError::NotDescendant {
                path: self.to_string(),
                ancestor: ancestor.to_string(),
            });
        }
        Ok(Self(self.0[ancestor.0.len()..].to_vec()))
    }

    /// Rewritten path with the `from` prefix replaced by `to`
    ///
    /// Returns `None` if `from` is not a prefix of this path.
    #[must_use]
    pub fn rebase(&self, from: &Self, to: &Self) -> Option<Self> {
        let suffix = self.relative_to(from).ok()?;
        Some(to.join(&suffix))
    }

    /// Iterate over all ancestor paths from the root down, excluding self
    pub fn ancestors(&self) -> impl Iterator<Item = NodePath> + '_ {
        (0..self.0.len()).map(move |i| Self(self.0[..i].to_vec()))
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for NodePath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl FromStr for NodePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "/" {
            return Ok(Self::root());
        }
        let trimmed = s.strip_prefix('/').ok_or(PathError::MissingLeadingSlash)?;
        let segments = trimmed
            .split('/')
            .map(Relid::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }
}

/// Errors related to node paths
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Empty relid token
    #[error("path contains empty segment")]
    EmptySegment,

    /// Token contains characters outside `[A-Za-z0-9_]`
    #[error("invalid segment: {0} (must be alphanumeric or underscore)")]
    InvalidSegment(String),

    /// Parsed string did not start with `/`
    #[error("path must start with '/'")]
    MissingLeadingSlash,

    /// Not a descendant path
    #[error("path '{path}' is not a descendant of '{ancestor}'")]
    NotDescendant { path: String, ancestor: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relid_rejects_bad_tokens() {
        assert!(Relid::new("").is_err());
        assert!(Relid::new("a/b").is_err());
        assert!(Relid::new("ok_1").is_ok());
    }

    #[test]
    fn relid_from_index_roundtrip() {
        let relid = Relid::from_index(17);
        assert_eq!(relid.as_str(), "17");
        assert_eq!(relid.as_index(), Some(17));
        assert_eq!(Relid::new("abc").unwrap().as_index(), None);
    }

    #[test]
    fn path_display_and_parse() {
        let path: NodePath = "/1/3/x".parse().unwrap();
        assert_eq!(path.depth(), 3);
        assert_eq!(path.to_string(), "/1/3/x");
        assert_eq!(NodePath::root().to_string(), "/");
        assert_eq!("/".parse::<NodePath>().unwrap(), NodePath::root());
    }

    #[test]
    fn path_parse_rejects_empty_segment() {
        assert!(matches!(
            "/a//b".parse::<NodePath>(),
            Err(PathError::EmptySegment)
        ));
    }

    #[test]
    fn path_parent_and_relid() {
        let path: NodePath = "/a/b".parse().unwrap();
        assert_eq!(path.parent().unwrap().to_string(), "/a");
        assert_eq!(path.relid().unwrap().as_str(), "b");
        assert!(NodePath::root().parent().is_none());
    }

    #[test]
    fn path_prefix_and_ancestor() {
        let a: NodePath = "/a".parse().unwrap();
        let ab: NodePath = "/a/b".parse().unwrap();
        let ax: NodePath = "/a/x".parse().unwrap();
        assert!(a.is_prefix_of(&ab));
        assert!(a.is_ancestor_of(&ab));
        assert!(!a.is_ancestor_of(&a));
        assert!(!ab.is_prefix_of(&ax));
    }

    #[test]
    fn path_rebase() {
        let path: NodePath = "/a/b/c".parse().unwrap();
        let from: NodePath = "/a/b".parse().unwrap();
        let to: NodePath = "/z".parse().unwrap();
        assert_eq!(path.rebase(&from, &to).unwrap().to_string(), "/z/c");
        let elsewhere: NodePath = "/q".parse().unwrap();
        assert!(path.rebase(&elsewhere, &to).is_none());
    }

    #[test]
    fn path_serializes_as_string() {
        let path: NodePath = "/a/b".parse().unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"/a/b\"");
        let back: NodePath = serde_json::from_str("\"/a/b\"").unwrap();
        assert_eq!(back, path);
        assert_eq!(serde_json::to_string(&NodePath::root()).unwrap(), "\"/\"");
    }

    #[test]
    fn path_ancestors() {
        let path: NodePath = "/a/b/c".parse().unwrap();
        let ancestors: Vec<String> = path.ancestors().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, vec!["/", "/a", "/a/b"]);
    }

    proptest::proptest! {
        #[test]
        fn display_parse_roundtrip(segments in proptest::collection::vec("[a-z0-9_]{1,8}", 0..6)) {
            let path = NodePath::new(
                segments.iter().map(|s| Relid::new(s.clone()).unwrap()).collect(),
            );
            let reparsed: NodePath = path.to_string().parse().unwrap();
            proptest::prop_assert_eq!(reparsed, path);
        }

        #[test]
        fn rebase_onto_self_is_identity(segments in proptest::collection::vec("[a-z0-9]{1,4}", 1..5)) {
            let path = NodePath::new(
                segments.iter().map(|s| Relid::new(s.clone()).unwrap()).collect(),
            );
            let parent = path.parent().unwrap();
            proptest::prop_assert_eq!(path.rebase(&parent, &parent), Some(path.clone()));
        }
    }
}
