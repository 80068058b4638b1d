//! Canonical path model (§3).
//!
//! A [`CanonPath`] is a sequence of non-empty components. The empty
//! sequence is the root. Equality and ordering are defined over the
//! component sequence, not the formatted string, so callers never need to
//! worry about trailing slashes or repeated separators surviving into the
//! lock manager's key space.

use std::fmt;

/// A canonical absolute path: a sequence of non-empty components.
///
/// The root is the empty component sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonPath {
    components: Vec<String>,
}

impl CanonPath {
    /// The root path.
    pub fn root() -> Self {
        Self { components: Vec::new() }
    }

    /// Parse a `/`-separated path, collapsing repeated separators and
    /// ignoring a leading or trailing slash.
    pub fn parse(raw: &str) -> Self {
        let components = raw
            .split('/')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        Self { components }
    }

    /// Build a path directly from components (e.g. parent + child name).
    pub fn from_components(components: Vec<String>) -> Self {
        Self { components }
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The final path component, or `None` at the root.
    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// This path's parent, or `None` if this is the root.
    pub fn parent(&self) -> Option<CanonPath> {
        if self.is_root() {
            return None;
        }
        let mut components = self.components.clone();
        components.pop();
        Some(CanonPath { components })
    }

    /// Every proper ancestor, ordered shortest-prefix-first (root first).
    ///
    /// This is the order §4.1's acquisition algorithm climbs the tree in;
    /// callers must acquire locks in this order to preserve the deadlock
    /// freedom invariant.
    pub fn ancestors(&self) -> Vec<CanonPath> {
        if self.is_root() {
            return Vec::new();
        }
        let mut result = Vec::with_capacity(self.components.len());
        result.push(CanonPath::root());
        let mut prefix = Vec::new();
        for component in self.components.iter().take(self.components.len() - 1) {
            prefix.push(component.clone());
            result.push(CanonPath { components: prefix.clone() });
        }
        result
    }

    /// Append a child component, producing the child path.
    pub fn child(&self, name: &str) -> CanonPath {
        let mut components = self.components.clone();
        components.push(name.to_string());
        CanonPath { components }
    }

    /// The canonical key used in both lock maps.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CanonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl PartialOrd for CanonPath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Lexicographic ordering over the component sequence, the total order
/// §4.2 requires for rename's two-path lock acquisition, and the order
/// S4 depends on for deadlock freedom.
impl Ord for CanonPath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.components.cmp(&other.components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_parent_and_no_ancestors() {
        let root = CanonPath::root();
        assert!(root.is_root());
        assert_eq!(root.parent(), None);
        assert!(root.ancestors().is_empty());
    }

    #[test]
    fn ancestors_are_root_to_leaf() {
        let p = CanonPath::parse("/a/b/c");
        let ancestors = p.ancestors();
        assert_eq!(
            ancestors.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            vec!["/".to_string(), "/a".to_string(), "/a/b".to_string()]
        );
    }

    #[test]
    fn parse_collapses_separators() {
        let a = CanonPath::parse("/a//b/c/");
        let b = CanonPath::parse("a/b/c");
        assert_eq!(a, b);
    }

    #[test]
    fn parent_drops_last_component() {
        let p = CanonPath::parse("/a/b/c");
        assert_eq!(p.parent().unwrap(), CanonPath::parse("/a/b"));
    }

    #[test]
    fn lexicographic_order_is_total_and_deterministic() {
        let a = CanonPath::parse("/a/x");
        let b = CanonPath::parse("/b/y");
        assert!(a < b);
        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }

    #[test]
    fn display_round_trips_through_parse() {
        let p = CanonPath::parse("/a/b");
        assert_eq!(CanonPath::parse(&p.to_string()), p);
    }
}
