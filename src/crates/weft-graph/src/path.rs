//! Dotted/bracket value paths
//!
//! Ref parameters address upstream artifacts with paths like
//! `foo.bar[0].baz`. Parsing is lenient about whitespace but strict about
//! structure: empty segments and unterminated brackets fail to parse.

use serde_json::Value;

/// One step of a value path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key lookup
    Key(String),
    /// Array index lookup
    Index(usize),
}

/// A parsed value path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValuePath {
    segments: Vec<PathSegment>,
}

impl ValuePath {
    /// Parse a dotted/bracket path
    ///
    /// An empty string yields the identity path, which resolves to the root
    /// value itself.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim();
        if path.is_empty() {
            return Some(Self::default());
        }

        let mut segments = Vec::new();
        let mut rest = path;

        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix('.') {
                if segments.is_empty() {
                    return None;
                }
                rest = stripped;
                continue;
            }
            if let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']')?;
                let index: usize = stripped[..close].trim().parse().ok()?;
                segments.push(PathSegment::Index(index));
                rest = &stripped[close + 1..];
                continue;
            }

            let end = rest
                .find(|c| c == '.' || c == '[')
                .unwrap_or(rest.len());
            if end == 0 {
                return None;
            }
            segments.push(PathSegment::Key(rest[..end].to_string()));
            rest = &rest[end..];
        }

        Some(Self { segments })
    }

    /// The parsed segments
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// True for the identity path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The first object key, if the path starts with one
    ///
    /// Diff classification uses this to tell which declared output field a
    /// downstream ref reads.
    pub fn head_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(k)) => Some(k.as_str()),
            _ => None,
        }
    }

    /// Resolve the path against a value, returning `None` on any miss
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                PathSegment::Key(key) => current.as_object()?.get(key)?,
                PathSegment::Index(idx) => current.as_array()?.get(*idx)?,
            };
        }
        Some(current)
    }
}

impl std::fmt::Display for ValuePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(k) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", k)?;
                }
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}
