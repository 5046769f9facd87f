//! Route path patterns

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One segment of a route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal segment, matched exactly
    Static(String),
    /// `:name` parameter, matches one non-empty segment
    Param(String),
    /// Trailing `*`, matches the rest of the path (possibly empty)
    Wildcard,
}

impl Segment {
    const fn rank(&self) -> u8 {
        match self {
            Self::Static(_) => 0,
            Self::Param(_) => 1,
            Self::Wildcard => 2,
        }
    }
}

/// Parsed route path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a pattern such as `/api/notes/:id` or `/files/*`
    ///
    /// A `*` anywhere but the last segment is kept as a literal.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let raw = normalize_path(path);
        let parts: Vec<&str> = split(&raw).collect();
        let last = parts.len().saturating_sub(1);

        let segments = parts
            .iter()
            .enumerate()
            .map(|(i, part)| match *part {
                "*" if i == last => Segment::Wildcard,
                p if p.len() > 1 && p.starts_with(':') => Segment::Param(p[1..].to_string()),
                p => Segment::Static(p.to_string()),
            })
            .collect();

        Self { raw, segments }
    }

    /// Pattern as registered, normalized to start with `/`
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a request path, returning the captured parameters
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        let mut parts = split(path);

        for segment in &self.segments {
            match segment {
                Segment::Wildcard => {
                    let rest = parts.by_ref().collect::<Vec<_>>().join("/");
                    params.insert("*".to_string(), decode(&rest));
                    return Some(params);
                }
                Segment::Static(expected) => {
                    if parts.next()? != expected {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.next()?;
                    if value.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), decode(value));
                }
            }
        }

        parts.next().is_none().then_some(params)
    }

    /// Order two patterns by match precedence, most specific first
    ///
    /// Segments are compared from the left: static before parameter before
    /// wildcard. A longer pattern wins over its own prefix.
    #[must_use]
    pub fn precedence(&self, other: &Self) -> Ordering {
        for (a, b) in self.segments.iter().zip(&other.segments) {
            match a.rank().cmp(&b.rank()) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        other.segments.len().cmp(&self.segments.len())
    }
}

/// Force a path to begin with `/`
#[must_use]
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Join route path parts, collapsing duplicate slashes at the seams
#[must_use]
pub fn join_paths(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        let trimmed = part.trim_start_matches('/');
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(trimmed);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Path segments after the leading `/`; `/` alone yields one empty segment
fn split(path: &str) -> impl Iterator<Item = &str> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}

fn decode(value: &str) -> String {
    urlencoding::decode(value).map_or_else(|_| value.to_string(), |v| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_match() {
        let pattern = PathPattern::parse("/api/calc/compute");
        assert!(pattern.matches("/api/calc/compute").is_some());
        assert!(pattern.matches("/api/calc/compute/x").is_none());
        assert!(pattern.matches("/api/calc").is_none());
    }

    #[test]
    fn trailing_slash_is_significant() {
        let root = PathPattern::parse("/api/notes/");
        assert!(root.matches("/api/notes/").is_some());
        assert!(root.matches("/api/notes").is_none());
    }

    #[test]
    fn param_capture_is_decoded() {
        let pattern = PathPattern::parse("/api/notes/:id");
        let params = pattern.matches("/api/notes/a%20b").unwrap();
        assert_eq!(params["id"], "a b");
        assert!(pattern.matches("/api/notes/").is_none());
    }

    #[test]
    fn wildcard_capture() {
        let pattern = PathPattern::parse("/files/*");
        assert_eq!(pattern.matches("/files/a/b.txt").unwrap()["*"], "a/b.txt");
        assert_eq!(pattern.matches("/files/").unwrap()["*"], "");
        assert!(pattern.matches("/other/a").is_none());
    }

    #[test]
    fn static_beats_param_beats_wildcard() {
        let fixed = PathPattern::parse("/n/new");
        let param = PathPattern::parse("/n/:id");
        let wild = PathPattern::parse("/n/*");

        assert_eq!(fixed.precedence(&param), Ordering::Less);
        assert_eq!(param.precedence(&wild), Ordering::Less);
        assert_eq!(wild.precedence(&fixed), Ordering::Greater);
    }

    #[test]
    fn join_collapses_slashes() {
        assert_eq!(join_paths(&["/api", "calc", "/compute"]), "/api/calc/compute");
        assert_eq!(join_paths(&["/api/", "/notes", "/"]), "/api/notes/");
        assert_eq!(join_paths(&["", "calc", "/"]), "/calc/");
    }

    #[test]
    fn normalize_adds_slash() {
        assert_eq!(normalize_path("compute"), "/compute");
        assert_eq!(normalize_path("/compute"), "/compute");
    }
}
