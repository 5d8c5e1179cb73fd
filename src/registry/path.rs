//! Stream paths
//!
//! A stream is addressed as `/{app}/{name}`. The name a client sends with
//! publish/play may carry a query string (`demo?token=abc`); the query is
//! split off into arguments and does not take part in the path.

use std::collections::HashMap;
use std::fmt;

/// Key/value pairs from the stream name's query string
pub type StreamArgs = HashMap<String, String>;

/// Registry key for a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamPath(String);

impl StreamPath {
    /// Build the path for `name` under `app`, returning the parsed query
    /// arguments alongside.
    ///
    /// Returns `None` when the name is empty once the query is removed.
    pub fn parse(app: &str, name: &str) -> Option<(Self, StreamArgs)> {
        let (name, query) = match name.split_once('?') {
            Some((name, query)) => (name, query),
            None => (name, ""),
        };
        let name = name.trim_matches('/');
        if name.is_empty() {
            return None;
        }
        let app = app.trim_matches('/');
        Some((Self(format!("/{}/{}", app, name)), parse_query(query)))
    }

    /// Use `path` as given, adding a leading slash if missing
    pub fn from_raw(path: &str) -> Self {
        if path.starts_with('/') {
            Self(path.to_string())
        } else {
            Self(format!("/{}", path))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `a=1&b=2` into a map. Keys without `=` map to an empty value; later
/// duplicates win.
pub fn parse_query(query: &str) -> StreamArgs {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let (path, args) = StreamPath::parse("live", "demo").unwrap();
        assert_eq!(path.as_str(), "/live/demo");
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_with_query() {
        let (path, args) = StreamPath::parse("live", "demo?token=abc&debug").unwrap();
        assert_eq!(path.to_string(), "/live/demo");
        assert_eq!(args.get("token").map(String::as_str), Some("abc"));
        assert_eq!(args.get("debug").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        assert!(StreamPath::parse("live", "").is_none());
        assert!(StreamPath::parse("live", "?token=abc").is_none());
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(StreamPath::from_raw("live/other").as_str(), "/live/other");
        assert_eq!(StreamPath::from_raw("/live/other").as_str(), "/live/other");
    }
}
