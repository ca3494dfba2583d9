//! Virtual path handling: normalization and head/tail component splitting,
//! used by the mount resolver to walk published virtual trees and by the
//! scanner's filename filter.

use std::ffi::OsStr;
use std::fmt;

/// A normalized virtual path: `/`-separated components, no leading or
/// trailing slash, no empty components.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(String);

impl VirtualPath {
    /// Collapses repeated slashes and strips leading/trailing slash runs.
    /// Internal component text is otherwise left untouched.
    pub fn new(raw: &str) -> Self {
        let collapsed = raw.split('/').filter(|c| !c.is_empty()).collect::<Vec<_>>().join("/");
        VirtualPath(collapsed)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First path component, empty if this path is empty.
    pub fn head(&self) -> &str {
        head(&self.0)
    }

    /// Everything after the first component, empty if there is only one.
    pub fn tail(&self) -> &str {
        tail(&self.0)
    }

    /// Splits into (head, tail) in one call, the shape the mount resolver's
    /// walk and the scanner's stack frames consume directly.
    pub fn split_first(&self) -> (&str, &str) {
        (self.head(), self.tail())
    }

    /// Appends one already-validated path component.
    pub fn join(&self, component: &str) -> Self {
        if self.0.is_empty() {
            VirtualPath(component.to_string())
        } else {
            VirtualPath(format!("{}/{}", self.0, component))
        }
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First component of a normalized path string.
pub fn head(p: &str) -> &str {
    match p.find('/') {
        Some(idx) => &p[..idx],
        None => p,
    }
}

/// Remainder of the path after the first component's separator, or empty
/// if there is no separator.
pub fn tail(p: &str) -> &str {
    match p.find('/') {
        Some(idx) => &p[idx + 1..],
        None => "",
    }
}

/// Filename filter applied by the scanner: rejects path separators, control
/// bytes (0x00-0x1F, 0x7F), the specials `.`/`..`, names over 255 bytes, and
/// non-UTF-8 names.
pub fn is_valid_entry_name(name: &OsStr) -> bool {
    let Some(name) = name.to_str() else { return false };
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    if name.len() > 255 {
        return false;
    }
    !name.bytes().any(|b| b == b'/' || b == b'\\' || b <= 0x1F || b == 0x7F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_tail_single_component() {
        assert_eq!(head("a"), "a");
        assert_eq!(tail("a"), "");
    }

    #[test]
    fn head_tail_roundtrip_multi_component() {
        let p = "a/b/c";
        let (h, t) = (head(p), tail(p));
        assert_eq!(h, "a");
        assert_eq!(t, "b/c");
        let rebuilt = if t.is_empty() { h.to_string() } else { format!("{h}/{t}") };
        assert_eq!(rebuilt, p);
    }

    #[test]
    fn normalizes_repeated_and_trailing_slashes() {
        assert_eq!(VirtualPath::new("//a//b/").as_str(), "a/b");
        assert_eq!(VirtualPath::new("///").as_str(), "");
    }

    #[test]
    fn empty_path_has_empty_head_and_tail() {
        let vp = VirtualPath::new("");
        assert_eq!(vp.head(), "");
        assert_eq!(vp.tail(), "");
    }

    #[test]
    fn join_then_split_recovers_component() {
        let vp = VirtualPath::new("a").join("b");
        assert_eq!(vp.as_str(), "a/b");
        assert_eq!(vp.head(), "a");
        assert_eq!(vp.tail(), "b");
    }

    #[test]
    fn valid_names_accepted_specials_rejected() {
        assert!(is_valid_entry_name(OsStr::new("hello.txt")));
        assert!(!is_valid_entry_name(OsStr::new(".")));
        assert!(!is_valid_entry_name(OsStr::new("..")));
        assert!(!is_valid_entry_name(OsStr::new("a/b")));
        assert!(!is_valid_entry_name(OsStr::new("a\0b")));
        assert!(!is_valid_entry_name(OsStr::new(&"x".repeat(256))));
    }
}
