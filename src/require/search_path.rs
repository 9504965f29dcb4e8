//! Module search path

/// Separator between entries of the search-path environment variable
#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

/// Ordered list of directories searched by the resolver.
///
/// Entries are kept as given: no deduplication, normalization or existence
/// checks. A bad entry simply never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<String>,
}

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a separator-delimited list, dropping empty entries
    pub fn from_value(value: &str) -> Self {
        Self {
            dirs: value
                .split(PATH_SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Read the search path from environment variable `var` (empty if unset)
    pub fn from_env(var: &str) -> Self {
        match std::env::var_os(var) {
            Some(value) => Self::from_value(&value.to_string_lossy()),
            None => Self::new(),
        }
    }

    pub fn push(&mut self, dir: impl Into<String>) {
        self.dirs.push(dir.into());
    }

    /// Insert `dir` ahead of every existing entry
    pub fn prepend(&mut self, dir: impl Into<String>) {
        self.dirs.insert(0, dir.into());
    }

    pub fn clear(&mut self) {
        self.dirs.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.dirs.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.dirs
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

impl Extend<String> for SearchPath {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.dirs.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_drops_empty_entries() {
        let value = format!("a{0}{0}b{0}", PATH_SEPARATOR);
        let path = SearchPath::from_value(&value);
        assert_eq!(path.as_slice(), ["a", "b"]);
    }

    #[test]
    fn test_no_dedup() {
        let value = format!("x{0}x", PATH_SEPARATOR);
        assert_eq!(SearchPath::from_value(&value).len(), 2);
    }

    #[test]
    fn test_unset_env_is_empty() {
        let path = SearchPath::from_env("NLREQ_TEST_UNSET_VARIABLE_4f1c");
        assert!(path.is_empty());
    }

    #[test]
    fn test_mutation() {
        let mut path = SearchPath::from_value("b");
        path.prepend("a");
        path.push("c");
        path.extend(["d".to_string()]);
        assert_eq!(path.iter().collect::<Vec<_>>(), ["a", "b", "c", "d"]);

        path.clear();
        assert!(path.is_empty());
    }
}
