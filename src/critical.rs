//! `critical-paths.txt`: path fragments that carry an invariant worth
//! repeating whenever a matching file is edited.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalPath {
    pub pattern: String,
    pub invariant: String,
}

impl CriticalPath {
    /// Parse `pattern | invariant` lines. Blank lines, `#` comments, lines
    /// without a separator and empty patterns are skipped.
    pub fn parse_all(contents: &str) -> Vec<Self> {
        contents
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                let (pattern, invariant) = line.split_once('|')?;
                let pattern = pattern.trim().replace('\\', "/");
                (!pattern.is_empty()).then(|| Self {
                    pattern,
                    invariant: invariant.trim().to_string(),
                })
            })
            .collect()
    }

    /// Substring match against a `/`-normalized path.
    pub fn matches(&self, path: &str) -> bool {
        path.contains(&self.pattern)
    }
}

impl fmt::Display for CriticalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Critical path \"{}\": {}", self.pattern, self.invariant)
    }
}

/// Every critical path `path` falls under, rendered one per line.
pub fn warnings(paths: &[CriticalPath], path: &str) -> Option<String> {
    let hits: Vec<String> = paths
        .iter()
        .filter(|c| c.matches(path))
        .map(|c| format!("{c}\n"))
        .collect();
    (!hits.is_empty()).then(|| hits.concat())
}
