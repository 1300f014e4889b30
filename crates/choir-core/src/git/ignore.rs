//! `.choirignore` — a small gitignore-style subset consulted by checkpoints.
//!
//! A pattern ending in `/` matches any path under that prefix; anything else
//! is a glob. Blank lines and `#` comments are skipped. When the file is
//! absent, conservative defaults keep logs, build output, dotenv files and
//! SQLite journals out of checkpoints.

use std::path::Path;

use globset::{Glob, GlobMatcher};

/// Patterns applied when no ignore file exists.
pub const DEFAULT_PATTERNS: &[&str] = &[
    "logs/",
    "target/",
    "node_modules/",
    "dist/",
    "build/",
    ".cache/",
    ".env",
    "*.sqlite",
    "*.sqlite-journal",
    "*.db-journal",
];

enum Rule {
    Prefix(String),
    Glob(GlobMatcher),
}

pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    /// Parse rules from pattern lines.
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for line in patterns {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let normalized = line.replace('\\', "/");
            if let Some(prefix) = normalized.strip_suffix('/') {
                rules.push(Rule::Prefix(format!("{prefix}/")));
            } else if let Ok(glob) = Glob::new(&normalized) {
                rules.push(Rule::Glob(glob.compile_matcher()));
            }
        }
        Self { rules }
    }

    /// Load from `<repo_root>/<file_name>`, falling back to the defaults.
    pub fn load(repo_root: &Path, file_name: &str) -> Self {
        match std::fs::read_to_string(repo_root.join(file_name)) {
            Ok(content) => Self::from_patterns(content.lines()),
            Err(_) => Self::from_patterns(DEFAULT_PATTERNS.iter().copied()),
        }
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        let normalized = path.replace('\\', "/");
        let normalized = normalized.trim_start_matches("./");
        self.rules.iter().any(|rule| match rule {
            Rule::Prefix(prefix) => normalized.starts_with(prefix),
            Rule::Glob(glob) => glob.is_match(normalized),
        })
    }

    /// Split paths into (kept, ignored), preserving order.
    pub fn partition<'a>(&self, paths: &'a [String]) -> (Vec<&'a str>, Vec<&'a str>) {
        let mut kept = Vec::new();
        let mut ignored = Vec::new();
        for path in paths {
            if self.is_ignored(path) {
                ignored.push(path.as_str());
            } else {
                kept.push(path.as_str());
            }
        }
        (kept, ignored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_prefix() {
        let rules = IgnoreRules::from_patterns(["logs/"]);
        assert!(rules.is_ignored("logs/cmd_1.txt"));
        assert!(rules.is_ignored("logs/nested/deep.txt"));
        assert!(!rules.is_ignored("logstash.conf"));
    }

    #[test]
    fn glob_patterns() {
        let rules = IgnoreRules::from_patterns(["*.log"]);
        assert!(rules.is_ignored("a.log"));
        assert!(rules.is_ignored("deep/dir/b.log"));
        assert!(!rules.is_ignored("a.txt"));
    }

    #[test]
    fn comments_and_blanks_skipped() {
        let rules = IgnoreRules::from_patterns(["# build artifacts", "", "target/"]);
        assert!(rules.is_ignored("target/debug/choird"));
        assert!(!rules.is_ignored("# build artifacts"));
    }

    #[test]
    fn defaults_cover_sqlite_journals_and_env() {
        let rules = IgnoreRules::from_patterns(DEFAULT_PATTERNS.iter().copied());
        assert!(rules.is_ignored("state.sqlite"));
        assert!(rules.is_ignored("state.sqlite-journal"));
        assert!(rules.is_ignored(".env"));
        assert!(rules.is_ignored("logs/cmd_abc.txt"));
        assert!(!rules.is_ignored("src/main.rs"));
    }

    #[test]
    fn partition_splits_in_order() {
        let rules = IgnoreRules::from_patterns(["*.log"]);
        let paths = vec!["a.log".to_string(), "src/b.txt".to_string()];
        let (kept, ignored) = rules.partition(&paths);
        assert_eq!(kept, vec!["src/b.txt"]);
        assert_eq!(ignored, vec!["a.log"]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let rules = IgnoreRules::load(dir.path(), ".choirignore");
        assert!(rules.is_ignored(".env"));
    }
}
