//! Source file discovery
//!
//! Extracts arrive either as a single file, as a flat directory of CSVs, or
//! partitioned into subdirectories (`data=<date>/sigla_uf=<state>/*.csv` for the
//! establishment tables). Discovery escalates from the cheapest search to the
//! most structural one and stops at the first pattern that yields any file.

use glob::{glob, Pattern};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File extension of source extracts
pub const SOURCE_EXTENSION: &str = "csv";

/// One file-search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPattern {
    /// The path itself is a file
    ExactFile,
    /// `<dir>/*.csv`
    Flat,
    /// `<dir>/**/*.csv`
    Recursive,
    /// `<dir>/data=*/sigla_uf=*/*.csv`
    DatePartition,
}

impl DiscoveryPattern {
    /// Directory patterns in the order they are tried
    pub const ESCALATION: [DiscoveryPattern; 3] = [
        DiscoveryPattern::Flat,
        DiscoveryPattern::Recursive,
        DiscoveryPattern::DatePartition,
    ];

    /// Glob suffix appended to the (escaped) directory
    fn suffix(self) -> Option<String> {
        match self {
            DiscoveryPattern::ExactFile => None,
            DiscoveryPattern::Flat => Some(format!("*.{}", SOURCE_EXTENSION)),
            DiscoveryPattern::Recursive => Some(format!("**/*.{}", SOURCE_EXTENSION)),
            DiscoveryPattern::DatePartition => {
                Some(format!("data=*/sigla_uf=*/*.{}", SOURCE_EXTENSION))
            },
        }
    }

    /// Files under `dir` matched by this pattern, sorted
    pub fn search(self, dir: &Path) -> Vec<PathBuf> {
        let Some(suffix) = self.suffix() else {
            return if dir.is_file() {
                vec![dir.to_path_buf()]
            } else {
                Vec::new()
            };
        };

        let base = Pattern::escape(&dir.to_string_lossy());
        let pattern = format!("{}/{}", base.trim_end_matches('/'), suffix);

        let entries = match glob(&pattern) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalid discovery pattern");
                return Vec::new();
            },
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable path during discovery");
                    None
                },
            })
            .filter(|path| path.is_file())
            .collect();

        files.sort();
        files
    }
}

impl fmt::Display for DiscoveryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.suffix() {
            Some(suffix) => f.write_str(&suffix),
            None => f.write_str("<file>"),
        }
    }
}

/// Result of resolving a source path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Pattern that produced `files`, `None` when nothing matched
    pub pattern: Option<DiscoveryPattern>,
    pub files: Vec<PathBuf>,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Resolve `path` to the ordered list of source files to parse
pub fn discover_source_files(path: &Path) -> Discovery {
    if path.is_file() {
        return Discovery {
            pattern: Some(DiscoveryPattern::ExactFile),
            files: vec![path.to_path_buf()],
        };
    }

    for pattern in DiscoveryPattern::ESCALATION {
        let files = pattern.search(path);
        if files.is_empty() {
            continue;
        }

        match pattern {
            DiscoveryPattern::Flat => {},
            DiscoveryPattern::Recursive => {
                info!("Found {} CSV files in subdirectories (partitioned data)", files.len())
            },
            _ => info!("Found {} CSV files using date/state partition pattern", files.len()),
        }

        return Discovery {
            pattern: Some(pattern),
            files,
        };
    }

    warn!(path = %path.display(), "No CSV files found");
    warn!(
        "Checked paths: {}",
        DiscoveryPattern::ESCALATION
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    Discovery::default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "a\n1\n").unwrap();
        path
    }

    #[test]
    fn test_exact_file_is_sole_candidate() {
        let dir = TempDir::new().unwrap();
        let file = touch(dir.path(), "only.csv");
        touch(dir.path(), "other.csv");

        let discovery = discover_source_files(&file);
        assert_eq!(discovery.pattern, Some(DiscoveryPattern::ExactFile));
        assert_eq!(discovery.files, vec![file]);
    }

    #[test]
    fn test_flat_match_wins_over_nested() {
        let dir = TempDir::new().unwrap();
        let b = touch(dir.path(), "b.csv");
        let a = touch(dir.path(), "a.csv");
        touch(dir.path(), "nested/c.csv");
        touch(dir.path(), "notes.txt");

        let discovery = discover_source_files(dir.path());
        assert_eq!(discovery.pattern, Some(DiscoveryPattern::Flat));
        assert_eq!(discovery.files, vec![a, b]);
    }

    #[test]
    fn test_recursive_when_flat_is_empty() {
        let dir = TempDir::new().unwrap();
        let deep = touch(dir.path(), "x/y/z.csv");
        let shallow = touch(dir.path(), "x/a.csv");

        let discovery = discover_source_files(dir.path());
        assert_eq!(discovery.pattern, Some(DiscoveryPattern::Recursive));
        assert_eq!(discovery.files, vec![shallow, deep]);
    }

    #[test]
    fn test_partition_layout_returns_exactly_partition_files() {
        let dir = TempDir::new().unwrap();
        let sp = touch(dir.path(), "data=2024-05-12/sigla_uf=SP/part-0.csv");
        let rj = touch(dir.path(), "data=2024-05-12/sigla_uf=RJ/part-0.csv");

        let discovery = discover_source_files(dir.path());
        assert_eq!(discovery.files, vec![rj.clone(), sp.clone()]);

        // The partition pattern on its own resolves the same files
        assert_eq!(DiscoveryPattern::DatePartition.search(dir.path()), vec![rj, sp]);
    }

    #[test]
    fn test_partition_pattern_ignores_other_layouts() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "year=2024/state=SP/part-0.csv");
        assert!(DiscoveryPattern::DatePartition.search(dir.path()).is_empty());
    }

    #[test]
    fn test_empty_when_nothing_matches() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "readme.md");

        let discovery = discover_source_files(dir.path());
        assert!(discovery.is_empty());
        assert_eq!(discovery.pattern, None);
    }

    #[test]
    fn test_missing_path_is_empty() {
        let discovery = discover_source_files(Path::new("/definitely/not/here"));
        assert!(discovery.is_empty());
    }

    #[test]
    fn test_glob_metacharacters_in_directory_name() {
        let dir = TempDir::new().unwrap();
        let odd = dir.path().join("extract[1]");
        let file = touch(&odd, "a.csv");

        let discovery = discover_source_files(&odd);
        assert_eq!(discovery.files, vec![file]);
    }
}
