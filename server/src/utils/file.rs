//! Filesystem path helpers

use std::path::PathBuf;

/// Expand `~`, `~/...` and relative paths into an absolute path.
///
/// Absolute paths pass through untouched. Relative paths are resolved
/// against the current working directory.
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();
    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    if path.is_empty() {
        return cwd();
    }

    let expanded = match path {
        "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        p => match p.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(p)),
            None => PathBuf::from(p),
        },
    };

    if expanded.is_relative() {
        cwd().join(expanded)
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_unchanged() {
        assert_eq!(expand_path("/tmp/stitch"), PathBuf::from("/tmp/stitch"));
    }

    #[test]
    fn test_relative_becomes_absolute() {
        let p = expand_path("data");
        assert!(p.is_absolute());
        assert!(p.ends_with("data"));
    }

    #[test]
    fn test_tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~"), home);
            assert_eq!(expand_path("~/x"), home.join("x"));
        }
    }

    #[test]
    fn test_empty_is_cwd() {
        assert!(expand_path("  ").is_absolute());
    }
}
