//! Mapping of stored logical paths to real filesystem paths.

use std::path::{Path, PathBuf};

pub trait PathResolver: Send + Sync {
    fn resolve(&self, logical: &str) -> PathBuf;
}

/// Paths are used as given, except for a leading `~` which expands to the home
/// directory and relative paths which are joined onto `base`.
#[derive(Debug, Clone, Default)]
pub struct LocalPathResolver {
    base: Option<PathBuf>,
}

impl LocalPathResolver {
    pub fn new() -> Self {
        Self {
            base: std::env::current_dir().ok(),
        }
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }
}

impl PathResolver for LocalPathResolver {
    fn resolve(&self, logical: &str) -> PathBuf {
        let expanded = match logical.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with(['/', '\\']) => {
                match dirs::home_dir() {
                    Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
                    None => PathBuf::from(logical),
                }
            }
            _ => PathBuf::from(logical),
        };
        match &self.base {
            Some(base) if expanded.is_relative() => base.join(expanded),
            _ => expanded,
        }
    }
}

/// Whether `path` exists and is a regular file.
pub fn is_launchable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_the_base() {
        let r = LocalPathResolver::with_base("/library");
        assert_eq!(r.resolve("snes/Game.zip"), PathBuf::from("/library/snes/Game.zip"));
        assert_eq!(r.resolve("/abs/Game.zip"), PathBuf::from("/abs/Game.zip"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let r = LocalPathResolver::with_base("/library");
        assert_eq!(r.resolve("~/roms/a.sfc"), home.join("roms/a.sfc"));
        assert_eq!(r.resolve("~user/a.sfc"), PathBuf::from("/library/~user/a.sfc"));
    }
}
