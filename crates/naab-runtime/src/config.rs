//! Project-local `.naabrc` configuration.
//!
//! A `.naabrc` (TOML) in the project directory, or any ancestor, may
//! add module search paths and import aliases:
//!
//! ```toml
//! [paths]
//! extra = ["./vendor", "../shared"]
//!
//! [aliases]
//! util = "./lib/util.naab"
//! ```

use naab_core::NaabError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NaabRc {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsSection {
    #[serde(default)]
    pub extra: Vec<String>,
}

impl NaabRc {
    /// Search `start` and its ancestors for a `.naabrc` and parse it.
    /// Missing files are simply an empty config.
    pub fn discover(start: &Path) -> Result<NaabRc, NaabError> {
        let mut dir = Some(start);
        while let Some(current) = dir {
            let candidate = current.join(".naabrc");
            if candidate.is_file() {
                return Self::load(&candidate);
            }
            dir = current.parent();
        }
        Ok(NaabRc::default())
    }

    pub fn load(path: &Path) -> Result<NaabRc, NaabError> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            NaabError::new(
                naab_core::ErrorKind::Io,
                format!("invalid .naabrc at {}: {}", path.display(), e),
            )
        })
    }

    /// Extra search paths, resolved relative to the config's home.
    pub fn extra_paths(&self, base: &Path) -> Vec<PathBuf> {
        self.paths
            .extra
            .iter()
            .map(|p| base.join(p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_rc_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let rc = NaabRc::discover(dir.path()).unwrap();
        assert!(rc.paths.extra.is_empty());
        assert!(rc.aliases.is_empty());
    }

    #[test]
    fn test_parse_rc() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".naabrc"),
            "[paths]\nextra = [\"./vendor\"]\n\n[aliases]\nutil = \"./lib/util.naab\"\n",
        )
        .unwrap();
        let rc = NaabRc::discover(dir.path()).unwrap();
        assert_eq!(rc.paths.extra, vec!["./vendor"]);
        assert_eq!(rc.aliases["util"], "./lib/util.naab");
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".naabrc"), "[paths]\nextra = [\"x\"]\n").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let rc = NaabRc::discover(&nested).unwrap();
        assert_eq!(rc.paths.extra, vec!["x"]);
    }

    #[test]
    fn test_invalid_rc_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".naabrc"), "not [valid").unwrap();
        assert!(NaabRc::discover(dir.path()).is_err());
    }
}
