//! Read-only settings: emulator catalog, ranking weights and cache limits.
//!
//! Settings live in `settings.json` under the user config directory. A missing
//! file yields the defaults; this crate never writes the file.

use crate::engine::CountryWeights;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MAX_AGE_DAYS: u64 = 14;
pub const DEFAULT_MAX_TOTAL_SIZE_MB: u64 = 10_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// How to start one emulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulatorConfig {
    /// Executable to run.
    pub program: String,
    /// Argument string, usually carrying the core path (`-L cores/snes9x_libretro.so`).
    /// `{rom}` is replaced by the resolved file; without it the file is appended.
    #[serde(default)]
    pub params: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl EmulatorConfig {
    pub fn display_name_or<'a>(&'a self, id: &'a str) -> &'a str {
        self.display_name.as_deref().unwrap_or(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub emulators: BTreeMap<String, EmulatorConfig>,
    pub country_weights: CountryWeights,
    pub standard_weights: Vec<String>,
    pub cache_dir: Option<PathBuf>,
    pub seven_zip: String,
    pub max_age_days: u64,
    pub max_total_size_mb: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            emulators: BTreeMap::new(),
            country_weights: default_country_weights(),
            standard_weights: default_standard_weights(),
            cache_dir: None,
            seven_zip: "7z".to_string(),
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            max_total_size_mb: DEFAULT_MAX_TOTAL_SIZE_MB,
        }
    }
}

impl Settings {
    /// Load from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from the default location, falling back to defaults when absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_settings_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Cache root, resolved against the platform cache directory.
    pub fn cache_root(&self) -> PathBuf {
        if let Some(dir) = self.cache_dir.as_ref() {
            return dir.clone();
        }
        dirs::cache_dir()
            .map(|d| d.join("romrunner").join("extract"))
            .unwrap_or_else(|| std::env::temp_dir().join("romrunner"))
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("romrunner").join("settings.json"))
}

/// GoodTools country codes. USA and World first, then Europe; Japan below the
/// pair `(UE)` so merged western releases win over Japanese ones.
pub fn default_country_weights() -> CountryWeights {
    [
        ("U", 10.0),
        ("W", 9.0),
        ("E", 8.0),
        ("UK", 7.0),
        ("A", 6.0),
        ("F", 5.0),
        ("G", 5.0),
        ("S", 4.0),
        ("I", 4.0),
        ("J", 3.0),
        ("K", 2.0),
        ("C", 2.0),
        ("B", 2.0),
        ("USA", 10.0),
        ("World", 9.0),
        ("Europe", 8.0),
        ("Japan", 3.0),
    ]
    .into_iter()
    .map(|(code, w)| (code.to_string(), w))
    .collect()
}

/// Bracket-code prefixes in ascending preference; the last entry ranks highest.
pub fn default_standard_weights() -> Vec<String> {
    ["h", "p", "a", "f", "!"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "emulators": {
                    "snes": { "program": "retroarch", "params": "-L cores/snes9x_libretro.so", "displayName": "Snes9x" }
                },
                "maxAgeDays": 3
            }"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.max_age_days, 3);
        assert_eq!(settings.max_total_size_mb, DEFAULT_MAX_TOTAL_SIZE_MB);
        assert_eq!(settings.seven_zip, "7z");
        let snes = &settings.emulators["snes"];
        assert_eq!(snes.display_name_or("snes"), "Snes9x");
        assert_eq!(settings.standard_weights, default_standard_weights());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(ConfigError::Json { .. })
        ));
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let settings = Settings {
            cache_dir: Some(PathBuf::from("/tmp/custom")),
            ..Settings::default()
        };
        assert_eq!(settings.cache_root(), PathBuf::from("/tmp/custom"));
    }
}
