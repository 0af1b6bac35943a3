use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures loading an explicitly requested settings file, split so callers
/// and tests can tell a missing file from a malformed one.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read settings file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path:?} is not valid JSON")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// All tunable knobs in one serde struct. Every threshold the matcher and
/// parser use lives here so test runs and odd libraries can retune them
/// without touching code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Library roots holding one folder per series.
    pub library_dirs: Vec<PathBuf>,
    /// Folders new files land in.
    pub download_dirs: Vec<PathBuf>,
    /// Archive extensions worth processing (lowercase, with dot).
    pub archive_extensions: Vec<String>,

    /// Similarity required for a Path Cache hit. Deliberately higher than
    /// the general threshold: the cache is a strong prior and a false
    /// positive here silently corrupts a library.
    pub cache_match_threshold: f64,
    /// General-purpose name similarity threshold.
    pub required_similarity: f64,
    /// Cover image similarity threshold.
    pub image_match_threshold: f64,
    /// Similarity for a filename bracket to count as a known publisher.
    pub publisher_similarity: f64,
    /// Similarity for a filename bracket to count as a known release group.
    pub release_group_similarity: f64,
    /// Fraction of leading words kept when comparing truncated word lists.
    pub word_keep_fraction: f64,
    /// A shared word appearing at most this many times across all candidate
    /// folder names counts as distinctive identity evidence.
    pub distinctive_word_max_frequency: usize,

    /// Keyword scoring rules for the upgrade decider, evaluated in order.
    pub keyword_rules: Vec<KeywordRuleConfig>,

    /// Path Cache persistence file.
    pub cache_file: PathBuf,
    /// Known publisher names, one per line.
    pub publishers_file: PathBuf,
    /// Known release group names, one per line.
    pub release_groups_file: PathBuf,

    /// When true, equal-score/different-hash duplicate ties are skipped
    /// instead of being surfaced for a manual decision.
    pub unattended: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRuleConfig {
    /// Regex matched against the raw filename.
    pub pattern: String,
    pub weight: f64,
    /// "volume", "chapter", or absent for both.
    #[serde(default)]
    pub applies_to: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            library_dirs: Vec::new(),
            download_dirs: Vec::new(),
            archive_extensions: vec![
                ".cbz".to_string(),
                ".cbr".to_string(),
                ".zip".to_string(),
                ".rar".to_string(),
                ".7z".to_string(),
                ".epub".to_string(),
            ],
            cache_match_threshold: 0.979,
            required_similarity: 0.9,
            image_match_threshold: 0.9,
            publisher_similarity: 0.9,
            release_group_similarity: 0.8,
            word_keep_fraction: 0.7,
            distinctive_word_max_frequency: 3,
            keyword_rules: default_keyword_rules(),
            cache_file: PathBuf::from("matched_paths.txt"),
            publishers_file: PathBuf::from("publishers.txt"),
            release_groups_file: PathBuf::from("release_groups.txt"),
            unattended: false,
        }
    }
}

fn default_keyword_rules() -> Vec<KeywordRuleConfig> {
    vec![
        KeywordRuleConfig {
            pattern: r"(?i)\bpremium\b".to_string(),
            weight: 3.0,
            applies_to: None,
        },
        KeywordRuleConfig {
            pattern: r"(?i)\(digital\)".to_string(),
            weight: 1.0,
            applies_to: None,
        },
        KeywordRuleConfig {
            pattern: r"(?i)\bfix(?:ed)?\b".to_string(),
            weight: 0.5,
            applies_to: None,
        },
        KeywordRuleConfig {
            pattern: r"(?i)\bdanke\b".to_string(),
            weight: 1.0,
            applies_to: None,
        },
        KeywordRuleConfig {
            pattern: r"(?i)\bf2\b".to_string(),
            weight: 0.5,
            applies_to: None,
        },
    ]
}

impl Settings {
    /// Load settings from a JSON file, or defaults when no path is given.
    /// A missing file is an error (an explicitly requested config should
    /// exist); a missing OPTIONAL list file is not (see `load_name_list`).
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let settings: Settings =
                    serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                debug!("Loaded settings from {:?}", path);
                Ok(settings)
            }
            None => Ok(Settings::default()),
        }
    }

    /// True if `dir` is one of the configured library or download roots.
    /// Used to stop the parser's parent-folder fallback from swallowing a
    /// root directory name as a series name.
    pub fn is_configured_root(&self, dir: &Path) -> bool {
        self.library_dirs
            .iter()
            .chain(self.download_dirs.iter())
            .any(|root| root == dir)
    }
}

/// Load a known-name list (publishers, release groups): one name per line,
/// `#` comments and blank lines ignored. A missing file just means an empty
/// list — these files are optional seed data, not required configuration.
pub fn load_name_list(path: &Path) -> Vec<String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("Could not read name list {:?}: {} (using empty list)", path, err);
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !names.iter().any(|existing: &String| existing == line) {
            names.push(line.to_string());
        }
    }

    debug!("Loaded {} names from {:?}", names.len(), path);
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_thresholds() {
        let settings = Settings::default();
        assert_eq!(settings.cache_match_threshold, 0.979);
        assert_eq!(settings.required_similarity, 0.9);
        assert_eq!(settings.image_match_threshold, 0.9);
        assert_eq!(settings.publisher_similarity, 0.9);
        assert_eq!(settings.release_group_similarity, 0.8);
        assert_eq!(settings.word_keep_fraction, 0.7);
        assert_eq!(settings.distinctive_word_max_frequency, 3);
    }

    #[test]
    fn test_load_settings_from_file() {
        let tmp_dir = TempDir::new().unwrap();
        let config_path = tmp_dir.path().join("organizer.json");
        fs::write(
            &config_path,
            r#"{ "required_similarity": 0.85, "unattended": true }"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&config_path)).unwrap();
        assert_eq!(settings.required_similarity, 0.85);
        assert!(settings.unattended);
        // Unspecified fields keep their defaults.
        assert_eq!(settings.cache_match_threshold, 0.979);
    }

    #[test]
    fn test_load_settings_missing_file_is_read_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/organizer.json"))).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn test_load_settings_malformed_json_is_parse_error() {
        let tmp_dir = TempDir::new().unwrap();
        let config_path = tmp_dir.path().join("organizer.json");
        fs::write(&config_path, "{ this is not json").unwrap();

        let err = Settings::load(Some(&config_path)).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn test_load_name_list() {
        let tmp_dir = TempDir::new().unwrap();
        let list_path = tmp_dir.path().join("publishers.txt");
        fs::write(
            &list_path,
            "# official publishers\nViz Media\nKodansha Comics\n\nViz Media\n",
        )
        .unwrap();

        let names = load_name_list(&list_path);
        assert_eq!(names, vec!["Viz Media", "Kodansha Comics"]);
    }

    #[test]
    fn test_load_name_list_missing_file_is_empty() {
        let names = load_name_list(Path::new("/nonexistent/publishers.txt"));
        assert!(names.is_empty());
    }

    #[test]
    fn test_is_configured_root() {
        let mut settings = Settings::default();
        settings.download_dirs = vec![PathBuf::from("/downloads")];
        assert!(settings.is_configured_root(Path::new("/downloads")));
        assert!(!settings.is_configured_root(Path::new("/downloads/One Piece")));
    }

    #[test]
    fn test_default_keyword_rules_compile() {
        for rule in Settings::default().keyword_rules {
            assert!(regex::Regex::new(&rule.pattern).is_ok(), "{}", rule.pattern);
        }
    }
}
