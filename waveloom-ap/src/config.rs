//! Layered configuration: compiled-in defaults, an optional TOML file,
//! environment variables, then CLI flags, each overriding the last.

use crate::controller::PlaybackOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_port() -> u16 {
    5723
}

fn default_fade_tags() -> Vec<String> {
    vec!["live".into(), "medley".into(), "nonstop".into()]
}

fn default_crossfade_tags() -> Vec<String> {
    vec!["live".into()]
}

fn default_random_lists_count() -> usize {
    11
}

fn default_peak_delay_ms() -> i64 {
    333
}

/// One configured Ampache server. Passwords are never stored here: callers
/// resolve `password_env` against the process environment at connect time,
/// or prompt, rather than inventing a file-based credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub user: String,
    pub password_env: Option<String>,
    #[serde(default)]
    pub shuffle_tags: Vec<String>,
}

/// Raw shape of the optional TOML config file; every field is optional so a
/// partial file only overrides what it mentions.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    port: Option<u16>,
    shuffle_count: Option<usize>,
    shuffle_favorite_frequency: Option<usize>,
    shuffle_delay_seconds: Option<f64>,
    max_peak_fps: Option<i64>,
    fade_tags: Option<Vec<String>>,
    crossfade_tags: Option<Vec<String>>,
    fade_seconds: Option<i64>,
    random_lists_count: Option<usize>,
    peak_delay_on: Option<bool>,
    peak_delay_ms: Option<i64>,
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

/// Fully resolved configuration handed to `main`.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub playback: PlaybackOptions,
    /// Size of the shuffle favorites/regulars pool fetched per catalog
    /// query; lives outside `PlaybackOptions` since it configures
    /// `waveloom-catalog`'s `CatalogOptions`, not the playback engine.
    pub random_lists_count: usize,
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            playback: PlaybackOptions {
                fade_tags: default_fade_tags(),
                crossfade_tags: default_crossfade_tags(),
                ..PlaybackOptions::default()
            },
            random_lists_count: default_random_lists_count(),
            servers: Vec::new(),
        }
    }
}

/// CLI overrides, layered on top of file and environment settings.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub port: Option<u16>,
}

impl Config {
    /// Loads defaults, then `config_path` if it exists, then `WAVELOOM_*`
    /// environment variables, then `cli`. A missing config file is not an
    /// error; an unparseable one is.
    pub fn load(config_path: &PathBuf, cli: CliOverrides) -> crate::error::Result<Self> {
        let mut config = Config::default();

        if config_path.exists() {
            let toml_str = std::fs::read_to_string(config_path)
                .map_err(|e| crate::error::AudioPlayerError::Config(format!("reading {}: {e}", config_path.display())))?;
            let file: FileConfig = toml::from_str(&toml_str)
                .map_err(|e| crate::error::AudioPlayerError::Config(format!("parsing {}: {e}", config_path.display())))?;
            config.apply_file(file);
        }

        config.apply_env();

        if let Some(port) = cli.port {
            config.port = port;
        }

        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(v) = file.shuffle_count {
            self.playback.shuffle_count = v;
        }
        if let Some(v) = file.shuffle_favorite_frequency {
            self.playback.shuffle_favorite_frequency = v;
        }
        if let Some(v) = file.shuffle_delay_seconds {
            self.playback.shuffle_delay_seconds = v;
        }
        if let Some(v) = file.max_peak_fps {
            self.playback.max_peak_fps = v;
        }
        if let Some(v) = file.fade_tags {
            self.playback.fade_tags = v;
        }
        if let Some(v) = file.crossfade_tags {
            self.playback.crossfade_tags = v;
        }
        if let Some(v) = file.fade_seconds {
            self.playback.fade_seconds = v;
        }
        if let Some(v) = file.random_lists_count {
            self.random_lists_count = v;
        }
        if let Some(on) = file.peak_delay_on {
            self.playback.peak_delay_ms = on.then(|| file.peak_delay_ms.unwrap_or_else(default_peak_delay_ms));
        }
        self.servers = file.servers;
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("WAVELOOM_PORT") {
            if let Ok(port) = v.parse() {
                self.port = port;
            }
        }
        if let Ok(v) = std::env::var("WAVELOOM_SHUFFLE_COUNT") {
            if let Ok(n) = v.parse() {
                self.playback.shuffle_count = n;
            }
        }
        if let Ok(v) = std::env::var("WAVELOOM_MAX_PEAK_FPS") {
            if let Ok(n) = v.parse() {
                self.playback.max_peak_fps = n;
            }
        }
        if let Ok(v) = std::env::var("WAVELOOM_FADE_SECONDS") {
            if let Ok(n) = v.parse() {
                self.playback.fade_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("WAVELOOM_RANDOM_LISTS_COUNT") {
            if let Ok(n) = v.parse() {
                self.random_lists_count = n;
            }
        }
        if let Ok(v) = std::env::var("WAVELOOM_PEAK_DELAY_MS") {
            if let Ok(n) = v.parse() {
                self.playback.peak_delay_ms = Some(n);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.port, 5723);
        assert_eq!(config.playback.shuffle_count, 5);
        assert_eq!(config.playback.shuffle_favorite_frequency, 4);
        assert_eq!(config.playback.max_peak_fps, 25);
        assert_eq!(config.playback.fade_seconds, 4);
        assert_eq!(config.random_lists_count, 11);
        assert_eq!(config.playback.peak_delay_ms, None);
    }

    #[test]
    fn peak_delay_off_by_default_but_on_uses_333ms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waveloom.toml");
        std::fs::write(&path, "peak_delay_on = true\n").unwrap();

        let config = Config::load(&path, CliOverrides::default()).unwrap();
        assert_eq!(config.playback.peak_delay_ms, Some(333));
    }

    #[test]
    fn random_lists_count_and_fade_seconds_are_file_overridable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waveloom.toml");
        std::fs::write(&path, "random_lists_count = 20\nfade_seconds = 6\n").unwrap();

        let config = Config::load(&path, CliOverrides::default()).unwrap();
        assert_eq!(config.random_lists_count, 20);
        assert_eq!(config.playback.fade_seconds, 6);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = Config::load(&PathBuf::from("/nonexistent/waveloom.toml"), CliOverrides::default()).unwrap();
        assert_eq!(config.port, default_port());
    }

    #[test]
    fn cli_override_wins_over_default() {
        let config = Config::load(
            &PathBuf::from("/nonexistent/waveloom.toml"),
            CliOverrides { port: Some(9000) },
        )
        .unwrap();
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn file_overrides_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waveloom.toml");
        std::fs::write(&path, "port = 6000\nshuffle_count = 8\n").unwrap();

        let config = Config::load(&path, CliOverrides::default()).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.playback.shuffle_count, 8);
    }
}
