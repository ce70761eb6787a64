//! Simple configuration persistence for Duet
//!
//! Stores the media location, the annotation room and engine tuning.

use duet_analysis::DetectorOptions;
use duet_audio::MixdeskOptions;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Folder holding the room's audio files
    pub media_dir: Option<PathBuf>,
    /// Annotation database; defaults to the user data dir
    pub database_path: Option<PathBuf>,
    pub room: String,
    /// Wait between a sync seek and the play that follows it
    pub sync_settle_ms: u64,
    pub poll_hz: u32,
    pub auto_detect_on_load: bool,
    pub detect_max_seconds: f64,
    pub detect_min_bpm: f64,
    pub detect_max_bpm: f64,
    pub detect_sensitivity: f64,
}

impl Default for Config {
    fn default() -> Self {
        let detector = DetectorOptions::default();
        Self {
            media_dir: None,
            database_path: None,
            room: "default".to_string(),
            sync_settle_ms: 50,
            poll_hz: 60,
            auto_detect_on_load: true,
            detect_max_seconds: detector.max_duration_seconds,
            detect_min_bpm: detector.min_bpm,
            detect_max_bpm: detector.max_bpm,
            detect_sensitivity: detector.sensitivity,
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = self.serialize();
        fs::write(path, content)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("duet")
            .join("config.txt")
    }

    /// Annotation database location
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("duet")
                .join("annotations.db")
        })
    }

    /// Folder audio files are resolved against
    pub fn media_dir(&self) -> PathBuf {
        self.media_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            max_duration_seconds: self.detect_max_seconds,
            min_bpm: self.detect_min_bpm,
            max_bpm: self.detect_max_bpm,
            sensitivity: self.detect_sensitivity,
        }
    }

    pub fn mixdesk_options(&self) -> MixdeskOptions {
        MixdeskOptions {
            room: self.room.clone(),
            settle_delay: Duration::from_millis(self.sync_settle_ms),
            poll_hz: self.poll_hz.max(1),
            auto_detect_on_load: self.auto_detect_on_load,
            detector: self.detector_options(),
        }
    }

    /// Parse config from simple key=value format
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "media_dir" => {
                    if !value.is_empty() {
                        config.media_dir = Some(PathBuf::from(value));
                    }
                }
                "database_path" => {
                    if !value.is_empty() {
                        config.database_path = Some(PathBuf::from(value));
                    }
                }
                "room" => {
                    if !value.is_empty() {
                        config.room = value.to_string();
                    }
                }
                "sync_settle_ms" => set_parsed(&mut config.sync_settle_ms, key, value),
                "poll_hz" => set_parsed(&mut config.poll_hz, key, value),
                "auto_detect_on_load" => set_parsed(&mut config.auto_detect_on_load, key, value),
                "detect_max_seconds" => set_parsed(&mut config.detect_max_seconds, key, value),
                "detect_min_bpm" => set_parsed(&mut config.detect_min_bpm, key, value),
                "detect_max_bpm" => set_parsed(&mut config.detect_max_bpm, key, value),
                "detect_sensitivity" => set_parsed(&mut config.detect_sensitivity, key, value),
                _ => {} // Ignore unknown keys
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let mut lines = Vec::new();
        lines.push("# Duet Configuration".to_string());

        if let Some(ref dir) = self.media_dir {
            lines.push(format!("media_dir={}", dir.display()));
        }
        if let Some(ref path) = self.database_path {
            lines.push(format!("database_path={}", path.display()));
        }
        lines.push(format!("room={}", self.room));
        lines.push(format!("sync_settle_ms={}", self.sync_settle_ms));
        lines.push(format!("poll_hz={}", self.poll_hz));
        lines.push(format!("auto_detect_on_load={}", self.auto_detect_on_load));
        lines.push(format!("detect_max_seconds={}", self.detect_max_seconds));
        lines.push(format!("detect_min_bpm={}", self.detect_min_bpm));
        lines.push(format!("detect_max_bpm={}", self.detect_max_bpm));
        lines.push(format!("detect_sensitivity={}", self.detect_sensitivity));

        lines.join("\n")
    }
}

fn set_parsed<T: FromStr>(field: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *field = parsed,
        Err(_) => warn!(key, value, "ignoring invalid config value"),
    }
}
