use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub embedding: EmbeddingConfig,
    pub matching: MatchingConfig,
    pub session: SessionConfig,
    pub enrollment: EnrollmentConfig,
    pub speech: SpeechConfig,
    pub storage: StorageConfig,
    pub display: DisplayConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    /// Requested resolution and frame rate; the driver may negotiate others
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Negotiated resolutions below this floor are rejected
    pub min_width: u32,
    pub min_height: u32,

    /// Consecutive read failures tolerated before the loop gives up
    pub max_read_failures: u32,
    pub retry_delay_ms: u64,
}

impl CameraConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Seconds from the config file, rounded to whole milliseconds
fn millis(secs: f32) -> Duration {
    Duration::from_millis((secs as f64 * 1000.0).round().max(0.0) as u64)
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
            min_width: 640,
            min_height: 480,
            max_read_failures: 5,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/scrfd_10g_bnkps.onnx"),
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_path: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/w600k_r50.onnx"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// A match must score strictly above this cosine similarity
    pub threshold: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { threshold: 0.50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub zoom_duration_secs: f32,
    pub greeting_cooldown_secs: f32,
    pub detection_interval_secs: f32,

    /// Fraction of the face box added on each side of the zoom crop
    pub zoom_padding: f32,

    /// Initial state of the low-light enhancement toggle
    pub low_light: bool,
    pub enhance_alpha: f32,
    pub enhance_beta: f32,

    /// `{name}` is replaced with the recognized person's name
    pub greeting: String,
}

impl SessionConfig {
    pub fn zoom_duration(&self) -> Duration {
        millis(self.zoom_duration_secs)
    }

    pub fn greeting_cooldown(&self) -> Duration {
        millis(self.greeting_cooldown_secs)
    }

    pub fn detection_interval(&self) -> Duration {
        millis(self.detection_interval_secs)
    }

    pub fn greeting_for(&self, name: &str) -> String {
        self.greeting.replace("{name}", name)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            zoom_duration_secs: 1.7,
            greeting_cooldown_secs: 5.0,
            detection_interval_secs: 0.1,
            zoom_padding: 0.3,
            low_light: true,
            enhance_alpha: 1.2,
            enhance_beta: 5.0,
            greeting: "Your friend {name} is in front of you.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub capture_cooldown_secs: f32,
    pub preview_interval_secs: f32,
    /// Faces narrower or shorter than this (pixels) are flagged in the preview
    pub min_face_size: u32,
}

impl EnrollmentConfig {
    pub fn capture_cooldown(&self) -> Duration {
        millis(self.capture_cooldown_secs)
    }

    pub fn preview_interval(&self) -> Duration {
        millis(self.preview_interval_secs)
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            capture_cooldown_secs: 2.0,
            preview_interval_secs: 0.2,
            min_face_size: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub command: String,
    /// Arguments placed before the spoken text
    pub args: Vec<String>,
    pub min_interval_secs: f32,
}

impl SpeechConfig {
    pub fn min_interval(&self) -> Duration {
        millis(self.min_interval_secs)
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        let command = if cfg!(target_os = "macos") { "say" } else { "espeak" };
        Self {
            enabled: true,
            command: command.to_string(),
            args: Vec::new(),
            min_interval_secs: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("known_faces.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// When set, the terminal display writes every rendered frame here
    pub preview_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub save_screenshots: bool,
    pub output_dir: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            save_screenshots: true,
            output_dir: PathBuf::from("~/.cache/vina/debug"),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/vina/vina.toml (system-wide)
    /// 2. ~/.config/vina/vina.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config) = Self::load_from_path("/etc/vina/vina.toml") {
            config.validate()?;
            return Ok(config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("vina")
                .join("vina.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                config.validate()?;
                return Ok(config);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load an explicitly requested file; unlike `load`, errors are not skipped
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_path(path)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 || self.camera.fps == 0 {
            return Err(ConfigError::Validation(
                "Camera dimensions and frame rate must be non-zero".to_string(),
            ));
        }

        if self.camera.max_read_failures == 0 {
            return Err(ConfigError::Validation(
                "Camera max_read_failures must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Validation(
                "Detection confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.nms_threshold) {
            return Err(ConfigError::Validation(
                "NMS threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.matching.threshold) {
            return Err(ConfigError::Validation(
                "Matching threshold must be between -1.0 and 1.0".to_string(),
            ));
        }

        let durations = [
            ("session.zoom_duration_secs", self.session.zoom_duration_secs),
            ("session.greeting_cooldown_secs", self.session.greeting_cooldown_secs),
            ("session.detection_interval_secs", self.session.detection_interval_secs),
            ("enrollment.capture_cooldown_secs", self.enrollment.capture_cooldown_secs),
            ("enrollment.preview_interval_secs", self.enrollment.preview_interval_secs),
            ("speech.min_interval_secs", self.speech.min_interval_secs),
        ];
        for (key, secs) in durations {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be a non-negative number of seconds",
                    key
                )));
            }
        }

        if !(0.0..=2.0).contains(&self.session.zoom_padding) {
            return Err(ConfigError::Validation(
                "Zoom padding must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.session.enhance_alpha <= 0.0 {
            return Err(ConfigError::Validation(
                "Enhancement alpha must be positive".to_string(),
            ));
        }

        if !self.session.greeting.contains("{name}") {
            return Err(ConfigError::Validation(
                "Greeting must contain a {name} placeholder".to_string(),
            ));
        }

        if self.speech.enabled && self.speech.command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Speech command cannot be empty while speech is enabled".to_string(),
            ));
        }

        if self.storage.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Database path cannot be empty".to_string(),
            ));
        }

        if self.debug.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Debug output directory cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.matching.threshold, 0.50);
        assert_eq!(config.session.detection_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [session]
            zoom_duration_secs = 3.0

            [storage]
            database_path = "/tmp/faces.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.zoom_duration_secs, 3.0);
        assert_eq!(config.session.greeting_cooldown_secs, 5.0);
        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/faces.json"));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = Config::default();
        config.matching.threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_rejects_greeting_without_placeholder() {
        let mut config = Config::default();
        config.session.greeting = "Hello there".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_greeting_for() {
        let config = SessionConfig::default();
        assert_eq!(
            config.greeting_for("Alice"),
            "Your friend Alice is in front of you."
        );
    }
}
