// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Configuration module

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::streaming::StreamingConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name shown in notifications
    pub system_name: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Use simulated camera, PIR and classifier
    pub demo_mode: bool,

    /// Grace period for coordinated shutdown
    pub shutdown_grace_ms: u64,

    pub camera: CameraConfig,
    pub motion: MotionConfig,
    pub classification: ClassificationConfig,
    pub pipeline: PipelineConfig,
    pub state: StateConfig,
    pub alerts: AlertConfig,
    pub notify: NotifyConfig,
    pub streaming: StreamingConfig,
    pub database: DatabaseConfig,
    pub snapshots: SnapshotConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_name: "Smart Security System".to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            demo_mode: true,
            shutdown_grace_ms: 5000,
            camera: CameraConfig::default(),
            motion: MotionConfig::default(),
            classification: ClassificationConfig::default(),
            pipeline: PipelineConfig::default(),
            state: StateConfig::default(),
            alerts: AlertConfig::default(),
            notify: NotifyConfig::default(),
            streaming: StreamingConfig::default(),
            database: DatabaseConfig::default(),
            snapshots: SnapshotConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("homeguard"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Apply overrides from process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides using the `.env` variable names
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.notify.telegram_bot_token = Some(token);
        }
        if let Some(chat_id) = lookup("TELEGRAM_CHAT_ID") {
            self.notify.telegram_chat_id = Some(chat_id);
        }
        if let Some(value) = lookup("ALERT_COOLDOWN") {
            let secs = parse_env("ALERT_COOLDOWN", &value)?;
            self.alerts.cooldown.critical_secs = secs;
            self.alerts.cooldown.high_secs = secs;
        }
        if let Some(value) = lookup("MOTION_MIN_AREA") {
            self.motion.min_area = Some(parse_env("MOTION_MIN_AREA", &value)?);
        }
        if let Some(value) = lookup("CAMERA_FPS") {
            self.camera.fps = parse_env("CAMERA_FPS", &value)?;
        }
        if let Some(value) = lookup("DETECTION_CONFIDENCE") {
            self.classification.min_confidence = parse_env("DETECTION_CONFIDENCE", &value)?;
        }
        if let Some(value) = lookup("MAX_SNAPSHOTS") {
            self.snapshots.max_snapshots = parse_env("MAX_SNAPSHOTS", &value)?;
        }
        if let Some(value) = lookup("SNAPSHOT_RETENTION_DAYS") {
            self.snapshots.retention_days = parse_env("SNAPSHOT_RETENTION_DAYS", &value)?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        Ok(())
    }

    /// Check every threshold and required value
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Result<()> {
            Err(Error::Config(msg.into()))
        }

        if self.camera.fps == 0 {
            return invalid("camera.fps must be positive");
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return invalid("camera resolution must be positive");
        }
        if !(1..=crate::sensors::MAX_FRAMES_IN_FLIGHT).contains(&self.camera.buffer_slots) {
            return invalid(format!(
                "camera.buffer_slots must be between 1 and {}",
                crate::sensors::MAX_FRAMES_IN_FLIGHT
            ));
        }
        if self.camera.capture_timeout_ms == 0 {
            return invalid("camera.capture_timeout_ms must be positive");
        }

        if !(self.motion.learning_rate > 0.0 && self.motion.learning_rate <= 1.0) {
            return invalid("motion.learning_rate must be in (0, 1]");
        }
        if self.motion.min_area == Some(0) {
            return invalid("motion.min_area must be positive");
        }
        if !(self.motion.min_area_ratio > 0.0 && self.motion.min_area_ratio <= 1.0) {
            return invalid("motion.min_area_ratio must be in (0, 1]");
        }

        if !(0.0..=1.0).contains(&self.classification.min_confidence) {
            return invalid("classification.min_confidence must be in [0, 1]");
        }
        if self.classification.timeout_ms == 0 {
            return invalid("classification.timeout_ms must be positive");
        }
        if self.classification.classify_every == 0 {
            return invalid("classification.classify_every must be at least 1");
        }

        if self.pipeline.poll_interval_ms == 0 {
            return invalid("pipeline.poll_interval_ms must be positive");
        }
        if self.pipeline.event_queue_capacity == 0 || self.pipeline.trigger_capacity == 0 {
            return invalid("pipeline queue capacities must be positive");
        }

        if self.state.no_motion_timeout_secs == 0 {
            return invalid("state.no_motion_timeout_secs must be positive");
        }
        if self.state.alarm_quiet_period_secs == Some(0) {
            return invalid("state.alarm_quiet_period_secs must be positive when set");
        }
        if self.state.tick_interval_ms == 0 {
            return invalid("state.tick_interval_ms must be positive");
        }

        if self.alerts.max_attempts == 0 {
            return invalid("alerts.max_attempts must be at least 1");
        }
        if self.alerts.send_timeout_ms == 0 {
            return invalid("alerts.send_timeout_ms must be positive");
        }
        if self.alerts.initial_backoff_ms > self.alerts.max_backoff_ms {
            return invalid("alerts.initial_backoff_ms exceeds alerts.max_backoff_ms");
        }

        if self.snapshots.enabled && self.snapshots.max_snapshots == 0 {
            return invalid("snapshots.max_snapshots must be at least 1");
        }
        if tracing_subscriber::EnvFilter::try_new(&self.log_level).is_err() {
            return invalid(format!("log_level {:?} is not a valid filter", self.log_level));
        }

        match self.notify.channel {
            NotifyChannel::Log => {}
            NotifyChannel::Telegram => {
                match self.notify.telegram_bot_token.as_deref() {
                    Some(token) if token.contains(':') => {}
                    Some(_) => return invalid("TELEGRAM_BOT_TOKEN is malformed"),
                    None => return invalid("TELEGRAM_BOT_TOKEN is required for the telegram channel"),
                }
                match self.notify.telegram_chat_id.as_deref() {
                    Some(id) if id.trim_start_matches('-').parse::<i64>().is_ok() => {}
                    Some(_) => return invalid("TELEGRAM_CHAT_ID must be numeric"),
                    None => return invalid("TELEGRAM_CHAT_ID is required for the telegram channel"),
                }
            }
            NotifyChannel::Mqtt => {
                if self.notify.mqtt_broker.is_empty() {
                    return invalid("notify.mqtt_broker is required for the mqtt channel");
                }
            }
        }

        if self.streaming.status_enabled && self.streaming.port < 1024 {
            warn!("Status endpoint bound to privileged port {}", self.streaming.port);
        }

        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Where alert snapshots are written; `data_dir/snapshots` unless overridden
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshots
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("snapshots"))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value {:?}", key, value)))
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Per-capture timeout
    pub capture_timeout_ms: u64,

    /// Frames held between acquisition and detection (1 or 2)
    pub buffer_slots: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
            capture_timeout_ms: 500,
            buffer_slots: 2,
        }
    }
}

/// Motion confirmation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Per-pixel difference marking foreground (0-255)
    pub pixel_threshold: u8,

    /// Background update rate
    pub learning_rate: f32,

    /// Absolute minimum foreground area in pixels
    pub min_area: Option<usize>,

    /// Minimum foreground area as a fraction of the frame, used when `min_area` is unset
    pub min_area_ratio: f64,

    /// Frames used only to seed the background
    pub warmup_frames: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: 25,
            learning_rate: 0.05,
            min_area: None,
            min_area_ratio: 0.005,
            warmup_frames: 10,
        }
    }
}

/// Classification stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Entries below this confidence are discarded
    pub min_confidence: f64,

    /// Inference latency budget
    pub timeout_ms: u64,

    /// Classify at most one in every K pulled frames
    pub classify_every: u32,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            timeout_ms: 300,
            classify_every: 3,
        }
    }
}

/// Detection pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Vision poll period
    pub poll_interval_ms: u64,

    pub trigger_capacity: usize,

    /// Bounded queue between pipeline and alert manager
    pub event_queue_capacity: usize,

    /// PIR pulse age that still counts as fused with vision
    pub pir_fusion_window_ms: u64,

    /// Emit PIR-only events when no frame is available
    pub pir_only_fallback: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            trigger_capacity: 8,
            event_queue_capacity: 16,
            pir_fusion_window_ms: 2000,
            pir_only_fallback: false,
        }
    }
}

/// Arm/disarm state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Arm on motion, disarm after inactivity
    pub auto_arm: bool,

    pub no_motion_timeout_secs: u64,

    /// Return from alarm to armed after this long without a person
    pub alarm_quiet_period_secs: Option<u64>,

    /// Background timer resolution
    pub tick_interval_ms: u64,

    pub start_armed: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            auto_arm: false,
            no_motion_timeout_secs: 120,
            alarm_quiet_period_secs: Some(300),
            tick_interval_ms: 1000,
            start_armed: false,
        }
    }
}

impl StateConfig {
    pub fn no_motion_timeout(&self) -> Duration {
        Duration::from_secs(self.no_motion_timeout_secs)
    }

    pub fn alarm_quiet_period(&self) -> Option<Duration> {
        self.alarm_quiet_period_secs.map(Duration::from_secs)
    }
}

/// Alert dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub cooldown: CooldownConfig,

    /// Attempts per notification including the first
    pub max_attempts: u32,

    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,

    /// Per-attempt send timeout
    pub send_timeout_ms: u64,

    /// Sound the buzzer for person+animal events as well as person-only ones
    pub high_triggers_alarm: bool,

    /// Alert records kept in memory
    pub recent_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown: CooldownConfig::default(),
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
            send_timeout_ms: 10_000,
            high_triggers_alarm: true,
            recent_capacity: 100,
        }
    }
}

/// Cooldown per priority class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub critical_secs: u64,
    pub high_secs: u64,
    pub low_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            critical_secs: 30,
            high_secs: 30,
            low_secs: 120,
        }
    }
}

/// Notification channel selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    Log,
    Telegram,
    Mqtt,
}

/// Notification channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub channel: NotifyChannel,

    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_url: String,

    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,

    /// Attach the snapshot to notifications
    pub attach_snapshot: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel: NotifyChannel::Log,
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_url: "https://api.telegram.org".to_string(),
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: "homeguard".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_topic_prefix: "homeguard".to_string(),
            attach_snapshot: true,
        }
    }
}

/// Alert log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Enable the SQLite alert log
    pub enabled: bool,

    /// Database path
    pub path: PathBuf,

    /// Retention period in days
    pub retention_days: u32,

    /// Rows kept at most
    pub max_records: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("./data/alerts.db"),
            retention_days: 7,
            max_records: 1000,
        }
    }
}

/// Alert snapshot storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Save the frame of every dispatched alert
    pub enabled: bool,

    /// Defaults to `data_dir/snapshots`
    pub dir: Option<PathBuf>,

    /// Files kept at most
    pub max_snapshots: usize,

    /// Files older than this are deleted
    pub retention_days: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_snapshots: 100,
            retention_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = Config::default();
        config.classification.min_confidence = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.classification.classify_every = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.camera.buffer_slots = 3;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.motion.min_area = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_telegram_requires_credentials() {
        let mut config = Config::default();
        config.notify.channel = NotifyChannel::Telegram;
        assert!(config.validate().is_err());

        config.notify.telegram_bot_token = Some("123456:ABC-DEF1234ghIkl".to_string());
        config.notify.telegram_chat_id = Some("not-a-number".to_string());
        assert!(config.validate().is_err());

        config.notify.telegram_chat_id = Some("-100123".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ALERT_COOLDOWN", "45"),
            ("MOTION_MIN_AREA", "800"),
            ("CAMERA_FPS", "10"),
            ("LOG_LEVEL", "DEBUG"),
            ("MAX_SNAPSHOTS", "25"),
            ("SNAPSHOT_RETENTION_DAYS", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.alerts.cooldown.critical_secs, 45);
        assert_eq!(config.alerts.cooldown.high_secs, 45);
        assert_eq!(config.alerts.cooldown.low_secs, 120);
        assert_eq!(config.motion.min_area, Some(800));
        assert_eq!(config.camera.fps, 10);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.snapshots.max_snapshots, 25);
        assert_eq!(config.snapshots.retention_days, 3);
    }

    #[test]
    fn test_snapshot_dir_follows_data_dir() {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/var/lib/homeguard");
        assert_eq!(config.snapshot_dir(), PathBuf::from("/var/lib/homeguard/snapshots"));

        config.snapshots.dir = Some(PathBuf::from("/mnt/frames"));
        assert_eq!(config.snapshot_dir(), PathBuf::from("/mnt/frames"));

        config.snapshots.max_snapshots = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = Config::default();
        config.log_level = "homeguard=loud".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| (key == "CAMERA_FPS").then(|| "fast".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_or_create_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.camera.fps, created.camera.fps);
        assert_eq!(loaded.notify.channel, NotifyChannel::Log);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[state]\nauto_arm = true\n").unwrap();
        assert!(config.state.auto_arm);
        assert_eq!(config.state.no_motion_timeout_secs, 120);
        assert_eq!(config.classification.classify_every, 3);
    }
}
