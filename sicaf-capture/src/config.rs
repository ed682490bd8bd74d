use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub settings: AppSettings,
    #[serde(default)]
    pub session: SessionTimings,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub device: i32,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_facing_mode")]
    pub facing_mode: String,
}

/// Operator-tunable recognition options.
///
/// Keys keep the camelCase names used by the SICAF web settings panel so an
/// exported settings object can be pasted into the kiosk config unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default = "default_true")]
    pub require_smile: bool,
    #[serde(default = "default_smile_threshold")]
    pub smile_threshold: f32,
    /// Forwarded to the matching API as `threshold`; not enforced locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_detection_threshold: Option<f32>,
    /// Forwarded to the matching API as `min_margin`; not enforced locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_detection_margin: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimings {
    #[serde(default = "default_detection_interval_ms")]
    pub detection_interval_ms: u64,
    #[serde(default = "default_success_reset_ms")]
    pub success_reset_ms: u64,
    #[serde(default = "default_failure_reset_ms")]
    pub failure_reset_ms: u64,
    #[serde(default = "default_capture_timeout_secs")]
    pub capture_timeout_secs: u64,
}

fn default_base_url() -> String { "http://localhost:8000".to_string() }
fn default_timeout_secs() -> f64 { 10.0 }
fn default_frame_width() -> u32 { 640 }
fn default_frame_height() -> u32 { 480 }
fn default_facing_mode() -> String { "user".to_string() }
fn default_true() -> bool { true }
fn default_smile_threshold() -> f32 { 0.7 }
fn default_detection_interval_ms() -> u64 { 200 }
fn default_success_reset_ms() -> u64 { 3000 }
fn default_failure_reset_ms() -> u64 { 2000 }
fn default_capture_timeout_secs() -> u64 { 30 }
fn default_models_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("sicaf").join("models"))
        .unwrap_or_else(|| PathBuf::from("./models"))
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            camera: CameraConfig::default(),
            settings: AppSettings::default(),
            session: SessionTimings::default(),
            models_dir: default_models_dir(),
            version: 1,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            facing_mode: default_facing_mode(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            require_smile: default_true(),
            smile_threshold: default_smile_threshold(),
            face_detection_threshold: None,
            face_detection_margin: None,
        }
    }
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            detection_interval_ms: default_detection_interval_ms(),
            success_reset_ms: default_success_reset_ms(),
            failure_reset_ms: default_failure_reset_ms(),
            capture_timeout_secs: default_capture_timeout_secs(),
        }
    }
}

impl ApiConfig {
    /// Out-of-range values fall back to the default; `validate` rejects them first.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs)
            .ok()
            .filter(|t| !t.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_timeout_secs()))
    }

    /// Joins an endpoint path onto the base URL without doubling slashes.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl SessionTimings {
    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn success_reset(&self) -> Duration {
        Duration::from_millis(self.success_reset_ms)
    }

    pub fn failure_reset(&self) -> Duration {
        Duration::from_millis(self.failure_reset_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}

impl KioskConfig {
    /// Reads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: KioskConfig = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// First readable config among the user and system locations, else defaults.
    pub fn load_default() -> Self {
        for path in default_config_paths() {
            match Self::load(&path) {
                Ok(config) if path.exists() => {
                    log::info!("Loaded configuration from {:?}", path);
                    return config;
                }
                Ok(_) => continue,
                Err(e) => log::warn!("Ignoring invalid configuration {:?}: {}", path, e),
            }
        }
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::Config("api.base_url must not be empty".into()));
        }
        if self.camera.frame_width == 0 || self.camera.frame_height == 0 {
            return Err(Error::Config("camera frame size must be non-zero".into()));
        }
        if self.session.detection_interval_ms == 0 {
            return Err(Error::Config("session.detection_interval_ms must be non-zero".into()));
        }
        if !self.api.timeout_secs.is_finite()
            || self.api.timeout_secs <= 0.0
            || self.api.timeout_secs > MAX_TIMEOUT_SECS
        {
            return Err(Error::Config(format!(
                "api.timeout_secs must be within 0..{}",
                MAX_TIMEOUT_SECS
            )));
        }
        if !(0.0..=1.0).contains(&self.settings.smile_threshold) {
            return Err(Error::Config("settings.smileThreshold must be within 0..1".into()));
        }
        for (name, value) in [
            ("faceDetectionThreshold", self.settings.face_detection_threshold),
            ("faceDetectionMargin", self.settings.face_detection_margin),
        ] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(Error::Config(format!("settings.{} must be within 0..1", name)));
                }
            }
        }
        Ok(())
    }
}

const MAX_TIMEOUT_SECS: f64 = 600.0;

pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("sicaf").join("config.json"));
    }
    paths.push(PathBuf::from("/etc/sicaf/config.json"));
    paths
}
