//! Configuration for the camstream client.

use std::path::Path;

use serde::{Deserialize, Serialize};

use camstream_core::stream::SessionConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay connection.
    pub network: NetworkConfig,
    /// Role ids on the relay.
    pub identity: IdentityConfig,
    /// Test-pattern camera.
    pub camera: CameraConfig,
    /// JPEG settings.
    pub encoder: EncoderConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Relay base URL; the client id is appended as the path.
    pub server_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Id this client registers and sends as.
    pub client_id: String,
    /// Id frames are addressed to.
    pub analyzer_id: String,
}

/// Camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    /// Frames offered per second.
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// JPEG quality, 1-100.
    pub quality: u8,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_url: SessionConfig::default().server_url,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            client_id: session.client_id,
            analyzer_id: session.analyzer_id,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: camstream_core::stream::DEFAULT_QUALITY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert into the core session configuration.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            server_url: self.network.server_url.trim().to_string(),
            client_id: self.identity.client_id.trim().to_string(),
            analyzer_id: self.identity.analyzer_id.trim().to_string(),
            jpeg_quality: self.encoder.quality.clamp(1, 100),
        }
    }

    /// Camera settings with resolution and rate clamped to sane bounds.
    pub fn camera_dimensions(&self) -> (u32, u32, u32) {
        (
            self.camera.width.clamp(2, 4096),
            self.camera.height.clamp(2, 4096),
            self.camera.fps.clamp(1, 60),
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
