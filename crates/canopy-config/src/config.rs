//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Level-of-detail selection and child expiry.
    pub lod: LodConfig,
    /// Background tile loading.
    pub pager: PagerConfig,
    /// Shader variant generation.
    pub shader: ShaderConfig,
    /// Viewport used for pixel-size metrics.
    pub viewport: ViewportConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Level-of-detail configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LodConfig {
    /// Multiplier on the required range (higher = coarser levels sooner).
    pub lod_scale: f32,
    /// Seconds a paged child may stay untraversed before it can expire.
    pub expiry_delay_s: f64,
    /// Frames a paged child may stay untraversed before it can expire.
    pub expiry_frames: u64,
}

/// Tile pager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PagerConfig {
    /// Loader threads; 0 picks one less than the number of CPUs.
    pub worker_threads: usize,
    /// Loads allowed to run at once.
    pub max_in_flight: usize,
    /// Loads dispatched per frame.
    pub max_requests_per_frame: usize,
    /// Whether new load requests are accepted at startup.
    pub accept_requests: bool,
}

/// Shader compiler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShaderConfig {
    /// Written as `SHADER_NAME` into generated fragment shaders; empty disables it.
    pub fragment_shader_name: String,
    /// Compiled variants kept before the oldest is dropped.
    pub cache_capacity: usize,
}

/// Viewport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewportConfig {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Frames simulated by the demo.
    pub frames: u64,
}

// --- Default implementations ---

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            lod_scale: 1.0,
            expiry_delay_s: 10.0,
            expiry_frames: 60,
        }
    }
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_in_flight: 16,
            max_requests_per_frame: 4,
            accept_requests: true,
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            fragment_shader_name: String::new(),
            cache_capacity: 64,
        }
    }
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            frames: 240,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Platform config directory for this application, if the platform has one.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("canopy"))
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Encode)?;

        let path = config_dir.join(CONFIG_FILE);
        std::fs::write(&path, serialized).map_err(|source| ConfigError::Write { path, source })?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values the streamer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.lod.lod_scale.is_finite() && self.lod.lod_scale > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "lod.lod_scale",
                reason: format!("must be positive, got {}", self.lod.lod_scale),
            });
        }
        if self.lod.expiry_delay_s < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "lod.expiry_delay_s",
                reason: format!("must not be negative, got {}", self.lod.expiry_delay_s),
            });
        }
        if self.pager.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pager.max_in_flight",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "viewport",
                reason: format!("{}x{} has no area", self.viewport.width, self.viewport.height),
            });
        }
        Ok(())
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = ron::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}
