use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to an optional TOML configuration file
    #[arg(short, long, env = "IRRIGATION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Irrigation volume model artifact
    #[arg(short, long, env = "IRRIGATION_MODEL")]
    pub model: Option<PathBuf>,

    /// Sensor irrigation class model artifact; enables /predict/sensor
    #[arg(long, env = "IRRIGATION_SENSOR_MODEL")]
    pub sensor_model: Option<PathBuf>,

    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub json_limit_bytes: usize,
    pub max_batch_size: usize,
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: num_cpus::get(),
            json_limit_bytes: 256 * 1024,
            max_batch_size: 64,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub path: PathBuf,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/tamil_nadu_irrigation_model.json"),
        }
    }
}

/// Sensor endpoint settings. The location and forecast values are used
/// whenever a request does not carry its own.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SensorSettings {
    pub model_path: Option<PathBuf>,
    pub district: String,
    pub zone: String,
    pub season: String,
    pub rainfall_next_hour_mm: f32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            district: "Coimbatore".to_string(),
            zone: "Western Zone".to_string(),
            season: "southwest_monsoon".to_string(),
            rainfall_next_hour_mm: 0.5,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub sensor: SensorSettings,
}

impl Settings {
    /// Reads the optional config file, then applies command line and
    /// environment overrides.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut settings = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(model) = &args.model {
            settings.model.path = model.clone();
        }
        if let Some(sensor_model) = &args.sensor_model {
            settings.sensor.model_path = Some(sensor_model.clone());
        }
        if let Some(host) = &args.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = args.port {
            settings.server.port = port;
        }
        if let Some(workers) = args.workers {
            settings.server.workers = workers;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.server.port == 0 {
            return invalid("server.port must be non-zero");
        }
        if self.server.workers == 0 {
            return invalid("server.workers must be at least 1");
        }
        if self.server.max_batch_size == 0 {
            return invalid("server.max_batch_size must be at least 1");
        }
        if self.server.json_limit_bytes == 0 {
            return invalid("server.json_limit_bytes must be at least 1");
        }
        if !(0.0..=500.0).contains(&self.sensor.rainfall_next_hour_mm) {
            return invalid("sensor.rainfall_next_hour_mm must be within [0, 500]");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
