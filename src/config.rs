use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::beamformer::BeamformerConfig;
use crate::interpolate::InterpolationConfig;
use crate::raster::{Raster, RasterConfig};
use crate::scanner::AcquisitionConfig;
use crate::transport::TransportConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub beamformer: BeamformerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub raster: RasterConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub interpolation: InterpolationConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub base_folder: PathBuf,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acquisition.packets_per_beam == 0 {
            return Err(invalid("acquisition.packets_per_beam", "must be at least 1"));
        }
        if !(self.raster.theta_step > 0.0) {
            return Err(invalid(
                "raster.theta_step",
                format!("{} is not positive", self.raster.theta_step),
            ));
        }
        if !(self.raster.phi_step > 0.0) {
            return Err(invalid(
                "raster.phi_step",
                format!("{} is not positive", self.raster.phi_step),
            ));
        }
        if let Err(e) = Raster::new(&self.raster) {
            return Err(invalid("raster", e.to_string()));
        }
        let interpolation = &self.interpolation;
        if interpolation.resolution == 0 {
            return Err(invalid("interpolation.resolution", "must be at least 1"));
        }
        if !(interpolation.extent > 0.0) {
            return Err(invalid("interpolation.extent", "must be positive"));
        }
        if !interpolation.kernel.is_valid() {
            return Err(invalid(
                "interpolation.kernel",
                "hyperparameters must be finite and positive",
            ));
        }
        let range = &interpolation.render_range;
        if !(range.min < range.max) {
            return Err(invalid(
                "interpolation.render_range",
                format!("[{}, {}] is inverted", range.min, range.max),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Reads a humantime string such as `7ms` or `2s`.
pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beamformer::BeamformerConfig;

    const MINIMAL: &str = r#"
beamformer:
  kind: simulated
storage:
  base_folder: /tmp/beamscan
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert!(matches!(config.beamformer, BeamformerConfig::Simulated(_)));
        assert_eq!(config.transport.tx_port, 64001);
        assert_eq!(config.transport.rx_port, 64000);
        assert_eq!(config.raster.theta_range, [1.0, 45.0]);
        assert_eq!(config.raster.phi_step, 20.0);
        assert_eq!(config.acquisition.packets_per_beam, 2);
        assert_eq!(config.acquisition.receive_timeout, Duration::from_millis(7));
        assert_eq!(config.interpolation.resolution, 180);
        assert_eq!(config.interpolation.seed, 42);
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
beamformer:
  kind: bridge
  address: 10.0.0.2:5000
  serial: D2123E001
  timeout: 500ms
transport:
  address: 192.168.1.20
  tx_port: 7001
  rx_port: 7000
raster:
  theta_range: [0, 10]
  phi_range: [0, 40]
  theta_step: 5
  phi_step: 20
  gain_db: 3.0
acquisition:
  packets_per_beam: 10
  receive_timeout: 20ms
  settle: 0s
  pacing: 5ms
interpolation:
  resolution: 64
  restarts: 4
  render_range: { min: 0.0, max: 0.2 }
storage:
  base_folder: ./data
"#;
        let config = Config::from_str(yaml).unwrap();
        match &config.beamformer {
            BeamformerConfig::Bridge(bridge) => {
                assert_eq!(bridge.serial, "D2123E001");
                assert_eq!(bridge.timeout, Duration::from_millis(500));
            }
            other => panic!("unexpected beamformer {:?}", other),
        }
        assert_eq!(config.raster.gain_db, Some(3.0));
        assert_eq!(config.acquisition.settle, Duration::ZERO);
        assert_eq!(config.interpolation.render_range.max, 0.2);
        assert_eq!(config.storage.base_folder, PathBuf::from("./data"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            ("acquisition:\n  packets_per_beam: 0\n", "acquisition.packets_per_beam"),
            ("raster:\n  theta_step: 0\n", "raster.theta_step"),
            ("raster:\n  theta_step: 1.0e-9\n  phi_step: 1.0e-9\n", "raster"),
            ("interpolation:\n  resolution: 0\n", "interpolation.resolution"),
            (
                "interpolation:\n  render_range: { min: 1.0, max: 0.5 }\n",
                "interpolation.render_range",
            ),
        ];
        for (extra, expected) in cases {
            let yaml = format!("{}{}", MINIMAL, extra);
            match Config::from_str(&yaml) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("{}: unexpected {:?}", expected, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn bad_duration_is_a_parse_error() {
        let yaml = format!("{}acquisition:\n  receive_timeout: soon\n", MINIMAL);
        assert!(matches!(Config::from_str(&yaml), Err(ConfigError::Yaml(_))));
    }
}
