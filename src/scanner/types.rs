use std::time::Duration;

use serde::Deserialize;

use crate::raster::RasterConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default = "default_packets_per_beam")]
    pub packets_per_beam: usize,
    #[serde(
        default = "default_receive_timeout",
        deserialize_with = "crate::config::deserialize_duration"
    )]
    pub receive_timeout: Duration,
    /// Wait between sending the marker and listening for its CSI.
    #[serde(
        default = "default_settle",
        deserialize_with = "crate::config::deserialize_duration"
    )]
    pub settle: Duration,
    /// Gap between packet attempts.
    #[serde(
        default = "default_pacing",
        deserialize_with = "crate::config::deserialize_duration"
    )]
    pub pacing: Duration,
    #[serde(default = "default_marker")]
    pub marker: String,
    /// How often a running pass logs its progress. Zero disables it.
    #[serde(
        default = "default_progress_interval",
        deserialize_with = "crate::config::deserialize_duration"
    )]
    pub progress_interval: Duration,
}

fn default_packets_per_beam() -> usize {
    2
}

fn default_receive_timeout() -> Duration {
    Duration::from_millis(7)
}

fn default_settle() -> Duration {
    Duration::from_millis(1)
}

fn default_pacing() -> Duration {
    Duration::from_millis(10)
}

fn default_marker() -> String {
    "HELLO BEAMSCAN".to_string()
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            packets_per_beam: default_packets_per_beam(),
            receive_timeout: default_receive_timeout(),
            settle: default_settle(),
            pacing: default_pacing(),
            marker: default_marker(),
            progress_interval: default_progress_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Scan {
        #[serde(default)]
        packets_per_beam: Option<usize>,
        #[serde(default)]
        raster: Option<RasterConfig>,
    },
    Park,
}
