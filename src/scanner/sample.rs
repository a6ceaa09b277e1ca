use chrono::{DateTime, Utc};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::raster::AngularSetpoint;

/// One packet exchange. `raw_measurement` and `magnitude` are `None` when no
/// response arrived before the timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub sequence_index: usize,
    pub beam_index: usize,
    pub setpoint: AngularSetpoint,
    pub tx_payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub raw_measurement: Option<Vec<Complex32>>,
    pub magnitude: Option<f64>,
}

impl Sample {
    pub fn is_absent(&self) -> bool {
        self.raw_measurement.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    BeamRejected {
        beam_index: usize,
        setpoint: AngularSetpoint,
        error: String,
    },
    Stopped {
        beam_index: usize,
    },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::BeamRejected {
                beam_index,
                setpoint,
                error,
            } => write!(f, "beam {} ({}) rejected: {}", beam_index, setpoint, error),
            AbortReason::Stopped { beam_index } => write!(f, "stopped before beam {}", beam_index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Running { started_at: DateTime<Utc> },
    Completed,
    Aborted { reason: AbortReason },
}

impl ScanState {
    pub fn label(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Running { .. } => "running",
            ScanState::Completed => "completed",
            ScanState::Aborted { .. } => "aborted",
        }
    }
}

/// All samples of one raster pass, in raster order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: ScanState,
    pub samples: Vec<Sample>,
}

impl ScanSession {
    pub(crate) fn open(started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: generate_id(started_at),
            started_at,
            finished_at: None,
            state: ScanState::Running { started_at },
            samples: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub(crate) fn close(&mut self, state: ScanState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn received(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(|s| !s.is_absent())
    }

    pub fn absent_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_absent()).count()
    }

    pub fn beam_count(&self) -> usize {
        self.samples
            .last()
            .map(|s| s.beam_index + 1)
            .unwrap_or(0)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

fn generate_id(start: DateTime<Utc>) -> String {
    let uuid = uuid::Uuid::new_v4();
    let timestamp = start.format("%Y%m%dT%H%M%SZ");
    format!("{}_{}", timestamp, uuid)
}
