use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::device::Beamformer;
use super::error::BeamformerError;
use super::types::{BridgeConfig, CommandStatus, DeviceLimits};
use crate::raster::AngularSetpoint;

const RET_OK: &str = "ok";

// One JSON object per line in each direction, one response per request.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    GetDynamicRange {
        serial: &'a str,
    },
    GetBoardCount {
        serial: &'a str,
    },
    GetCalibrationVersion {
        serial: &'a str,
    },
    GetBeamAngle {
        serial: &'a str,
    },
    SetBeamAngle {
        serial: &'a str,
        gain_db: f64,
        theta_deg: f64,
        phi_deg: f64,
    },
}

#[derive(Debug, Deserialize)]
struct Response {
    ret_code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

impl Response {
    fn into_data<T: serde::de::DeserializeOwned>(
        self,
        query: &'static str,
    ) -> Result<T, BeamformerError> {
        if self.ret_code != RET_OK {
            return Err(BeamformerError::Query {
                query,
                code: self.ret_code,
                message: self.message.unwrap_or_default(),
            });
        }
        Ok(serde_json::from_value(self.data)?)
    }
}

/// Client for the vendor bridge service that fronts a BBox-style beamformer.
pub struct BridgeBeamformer {
    serial: String,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl BridgeBeamformer {
    pub fn connect(config: &BridgeConfig) -> Result<Self, BeamformerError> {
        let addr = config
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("cannot resolve {}", config.address),
                )
            })?;
        let stream = TcpStream::connect_timeout(&addr, config.timeout)?;
        stream.set_read_timeout(Some(config.timeout))?;
        stream.set_write_timeout(Some(config.timeout))?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            serial: config.serial.clone(),
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn call(&mut self, request: &Request<'_>) -> Result<Response, BeamformerError> {
        let mut line = serde_json::to_string(request)?;
        debug!("bridge -> {}", line);
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            return Err(BeamformerError::BridgeClosed);
        }
        debug!("bridge <- {}", reply.trim_end());
        Ok(serde_json::from_str(reply.trim())?)
    }
}

impl Beamformer for BridgeBeamformer {
    fn name(&self) -> &str {
        &self.serial
    }

    fn query_limits(&mut self) -> Result<DeviceLimits, BeamformerError> {
        let serial = self.serial.clone();
        let (gain_min_db, gain_max_db): (f64, f64) = self
            .call(&Request::GetDynamicRange { serial: &serial })?
            .into_data("dynamic_range")?;
        let board_count: u32 = self
            .call(&Request::GetBoardCount { serial: &serial })?
            .into_data("board_count")?;
        let calibration_version: Option<String> = self
            .call(&Request::GetCalibrationVersion { serial: &serial })?
            .into_data("calibration_version")?;
        Ok(DeviceLimits {
            gain_min_db,
            gain_max_db,
            board_count,
            calibration_version,
        })
    }

    fn apply(&mut self, gain_db: f64, theta_deg: f64, phi_deg: f64) -> CommandStatus {
        let serial = self.serial.clone();
        let request = Request::SetBeamAngle {
            serial: &serial,
            gain_db,
            theta_deg,
            phi_deg,
        };
        match self.call(&request) {
            Ok(response) if response.ret_code == RET_OK => CommandStatus::Ok,
            Ok(response) => CommandStatus::Error {
                code: response.ret_code,
                message: response.message,
            },
            Err(e) => {
                warn!("Beam command to {} failed: {}", self.serial, e);
                CommandStatus::Error {
                    code: "transport".to_string(),
                    message: Some(e.to_string()),
                }
            }
        }
    }

    fn query_state(&mut self) -> Result<Option<AngularSetpoint>, BeamformerError> {
        let serial = self.serial.clone();
        let beam: Option<(f64, f64, f64)> = self
            .call(&Request::GetBeamAngle { serial: &serial })?
            .into_data("beam_angle")?;
        Ok(beam.map(|(gain, theta, phi)| AngularSetpoint::new(theta, phi).with_gain(Some(gain))))
    }
}
