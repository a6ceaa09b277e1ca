use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::sample::{AbortReason, Sample, ScanSession, ScanState};
use super::types::AcquisitionConfig;
use crate::beamformer::{Beamformer, BeamformerAdapter};
use crate::raster::{AngularSetpoint, Raster};
use crate::transport::{decode_csi, mean_magnitude, Transport};

#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub state: ScanState,
    pub beams_applied: usize,
    pub samples_recorded: usize,
    pub absent_samples: usize,
    pub last_sample: Option<Sample>,
}

#[derive(Debug)]
struct Shared {
    status: ScanStatus,
}

/// Read-only view of a scanner's progress, usable while a pass is running.
#[derive(Clone)]
pub struct StatusHandle {
    shared: Arc<Mutex<Shared>>,
}

impl StatusHandle {
    pub fn get(&self) -> ScanStatus {
        lock(&self.shared).status.clone()
    }

    /// Logs the pass progress every `interval` until `done` is cancelled.
    pub async fn report(self, total_beams: usize, interval: Duration, done: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = ticker.tick() => {
                    let status = self.get();
                    info!(
                        "Beamscan progress: beam {} of {}, {} samples ({} without response)",
                        status.beams_applied,
                        total_beams,
                        status.samples_recorded,
                        status.absent_samples
                    );
                }
            }
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs raster passes: one beam command, then `packets_per_beam` exchanges,
/// strictly in that order.
pub struct Scanner<B: Beamformer, T: Transport> {
    adapter: BeamformerAdapter<B>,
    transport: T,
    config: AcquisitionConfig,
    shared: Arc<Mutex<Shared>>,
}

impl<B: Beamformer, T: Transport> Scanner<B, T> {
    pub fn new(adapter: BeamformerAdapter<B>, transport: T, config: AcquisitionConfig) -> Self {
        Self {
            adapter,
            transport,
            config,
            shared: Arc::new(Mutex::new(Shared {
                status: ScanStatus {
                    state: ScanState::Idle,
                    beams_applied: 0,
                    samples_recorded: 0,
                    absent_samples: 0,
                    last_sample: None,
                },
            })),
        }
    }

    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AcquisitionConfig {
        &mut self.config
    }

    /// Returns the beam to boresight and reads it back from the device.
    pub fn park(&mut self) -> bool {
        if !self.adapter.boresight() {
            return false;
        }
        match self.adapter.verify() {
            Ok(agrees) => agrees,
            Err(e) => {
                warn!("Could not read back the parked beam: {}", e);
                true
            }
        }
    }

    /// Drives one raster pass to completion, abort or cancellation.
    ///
    /// `cancel` is only looked at between beams. The returned session is
    /// always closed, and holds every sample taken before the pass ended.
    pub async fn run(&mut self, raster: Raster, cancel: &CancellationToken) -> ScanSession {
        let started = Instant::now();
        let mut session = ScanSession::open(Utc::now());
        let beams = raster.len();
        let packets = self.config.packets_per_beam;
        info!(
            "Starting beamscan {}: {} beams x {} packets",
            session.session_id, beams, packets
        );
        {
            let mut locked = lock(&self.shared);
            locked.status = ScanStatus {
                state: session.state.clone(),
                beams_applied: 0,
                samples_recorded: 0,
                absent_samples: 0,
                last_sample: None,
            };
        }
        let done = CancellationToken::new();
        if !self.config.progress_interval.is_zero() {
            tokio::spawn(self.status_handle().report(
                beams,
                self.config.progress_interval,
                done.clone(),
            ));
        }
        let _reporting = done.drop_guard();

        let mut outcome = ScanState::Completed;
        let mut sequence_index = 0;
        for (beam_index, setpoint) in raster.enumerate() {
            if cancel.is_cancelled() {
                info!("Beamscan stopped before beam {}", beam_index);
                outcome = ScanState::Aborted {
                    reason: AbortReason::Stopped { beam_index },
                };
                break;
            }

            debug!("beam {} of {}: {}", beam_index + 1, beams, setpoint);
            let applied = match self.adapter.try_apply(&setpoint) {
                Ok(applied) => applied,
                Err(e) => {
                    error!("Aborting beamscan at beam {}: {}", beam_index, e);
                    outcome = ScanState::Aborted {
                        reason: AbortReason::BeamRejected {
                            beam_index,
                            setpoint,
                            error: e.to_string(),
                        },
                    };
                    break;
                }
            };
            lock(&self.shared).status.beams_applied += 1;

            for _ in 0..packets {
                let sample = self.exchange(sequence_index, beam_index, applied).await;
                sequence_index += 1;
                {
                    let mut locked = lock(&self.shared);
                    locked.status.samples_recorded += 1;
                    if sample.is_absent() {
                        locked.status.absent_samples += 1;
                    }
                    locked.status.last_sample = Some(sample.clone());
                }
                session.push(sample);
                pause(self.config.pacing).await;
            }
        }

        session.close(outcome);
        lock(&self.shared).status.state = session.state.clone();
        info!(
            "Beamscan {} {} in {:.3}s: {} samples, {} without response",
            session.session_id,
            session.state.label(),
            started.elapsed().as_secs_f64(),
            session.samples.len(),
            session.absent_count()
        );
        session
    }

    async fn exchange(
        &mut self,
        sequence_index: usize,
        beam_index: usize,
        setpoint: AngularSetpoint,
    ) -> Sample {
        let tx_payload = self.config.marker.as_bytes().to_vec();
        self.transport.send(&tx_payload).await;
        let timestamp = Utc::now();
        pause(self.config.settle).await;

        let raw_measurement = self
            .transport
            .receive(self.config.receive_timeout)
            .await
            .and_then(|frame| decode_csi(&frame));
        let magnitude = raw_measurement.as_deref().and_then(mean_magnitude);
        match magnitude {
            Some(m) => debug!("packet {}: CSI magnitude {}", sequence_index, m),
            None => debug!("packet {}: no CSI received", sequence_index),
        }

        Sample {
            sequence_index,
            beam_index,
            setpoint,
            tx_payload,
            timestamp,
            raw_measurement,
            magnitude,
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beamformer::{BeamformerError, CommandStatus, DeviceLimits};
    use crate::raster::RasterConfig;
    use crate::transport::encode_csi;
    use async_trait::async_trait;
    use num_complex::Complex32;
    use std::collections::VecDeque;

    struct CountingBeamformer {
        applies: Arc<Mutex<Vec<(f64, f64)>>>,
        reject_at: Option<usize>,
    }

    impl Beamformer for CountingBeamformer {
        fn name(&self) -> &str {
            "counting"
        }

        fn query_limits(&mut self) -> Result<DeviceLimits, BeamformerError> {
            Ok(DeviceLimits {
                gain_min_db: 0.0,
                gain_max_db: 10.0,
                board_count: 1,
                calibration_version: None,
            })
        }

        fn apply(&mut self, _gain: f64, theta: f64, phi: f64) -> CommandStatus {
            let mut applies = self.applies.lock().unwrap();
            applies.push((theta, phi));
            if Some(applies.len() - 1) == self.reject_at {
                CommandStatus::Error {
                    code: "ERROR".to_string(),
                    message: Some("fault".to_string()),
                }
            } else {
                CommandStatus::Ok
            }
        }

        fn query_state(&mut self) -> Result<Option<AngularSetpoint>, BeamformerError> {
            Ok(None)
        }
    }

    // Plays back one scripted reply per receive; records what was sent and
    // which beam was active (per the shared apply log) at each exchange.
    struct ScriptedTransport {
        replies: VecDeque<Option<Vec<u8>>>,
        sent: Vec<Vec<u8>>,
        applies: Arc<Mutex<Vec<(f64, f64)>>>,
        active_beam_at_send: Vec<Option<(f64, f64)>>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, payload: &[u8]) {
            self.sent.push(payload.to_vec());
            let active = self.applies.lock().unwrap().last().copied();
            self.active_beam_at_send.push(active);
            if let Some((n, token)) = &self.cancel_after {
                if self.sent.len() == *n {
                    token.cancel();
                }
            }
        }

        async fn receive(&mut self, _timeout: Duration) -> Option<Vec<u8>> {
            self.replies.pop_front().flatten()
        }
    }

    fn frame(value: f32) -> Option<Vec<u8>> {
        Some(encode_csi(&[Complex32::new(value, 0.0), Complex32::new(value, 0.0)]))
    }

    fn quick_config(packets_per_beam: usize) -> AcquisitionConfig {
        AcquisitionConfig {
            packets_per_beam,
            receive_timeout: Duration::from_millis(7),
            settle: Duration::ZERO,
            pacing: Duration::ZERO,
            marker: "HELLO BEAMSCAN".to_string(),
            progress_interval: Duration::ZERO,
        }
    }

    // Boresight plus 2 x 2 stepped beams.
    fn five_beams() -> Raster {
        Raster::new(&RasterConfig {
            theta_range: [5.0, 15.0],
            phi_range: [0.0, 40.0],
            theta_step: 5.0,
            phi_step: 20.0,
            gain_db: None,
        })
        .unwrap()
    }

    fn scanner(
        replies: Vec<Option<Vec<u8>>>,
        reject_at: Option<usize>,
        packets: usize,
    ) -> (Scanner<CountingBeamformer, ScriptedTransport>, Arc<Mutex<Vec<(f64, f64)>>>) {
        let applies = Arc::new(Mutex::new(Vec::new()));
        let adapter = BeamformerAdapter::setup(CountingBeamformer {
            applies: applies.clone(),
            reject_at,
        })
        .unwrap();
        let transport = ScriptedTransport {
            replies: replies.into(),
            sent: Vec::new(),
            applies: applies.clone(),
            active_beam_at_send: Vec::new(),
            cancel_after: None,
        };
        (Scanner::new(adapter, transport, quick_config(packets)), applies)
    }

    #[tokio::test]
    async fn lost_packets_are_recorded_as_absent() {
        let mut replies: Vec<Option<Vec<u8>>> = (0..50).map(|i| frame(i as f32 * 0.01)).collect();
        replies[7] = None;
        replies[31] = None;
        let (mut scanner, applies) = scanner(replies, None, 10);

        let session = scanner.run(five_beams(), &CancellationToken::new()).await;

        assert_eq!(session.state, ScanState::Completed);
        assert!(session.is_closed());
        assert_eq!(session.samples.len(), 50);
        assert_eq!(session.absent_count(), 2);
        assert!(session.samples[7].is_absent() && session.samples[7].magnitude.is_none());
        assert!(session.samples[31].is_absent());
        assert_eq!(applies.lock().unwrap().len(), 5);
        assert_eq!(session.beam_count(), 5);

        let indices: Vec<usize> = session.samples.iter().map(|s| s.sequence_index).collect();
        assert_eq!(indices, (0..50).collect::<Vec<_>>());
        let status = scanner.status_handle().get();
        assert_eq!(status.samples_recorded, 50);
        assert_eq!(status.absent_samples, 2);
        assert_eq!(status.beams_applied, 5);
    }

    #[tokio::test]
    async fn samples_carry_the_beam_active_during_the_exchange() {
        let replies = (0..10).map(|_| frame(0.05)).collect();
        let (mut scanner, _applies) = scanner(replies, None, 2);

        let session = scanner.run(five_beams(), &CancellationToken::new()).await;

        let expected = [(0.0, 0.0), (5.0, 0.0), (5.0, 20.0), (10.0, 0.0), (10.0, 20.0)];
        for sample in &session.samples {
            let (theta, phi) = expected[sample.beam_index];
            assert_eq!(sample.setpoint.theta_deg, theta);
            assert_eq!(sample.setpoint.phi_deg, phi);
            assert_eq!(sample.setpoint.gain_db, Some(10.0));
            assert_eq!(
                scanner.transport.active_beam_at_send[sample.sequence_index],
                Some((theta, phi))
            );
            assert_eq!(sample.tx_payload, b"HELLO BEAMSCAN");
            assert!((sample.magnitude.unwrap() - 0.05).abs() < 1e-6);
        }
        assert_eq!(scanner.transport.sent.len(), 10);
    }

    #[tokio::test]
    async fn beam_rejection_aborts_with_partial_session() {
        let replies = (0..10).map(|_| frame(0.02)).collect();
        let (mut scanner, applies) = scanner(replies, Some(2), 2);

        let session = scanner.run(five_beams(), &CancellationToken::new()).await;

        assert_eq!(applies.lock().unwrap().len(), 3);
        assert_eq!(session.samples.len(), 4);
        match &session.state {
            ScanState::Aborted {
                reason: AbortReason::BeamRejected { beam_index, .. },
            } => assert_eq!(*beam_index, 2),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(session.is_closed());
        assert_eq!(scanner.status_handle().get().state, session.state);
    }

    #[tokio::test]
    async fn cancellation_is_honoured_between_beams() {
        let replies = (0..10).map(|_| frame(0.02)).collect();
        let (mut scanner, applies) = scanner(replies, None, 2);
        let token = CancellationToken::new();
        // Cancel in the middle of beam 1; its second packet still goes out.
        scanner.transport.cancel_after = Some((3, token.clone()));

        let session = scanner.run(five_beams(), &token).await;

        assert_eq!(applies.lock().unwrap().len(), 2);
        assert_eq!(session.samples.len(), 4);
        assert_eq!(
            session.state,
            ScanState::Aborted {
                reason: AbortReason::Stopped { beam_index: 2 }
            }
        );
    }

    #[tokio::test]
    async fn malformed_frames_count_as_absent() {
        let replies = vec![Some(vec![1, 2, 3]), Some(Vec::new()), frame(0.1), frame(0.1)];
        let (mut scanner, _) = scanner(replies, None, 2);
        let raster = Raster::new(&RasterConfig {
            theta_range: [5.0, 10.0],
            phi_range: [0.0, 20.0],
            theta_step: 5.0,
            phi_step: 20.0,
            gain_db: None,
        })
        .unwrap();

        let session = scanner.run(raster, &CancellationToken::new()).await;

        assert_eq!(session.samples.len(), 4);
        assert_eq!(session.absent_count(), 2);
        assert_eq!(session.received().count(), 2);
    }

    #[tokio::test]
    async fn status_is_readable_while_a_pass_runs() {
        let replies = (0..10).map(|_| frame(0.02)).collect();
        let (mut scanner, _) = scanner(replies, None, 2);
        scanner.config_mut().pacing = Duration::from_millis(5);
        scanner.config_mut().progress_interval = Duration::from_millis(3);
        let handle = scanner.status_handle();
        let cancel = CancellationToken::new();

        let watch = async {
            let mut seen = Vec::new();
            loop {
                let status = handle.get();
                match status.state {
                    ScanState::Running { .. } => seen.push(status.samples_recorded),
                    ScanState::Idle => {}
                    _ => break,
                }
                sleep(Duration::from_millis(1)).await;
            }
            seen
        };
        let (session, seen) = tokio::join!(scanner.run(five_beams(), &cancel), watch);

        assert_eq!(session.state, ScanState::Completed);
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen[0] < 10);
        assert_eq!(handle.get().samples_recorded, 10);
        assert_eq!(handle.get().state, ScanState::Completed);
    }

    #[tokio::test]
    async fn park_returns_to_boresight() {
        let (mut scanner, applies) = scanner(Vec::new(), None, 1);
        assert!(scanner.park());
        assert_eq!(applies.lock().unwrap().as_slice(), &[(0.0, 0.0)]);
    }
}
