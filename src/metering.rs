//! Periodic input level sampling while recording.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::audio::{AudioBackend, InputLevels};
use crate::events::EventEmitter;

/// Floor reported for silence, matching the usual recorder meter range
pub const SILENCE_DB: f32 = -160.0;

/// Convert a linear amplitude (0.0..=1.0) to dBFS
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 || !amplitude.is_finite() {
        return SILENCE_DB;
    }
    (20.0 * amplitude.log10()).clamp(SILENCE_DB, 0.0)
}

/// One metering tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringSample {
    /// RMS level in dBFS
    pub current_db: f32,
    /// Peak level in dBFS
    pub peak_db: f32,
    pub timestamp: DateTime<Utc>,
}

impl MeteringSample {
    pub fn from_levels(levels: InputLevels) -> Self {
        Self {
            current_db: amplitude_to_db(levels.rms),
            peak_db: amplitude_to_db(levels.peak),
            timestamp: Utc::now(),
        }
    }
}

/// Last sample of the active session, readable by the host at any time
pub type LatestSample = Arc<Mutex<Option<MeteringSample>>>;

/// Timer task that reads levels from the hardware and hands them to the emitter
///
/// Only alive while the session is Recording; the session stops it on every
/// transition out of Recording.
pub struct MeteringSampler {
    task: JoinHandle<()>,
}

impl MeteringSampler {
    pub fn start(
        backend: Arc<dyn AudioBackend>,
        interval: Duration,
        emitter: EventEmitter,
        latest: LatestSample,
    ) -> Self {
        debug!("Metering sampler started ({}ms)", interval.as_millis());

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; report after a full interval
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match backend.read_levels() {
                    Ok(levels) => {
                        let sample = MeteringSample::from_levels(levels);
                        *latest.lock() = Some(sample.clone());
                        emitter.metering(sample);
                    }
                    Err(e) => {
                        warn!("Metering read failed, skipping tick: {}", e);
                    }
                }
            }
        });

        Self { task }
    }
}

impl Drop for MeteringSampler {
    fn drop(&mut self) {
        self.task.abort();
        debug!("Metering sampler stopped");
    }
}
