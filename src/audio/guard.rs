//! Exclusive ownership of the audio input hardware.
//!
//! The OS audio session is process-wide, so it is modeled as one
//! `AudioSessionArbiter` shared by every recorder in the process. A session
//! holds a `SessionClaim` from the arbiter for its whole lifetime and an
//! `AudioSessionGuard` around the open hardware stream.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioFrame, Interruption, StreamRequest};
use crate::error::RecorderError;

/// Single arbiter for the process-wide audio session
#[derive(Debug, Default)]
pub struct AudioSessionArbiter {
    held: AtomicBool,
}

impl AudioSessionArbiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the audio session, failing fast if another session holds it
    pub fn try_claim(self: &Arc<Self>) -> Option<SessionClaim> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SessionClaim {
                arbiter: Arc::clone(self),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof that this session owns the audio session. Released on drop.
#[derive(Debug)]
pub struct SessionClaim {
    arbiter: Arc<AudioSessionArbiter>,
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.arbiter.held.store(false, Ordering::Release);
        debug!("Audio session claim released");
    }
}

/// Scoped acquisition of the input hardware
///
/// Dropping the guard closes the hardware stream and returns the claim to
/// the arbiter, so every exit path releases the device.
pub struct AudioSessionGuard {
    backend: Arc<dyn AudioBackend>,
    request: StreamRequest,
    claim: Option<SessionClaim>,
    released: bool,
}

impl AudioSessionGuard {
    /// Open the hardware stream under `claim`
    pub async fn acquire(
        backend: Arc<dyn AudioBackend>,
        claim: SessionClaim,
        request: StreamRequest,
    ) -> Result<(Self, mpsc::Receiver<AudioFrame>), RecorderError> {
        info!(
            "Acquiring audio input from {} ({}Hz, {} channels, {:?})",
            backend.name(),
            request.sample_rate,
            request.channels,
            request.category
        );

        // Build the guard first so a cancelled or failed open still closes the backend
        let mut guard = Self {
            backend,
            request,
            claim: Some(claim),
            released: true,
        };
        let frames = guard.open().await?;

        Ok((guard, frames))
    }

    /// Re-open the hardware after a forced release
    ///
    /// The returned future owns everything it needs, so the caller can run
    /// it as its own task and abort it. Until it resolves the guard counts
    /// as held; `release` closes whatever the open left behind.
    pub fn reacquire(
        &mut self,
    ) -> Result<
        impl Future<Output = Result<mpsc::Receiver<AudioFrame>, RecorderError>> + Send + 'static,
        RecorderError,
    > {
        if !self.released {
            return Err(RecorderError::Unknown(
                "audio input is still held".to_string(),
            ));
        }
        info!("Re-acquiring audio input from {}", self.backend.name());

        self.released = false;
        let backend = Arc::clone(&self.backend);
        let request = self.request;
        Ok(async move { backend.open(request).await })
    }

    async fn open(&mut self) -> Result<mpsc::Receiver<AudioFrame>, RecorderError> {
        self.released = false;
        match self.backend.open(self.request).await {
            Ok(frames) => Ok(frames),
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    /// Close the hardware stream. Subsequent calls are no-ops.
    ///
    /// The session claim stays held until the guard is dropped.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.backend.close();
        info!("Audio input released ({})", self.backend.name());
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn subscribe_interruptions(&self) -> broadcast::Receiver<Interruption> {
        self.backend.subscribe_interruptions()
    }

    pub fn request(&self) -> StreamRequest {
        self.request
    }
}

impl Drop for AudioSessionGuard {
    fn drop(&mut self) {
        self.release();
        self.claim.take();
    }
}
