// Integration tests for audio session arbitration and the hardware guard
//
// These tests verify single-holder arbitration and that the input device is
// released on every exit path.

use anyhow::Result;
use audio_recorder::audio::{
    AudioBackend, AudioSessionArbiter, AudioSessionGuard, InputCapabilities, Permission,
    SessionCategory, SimulatedBackend, StreamRequest,
};
use audio_recorder::RecorderError;
use std::sync::Arc;

fn request() -> StreamRequest {
    StreamRequest {
        sample_rate: 48_000,
        channels: 1,
        category: SessionCategory::Record,
    }
}

#[test]
fn test_arbiter_allows_single_holder() {
    let arbiter = AudioSessionArbiter::new();

    let claim = arbiter.try_claim();
    assert!(claim.is_some());
    assert!(arbiter.is_held());
    assert!(arbiter.try_claim().is_none(), "second claim must fail fast");

    drop(claim);
    assert!(!arbiter.is_held());
    assert!(arbiter.try_claim().is_some());
}

#[tokio::test]
async fn test_guard_opens_and_releases_once() -> Result<()> {
    let backend = SimulatedBackend::new();
    let arbiter = AudioSessionArbiter::new();
    let claim = arbiter.try_claim().ok_or_else(|| anyhow::anyhow!("claim"))?;

    let (mut guard, _frames) = AudioSessionGuard::acquire(Arc::new(backend.clone()), claim, request()).await?;
    assert!(backend.is_capturing());
    assert!(!guard.is_released());
    assert_eq!(guard.request(), request());

    guard.release();
    guard.release();
    assert!(guard.is_released());
    assert!(!backend.is_capturing());
    assert_eq!(backend.close_count(), 1);

    // The claim lives as long as the guard
    assert!(arbiter.is_held());
    drop(guard);
    assert!(!arbiter.is_held());
    assert_eq!(backend.close_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_dropping_guard_releases_hardware_and_claim() -> Result<()> {
    let backend = SimulatedBackend::new();
    let arbiter = AudioSessionArbiter::new();
    let claim = arbiter.try_claim().ok_or_else(|| anyhow::anyhow!("claim"))?;

    let (guard, _frames) = AudioSessionGuard::acquire(Arc::new(backend.clone()), claim, request()).await?;
    drop(guard);

    assert!(!backend.is_capturing());
    assert_eq!(backend.close_count(), 1);
    assert!(!arbiter.is_held());

    Ok(())
}

#[tokio::test]
async fn test_acquire_failures_return_claim() -> Result<()> {
    let backend = SimulatedBackend::new();
    let arbiter = AudioSessionArbiter::new();

    backend.set_permission(Permission::Denied);
    let claim = arbiter.try_claim().ok_or_else(|| anyhow::anyhow!("claim"))?;
    let result = AudioSessionGuard::acquire(Arc::new(backend.clone()), claim, request()).await;
    assert!(matches!(result, Err(RecorderError::PermissionDenied)));
    assert!(!arbiter.is_held());

    backend.set_permission(Permission::Granted);
    backend.set_available(false);
    let claim = arbiter.try_claim().ok_or_else(|| anyhow::anyhow!("claim"))?;
    let result = AudioSessionGuard::acquire(Arc::new(backend.clone()), claim, request()).await;
    assert!(matches!(result, Err(RecorderError::DeviceUnavailable(_))));
    assert!(!arbiter.is_held());

    backend.set_available(true);
    backend.set_capabilities(InputCapabilities {
        sample_rates: vec![16_000],
        max_channels: 1,
    });
    let claim = arbiter.try_claim().ok_or_else(|| anyhow::anyhow!("claim"))?;
    let result = AudioSessionGuard::acquire(Arc::new(backend.clone()), claim, request()).await;
    assert!(matches!(result, Err(RecorderError::DeviceUnavailable(_))));
    assert!(!arbiter.is_held());
    assert_eq!(backend.open_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_reacquire_after_forced_release() -> Result<()> {
    let backend = SimulatedBackend::new();
    let arbiter = AudioSessionArbiter::new();
    let claim = arbiter.try_claim().ok_or_else(|| anyhow::anyhow!("claim"))?;

    let (mut guard, _frames) = AudioSessionGuard::acquire(Arc::new(backend.clone()), claim, request()).await?;
    assert!(guard.reacquire().is_err(), "still held");

    guard.release();
    let reopen = guard.reacquire()?;
    assert!(!guard.is_released());
    let _frames = tokio::spawn(reopen).await??;
    assert!(backend.is_capturing());
    assert_eq!(backend.open_count(), 2);

    drop(guard);
    assert_eq!(backend.close_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_guard_exposes_interruptions() -> Result<()> {
    let backend = SimulatedBackend::new();
    let arbiter = AudioSessionArbiter::new();
    let claim = arbiter.try_claim().ok_or_else(|| anyhow::anyhow!("claim"))?;

    let (guard, _frames) = AudioSessionGuard::acquire(Arc::new(backend.clone()), claim, request()).await?;
    let mut interruptions = guard.subscribe_interruptions();

    backend.interrupt(audio_recorder::audio::InterruptionReason::DeviceLost, true);
    let received = interruptions.recv().await?;
    assert_eq!(
        received,
        audio_recorder::audio::Interruption::Began {
            reason: audio_recorder::audio::InterruptionReason::DeviceLost,
            exclusive: true,
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_simulated_frames_carry_request_format() -> Result<()> {
    let backend = SimulatedBackend::new();
    let mut frames = backend.open(request()).await?;

    assert!(backend.push_silence(480));
    let frame = frames.recv().await.ok_or_else(|| anyhow::anyhow!("no frame"))?;
    assert_eq!(frame.sample_rate, 48_000);
    assert_eq!(frame.channels, 1);
    assert_eq!(frame.frame_count(), 480);

    backend.close();
    assert!(!backend.push_silence(480));
    assert!(frames.recv().await.is_none());

    Ok(())
}
