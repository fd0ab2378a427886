// Integration tests for host event delivery
//
// These tests verify ordering, coalescing of high-rate events and the
// Recording gate on metering and progress.

use anyhow::Result;
use audio_recorder::audio::InterruptionReason;
use audio_recorder::events::event_names;
use audio_recorder::{
    ChannelDelegate, ErrorKind, EventEmitter, MeteringSample, RecorderDelegate, RecorderEvent,
    SessionState,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

fn sample(db: f32) -> MeteringSample {
    MeteringSample {
        current_db: db,
        peak_db: db + 3.0,
        timestamp: Utc::now(),
    }
}

async fn drain(events: &mut UnboundedReceiver<RecorderEvent>, count: usize) -> Result<Vec<RecorderEvent>> {
    let mut out = Vec::new();
    for _ in 0..count {
        match timeout(Duration::from_secs(2), events.recv()).await? {
            Some(event) => out.push(event),
            None => break,
        }
    }
    Ok(out)
}

#[tokio::test]
async fn test_events_delivered_in_order() -> Result<()> {
    let (delegate, mut events) = ChannelDelegate::new();
    let emitter = EventEmitter::spawn(Arc::new(delegate));

    emitter.state_changed(SessionState::Idle, SessionState::Preparing);
    emitter.state_changed(SessionState::Preparing, SessionState::Recording);
    emitter.progress(Duration::from_millis(1000));
    emitter.warning(ErrorKind::WriteBackpressure, "slow disk");
    emitter.state_changed(SessionState::Recording, SessionState::Stopping);

    let delivered = drain(&mut events, 5).await?;
    let names: Vec<_> = delivered.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec![
            event_names::STATE_CHANGED,
            event_names::STATE_CHANGED,
            event_names::RECORDING_PROGRESS,
            event_names::WARNING,
            event_names::STATE_CHANGED,
        ]
    );
    assert_eq!(delivered[2], RecorderEvent::Progress { elapsed_ms: 1000 });

    Ok(())
}

#[tokio::test]
async fn test_metering_and_progress_gated_on_recording() -> Result<()> {
    let (delegate, mut events) = ChannelDelegate::new();
    let emitter = EventEmitter::spawn(Arc::new(delegate));

    // Nothing announced yet: Idle
    emitter.metering(sample(-20.0));
    emitter.progress(Duration::from_secs(1));

    emitter.state_changed(SessionState::Idle, SessionState::Preparing);
    emitter.metering(sample(-20.0));

    emitter.state_changed(SessionState::Preparing, SessionState::Recording);
    emitter.metering(sample(-10.0));

    emitter.state_changed(SessionState::Recording, SessionState::Paused);
    emitter.metering(sample(-5.0));
    emitter.progress(Duration::from_secs(2));

    emitter.error(ErrorKind::Unknown, "done");

    let delivered = drain(&mut events, 5).await?;
    assert_eq!(delivered.len(), 5);
    assert!(matches!(delivered[0], RecorderEvent::StateChanged { new: SessionState::Preparing, .. }));
    assert!(matches!(delivered[1], RecorderEvent::StateChanged { new: SessionState::Recording, .. }));
    match &delivered[2] {
        RecorderEvent::Metering(s) => assert_eq!(s.current_db, -10.0),
        other => panic!("expected metering, got {:?}", other),
    }
    assert!(matches!(delivered[3], RecorderEvent::StateChanged { new: SessionState::Paused, .. }));
    assert!(matches!(delivered[4], RecorderEvent::Error { kind: ErrorKind::Unknown, .. }));

    Ok(())
}

/// Delegate that blocks on its first event until released
struct StalledHost {
    gate: Mutex<Option<std_mpsc::Receiver<()>>>,
    seen: Mutex<Vec<RecorderEvent>>,
}

impl RecorderDelegate for StalledHost {
    fn on_event(&self, event: &RecorderEvent) {
        if let Some(gate) = self.gate.lock().take() {
            let _ = gate.recv();
        }
        self.seen.lock().push(event.clone());
    }
}

#[tokio::test]
async fn test_busy_host_gets_latest_metering_only() -> Result<()> {
    let (release, gate) = std_mpsc::channel();
    let host = Arc::new(StalledHost {
        gate: Mutex::new(Some(gate)),
        seen: Mutex::new(Vec::new()),
    });
    let emitter = EventEmitter::spawn(host.clone());

    emitter.state_changed(SessionState::Preparing, SessionState::Recording);
    // Let the delivery thread pick up the first event and block on it
    tokio::time::sleep(Duration::from_millis(50)).await;

    for i in 0..10 {
        emitter.metering(sample(-60.0 + i as f32));
        emitter.progress(Duration::from_millis(100 * i));
    }
    emitter.state_changed(SessionState::Recording, SessionState::Stopping);

    assert_eq!(emitter.coalesced_count(), 18);
    release.send(())?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while host.seen.lock().len() < 4 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let seen = host.seen.lock().clone();
    assert_eq!(seen.len(), 4, "got {:?}", seen);
    match &seen[1] {
        RecorderEvent::Metering(s) => assert_eq!(s.current_db, -51.0),
        other => panic!("expected metering, got {:?}", other),
    }
    assert_eq!(seen[2], RecorderEvent::Progress { elapsed_ms: 900 });
    assert!(matches!(seen[3], RecorderEvent::StateChanged { new: SessionState::Stopping, .. }));

    Ok(())
}

#[tokio::test]
async fn test_interruption_event_payload() -> Result<()> {
    let (delegate, mut events) = ChannelDelegate::new();
    let emitter = EventEmitter::spawn(Arc::new(delegate));

    emitter.interruption(true, Some(InterruptionReason::CompetingClient), true);
    emitter.interruption(false, None, false);

    let delivered = drain(&mut events, 2).await?;
    assert_eq!(
        delivered,
        vec![
            RecorderEvent::Interruption {
                began: true,
                reason: Some(InterruptionReason::CompetingClient),
                exclusive: true,
            },
            RecorderEvent::Interruption {
                began: false,
                reason: None,
                exclusive: false,
            },
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_delivery_stops_when_emitter_dropped() -> Result<()> {
    let (delegate, mut events) = ChannelDelegate::new();
    let emitter = EventEmitter::spawn(Arc::new(delegate));

    emitter.error(ErrorKind::DeviceUnavailable, "gone");
    drop(emitter);

    // Queued events are still delivered before the thread exits
    let first = timeout(Duration::from_secs(2), events.recv()).await?;
    assert!(matches!(first, Some(RecorderEvent::Error { .. })));
    let end = timeout(Duration::from_secs(2), events.recv()).await?;
    assert!(end.is_none());

    Ok(())
}

#[test]
fn test_event_json_uses_host_names() -> Result<()> {
    let progress = serde_json::to_value(RecorderEvent::Progress { elapsed_ms: 1500 })?;
    assert_eq!(progress["event"], "recordingProgress");
    assert_eq!(progress["elapsedMs"], 1500);

    let change = serde_json::to_value(RecorderEvent::StateChanged {
        old: SessionState::Recording,
        new: SessionState::Paused,
    })?;
    assert_eq!(change["event"], "stateChanged");
    assert_eq!(change["old"], "recording");
    assert_eq!(change["new"], "paused");

    let error = serde_json::to_value(RecorderEvent::Error {
        kind: ErrorKind::FinalizeError,
        message: "disk full".to_string(),
    })?;
    assert_eq!(error["event"], "error");
    assert_eq!(error["kind"], "finalizeError");

    let metering = serde_json::to_value(RecorderEvent::Metering(sample(-12.0)))?;
    assert_eq!(metering["event"], "metering");
    assert_eq!(metering["currentDb"], -12.0);

    Ok(())
}
