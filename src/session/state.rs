use serde::{Deserialize, Serialize};

/// Recording session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No session; ready to start
    #[default]
    Idle,
    /// Acquiring the input hardware and opening the file
    Preparing,
    /// Capturing audio to the file
    Recording,
    /// Hardware held (unless revoked), nothing written
    Paused,
    /// Finalizing the file and releasing the hardware
    Stopping,
    /// Start or stop failed; needs an explicit reset
    Failed,
}

impl SessionState {
    /// Valid transitions:
    /// - Idle -> Preparing (start)
    /// - Preparing -> Recording | Failed | Stopping (stop preempts start)
    /// - Recording -> Paused | Stopping | Failed
    /// - Paused -> Recording | Stopping | Failed
    /// - Stopping -> Idle | Failed
    /// - Failed -> Idle (reset)
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Preparing)
                | (Preparing, Recording)
                | (Preparing, Failed)
                | (Preparing, Stopping)
                | (Recording, Paused)
                | (Recording, Stopping)
                | (Recording, Failed)
                | (Paused, Recording)
                | (Paused, Stopping)
                | (Paused, Failed)
                | (Stopping, Idle)
                | (Stopping, Failed)
                | (Failed, Idle)
        )
    }

    /// Anything but Idle counts as an active session
    pub fn is_active(self) -> bool {
        self != SessionState::Idle
    }
}
