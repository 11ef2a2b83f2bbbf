use thiserror::Error;

use crate::resolver::ResolveError;

/// Errors surfaced by session operations.
///
/// Validation errors are reported to the caller and leave the session
/// untouched. Resolution errors are per-track. Pipeline and voice errors are
/// logged and handled by the orchestrator's recovery paths.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("position {pos} is out of range, the queue holds {len} track(s)")]
    PositionOutOfRange { pos: usize, len: usize },

    #[error("volume {got:.2} is out of range ({min:.1} - {max:.1})")]
    VolumeOutOfRange { got: f32, min: f32, max: f32 },

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("already paused")]
    AlreadyPaused,

    #[error("already playing")]
    AlreadyPlaying,

    #[error("already at the first track")]
    NoPreviousTrack,

    #[error("not connected to a voice channel")]
    NotConnected,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("audio pipeline error: {0}")]
    Pipeline(String),

    #[error("voice connection error: {0}")]
    Voice(String),
}

impl SessionError {
    /// True for caller mistakes that caused no state change. These are
    /// reported back as-is and never logged as failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SessionError::PositionOutOfRange { .. }
                | SessionError::VolumeOutOfRange { .. }
                | SessionError::NothingPlaying
                | SessionError::AlreadyPaused
                | SessionError::AlreadyPlaying
                | SessionError::NoPreviousTrack
                | SessionError::NotConnected
        )
    }
}
