use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Requester id used for tracks the bot queued on its own.
pub const AUTOPLAY_REQUESTER: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionState {
    /// Only title (and maybe a page URL) known; stream metadata is fetched
    /// when the track becomes the playback target.
    Unresolved,
    Resolved,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub requester: u64,
    pub resolution: ResolutionState,
}

impl Track {
    pub fn resolved(title: impl Into<String>, url: impl Into<String>, requester: u64) -> Self {
        Track {
            title: title.into(),
            url: url.into(),
            duration: None,
            thumbnail: None,
            requester,
            resolution: ResolutionState::Resolved,
        }
    }

    pub fn lazy(title: impl Into<String>, url: impl Into<String>, requester: u64) -> Self {
        Track {
            resolution: ResolutionState::Unresolved,
            ..Track::resolved(title, url, requester)
        }
    }

    pub fn is_lazy(&self) -> bool {
        self.resolution == ResolutionState::Unresolved
    }

    /// Formats the duration as M:SS or H:MM:SS, `?` when unknown.
    pub fn format_duration(&self) -> String {
        match self.duration {
            None => "?".to_string(),
            Some(duration) => {
                let secs = duration.as_secs();
                let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
                if h > 0 {
                    format!("{h}:{m:02}:{s:02}")
                } else {
                    format!("{m}:{s:02}")
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
    /// Between one track ending and the next starting. Guards against a
    /// second advance while pipeline teardown/setup is in flight.
    Transitioning,
}

impl PlaybackStatus {
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackStatus::Playing | PlaybackStatus::Paused)
    }
}

/// Outcome reported by the audio pipeline when a stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Error,
    Stopped,
}

/// Completion event delivered from the pipeline back to the owning session.
/// Carries the session generation the stream was started under; stale events
/// are discarded.
#[derive(Debug, Clone)]
pub struct Completion {
    pub guild_id: u64,
    pub epoch: u64,
    pub outcome: PlaybackOutcome,
}

/// Point-in-time copy of session state. The UI renderer and the dashboard
/// derive everything they show from this; neither holds state of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub guild_id: u64,
    pub status: PlaybackStatus,
    pub tracks: Vec<Track>,
    pub current_index: usize,
    pub repeat: bool,
    pub autoplay: bool,
    pub volume: f32,
    pub elapsed: Option<Duration>,
}

impl SessionSnapshot {
    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.current_index)
    }
}

/// One line of the persisted listening log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub url: String,
    pub played_at: DateTime<Utc>,
    pub guild_id: u64,
    pub requester: u64,
    pub duration_secs: Option<u64>,
}
