use std::time::{Duration, Instant};

use rand::thread_rng;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::SessionError;
use crate::models::{
    PlaybackOutcome, PlaybackStatus, ResolutionState, SessionSnapshot, Track, AUTOPLAY_REQUESTER,
};
use crate::pipeline::PipelineHandle;
use crate::queue::TrackQueue;

/// The closed set of operations a session accepts. Commands, player buttons
/// and the dashboard all funnel through this one schema.
#[derive(Debug, Clone)]
pub enum Op {
    Play { query: String, requester: u64 },
    Pause,
    Resume,
    TogglePlayback,
    Stop,
    Skip,
    Previous,
    Jump { position: usize },
    Remove { position: usize },
    Move { from: usize, to: usize },
    Shuffle,
    ToggleRepeat,
    Volume { value: f32 },
    Autoplay { enabled: Option<bool> },
    Recommend { count: usize },
    ShowQueue,
    ShowPlayer,
}

/// What the orchestrator should do after a completed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Repeat is on and the track finished naturally: play it again.
    Replay,
    /// The cursor advanced onto another queued track.
    PlayCurrent,
    /// Queue exhausted with autoplay on: ask the recommender.
    Autoplay,
    /// Nothing left to play.
    GoIdle,
}

/// Outcome of a remove operation; removing the playing track doubles as a
/// skip and needs pipeline teardown upstream.
#[derive(Debug)]
pub struct RemoveOutcome {
    pub removed: Track,
    pub was_current: bool,
}

/// Per-guild playback state. One instance per server, owned by the registry,
/// with every mutation serialized behind the registry's session lock.
pub struct GuildSession {
    guild_id: u64,
    queue: TrackQueue,
    status: PlaybackStatus,
    repeat: bool,
    autoplay: bool,
    autoplay_chain: u32,
    volume: f32,
    epoch: u64,
    last_activity: Instant,
    started_at: Option<Instant>,
    pipeline: Option<PipelineHandle>,
    voice_channel: Option<u64>,
    text_channel: Option<u64>,
    guild_name: Option<String>,
    idle_timer: Option<JoinHandle<()>>,
    alone_timer: Option<JoinHandle<()>>,
}

impl GuildSession {
    pub fn new(guild_id: u64, default_volume: f32) -> Self {
        GuildSession {
            guild_id,
            queue: TrackQueue::new(),
            status: PlaybackStatus::Idle,
            repeat: false,
            autoplay: false,
            autoplay_chain: 0,
            volume: default_volume,
            epoch: 0,
            last_activity: Instant::now(),
            started_at: None,
            pipeline: None,
            voice_channel: None,
            text_channel: None,
            guild_name: None,
            idle_timer: None,
            alone_timer: None,
        }
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn text_channel(&self) -> Option<u64> {
        self.text_channel
    }

    pub fn set_text_channel(&mut self, channel_id: u64) {
        self.text_channel = Some(channel_id);
    }

    pub fn guild_name(&self) -> Option<&str> {
        self.guild_name.as_deref()
    }

    pub fn set_guild_name(&mut self, name: String) {
        self.guild_name = Some(name);
    }

    pub fn connect(&mut self, voice_channel_id: u64) {
        self.voice_channel = Some(voice_channel_id);
        self.touch();
    }

    pub fn is_connected(&self) -> bool {
        self.voice_channel.is_some()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            guild_id: self.guild_id,
            status: self.status,
            tracks: self.queue.tracks().to_vec(),
            current_index: self.queue.current_index(),
            repeat: self.repeat,
            autoplay: self.autoplay,
            volume: self.volume,
            elapsed: self
                .started_at
                .filter(|_| self.status.is_active())
                .map(|at| at.elapsed()),
        }
    }

    fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Appends tracks, returning the position of the first one (0-based).
    pub fn enqueue(&mut self, tracks: Vec<Track>) -> usize {
        self.touch();
        self.queue.extend(tracks)
    }

    /// Enters `Transitioning` from idle when a playable target exists.
    /// Returns false when nothing should start (already playing, no track).
    pub fn begin_playback_if_idle(&mut self) -> bool {
        if self.status == PlaybackStatus::Idle && self.queue.current().is_some() {
            self.status = PlaybackStatus::Transitioning;
            true
        } else {
            false
        }
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        match self.status {
            PlaybackStatus::Playing => {
                self.status = PlaybackStatus::Paused;
                self.touch();
                Ok(())
            }
            PlaybackStatus::Paused => Err(SessionError::AlreadyPaused),
            _ => Err(SessionError::NothingPlaying),
        }
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        match self.status {
            PlaybackStatus::Paused => {
                self.status = PlaybackStatus::Playing;
                self.touch();
                Ok(())
            }
            PlaybackStatus::Playing => Err(SessionError::AlreadyPlaying),
            _ => Err(SessionError::NothingPlaying),
        }
    }

    /// Forces `playing/paused -> transitioning` and moves the cursor one
    /// ahead. The cursor may land past the last track; the orchestrator then
    /// runs the exhaustion path (autoplay or idle).
    pub fn skip(&mut self) -> Result<(), SessionError> {
        if !self.status.is_active() {
            return Err(SessionError::NothingPlaying);
        }
        self.bump_epoch();
        self.status = PlaybackStatus::Transitioning;
        self.queue.advance();
        self.touch();
        Ok(())
    }

    pub fn previous(&mut self) -> Result<(), SessionError> {
        if !self.status.is_active() {
            return Err(SessionError::NothingPlaying);
        }
        if self.queue.current_index() == 0 {
            return Err(SessionError::NoPreviousTrack);
        }
        let target = self.queue.current_index(); // 1-based position of the predecessor
        self.bump_epoch();
        self.status = PlaybackStatus::Transitioning;
        self.queue.jump(target)?;
        self.touch();
        Ok(())
    }

    /// Jumps to `position` (1-based) in either direction.
    pub fn jump(&mut self, position: usize) -> Result<(), SessionError> {
        if position == 0 || position > self.queue.len() {
            return Err(SessionError::PositionOutOfRange {
                pos: position,
                len: self.queue.len(),
            });
        }
        if self.status.is_active() {
            self.bump_epoch();
        }
        self.status = PlaybackStatus::Transitioning;
        self.queue.jump(position)?;
        self.touch();
        Ok(())
    }

    /// Removes `position` (1-based). Removing the playing track behaves as a
    /// skip from that spot.
    pub fn remove(&mut self, position: usize) -> Result<RemoveOutcome, SessionError> {
        if position == 0 || position > self.queue.len() {
            return Err(SessionError::PositionOutOfRange {
                pos: position,
                len: self.queue.len(),
            });
        }
        let was_current = position - 1 == self.queue.current_index() && self.status.is_active();
        if was_current {
            self.bump_epoch();
            self.status = PlaybackStatus::Transitioning;
        }
        let removed = self.queue.remove(position)?;
        self.touch();
        Ok(RemoveOutcome { removed, was_current })
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), SessionError> {
        self.queue.move_track(from, to)?;
        self.touch();
        Ok(())
    }

    pub fn shuffle(&mut self) {
        self.queue.shuffle(&mut thread_rng());
        self.touch();
    }

    pub fn toggle_repeat(&mut self) -> bool {
        self.repeat = !self.repeat;
        self.touch();
        self.repeat
    }

    pub fn set_volume(&mut self, value: f32, min: f32, max: f32) -> Result<f32, SessionError> {
        if !(min..=max).contains(&value) {
            return Err(SessionError::VolumeOutOfRange {
                got: value,
                min,
                max,
            });
        }
        self.volume = value;
        self.touch();
        Ok(value)
    }

    /// Sets or toggles autoplay, returning the new state. Enabling resets the
    /// consecutive-autoplay counter.
    pub fn set_autoplay(&mut self, enabled: Option<bool>) -> bool {
        let next = enabled.unwrap_or(!self.autoplay);
        if next && !self.autoplay {
            self.autoplay_chain = 0;
        }
        self.autoplay = next;
        self.touch();
        next
    }

    /// Autoplay turned itself off (empty history, failed resolution, chain
    /// cap). Kept separate from `set_autoplay` so the transition is visible
    /// in logs.
    pub fn autoplay_self_disable(&mut self, reason: &str) {
        if self.autoplay {
            info!("Autoplay disabled itself for guild {}: {reason}", self.guild_id);
        }
        self.autoplay = false;
    }

    pub fn autoplay_chain(&self) -> u32 {
        self.autoplay_chain
    }

    /// Clears the queue and flags and releases the pipeline handle for
    /// teardown. Any in-flight completion or resolution is invalidated.
    pub fn stop_reset(&mut self) -> Option<PipelineHandle> {
        self.bump_epoch();
        self.queue.clear();
        self.autoplay = false;
        self.autoplay_chain = 0;
        self.status = PlaybackStatus::Idle;
        self.started_at = None;
        self.touch();
        self.pipeline.take()
    }

    /// Records a successfully started stream. Autoplay-requested tracks grow
    /// the chain counter; user-requested tracks reset it.
    pub fn mark_playing(&mut self, handle: PipelineHandle) {
        match self.queue.current().map(|track| track.requester) {
            Some(AUTOPLAY_REQUESTER) => self.autoplay_chain += 1,
            _ => self.autoplay_chain = 0,
        }
        self.pipeline = Some(handle);
        self.status = PlaybackStatus::Playing;
        self.started_at = Some(Instant::now());
        self.touch();
    }

    pub fn go_idle(&mut self) {
        self.status = PlaybackStatus::Idle;
        self.started_at = None;
        self.pipeline = None;
        self.touch();
    }

    pub fn pipeline(&self) -> Option<&PipelineHandle> {
        self.pipeline.as_ref()
    }

    pub fn take_pipeline(&mut self) -> Option<PipelineHandle> {
        self.pipeline.take()
    }

    /// Swaps the current (lazy) track for its resolved version.
    pub fn replace_current(&mut self, resolved: Track) {
        if let Some(current) = self.queue.current_mut() {
            *current = resolved;
        }
    }

    /// Marks the current track failed and splices it out; the cursor then
    /// names its former successor. Used by the playback walk to step over
    /// unplayable tracks without halting the queue.
    pub fn drop_current(&mut self) -> Option<Track> {
        self.queue.current_mut()?.resolution = ResolutionState::Failed;
        let position = self.queue.current_index() + 1;
        self.queue.remove(position).ok()
    }

    /// Applies a completion event from the pipeline. Events from an earlier
    /// epoch (a stream we already tore down) are dropped; live events decide
    /// the follow-up from repeat/queue/autoplay state.
    pub fn handle_completion(
        &mut self,
        epoch: u64,
        outcome: PlaybackOutcome,
        chain_limit: u32,
    ) -> Option<FollowUp> {
        if epoch != self.epoch {
            info!(
                "Discarding stale completion for guild {} (epoch {epoch}, now {})",
                self.guild_id, self.epoch
            );
            return None;
        }
        if !self.status.is_active() {
            return None;
        }

        self.bump_epoch();
        self.status = PlaybackStatus::Transitioning;
        self.pipeline = None;
        self.touch();

        if self.repeat && outcome == PlaybackOutcome::Finished {
            return Some(FollowUp::Replay);
        }

        if self.queue.advance() {
            return Some(FollowUp::PlayCurrent);
        }

        if self.autoplay {
            if self.autoplay_chain < chain_limit {
                return Some(FollowUp::Autoplay);
            }
            self.autoplay_self_disable("consecutive autoplay cap reached");
        }

        Some(FollowUp::GoIdle)
    }

    pub fn set_idle_timer(&mut self, timer: JoinHandle<()>) {
        if let Some(old) = self.idle_timer.replace(timer) {
            old.abort();
        }
    }

    pub fn set_alone_timer(&mut self, timer: JoinHandle<()>) {
        if let Some(old) = self.alone_timer.replace(timer) {
            old.abort();
        }
    }

    pub fn cancel_alone_timer(&mut self) {
        if let Some(timer) = self.alone_timer.take() {
            timer.abort();
        }
    }

    /// Detaches a timer handle without aborting it. A timer task that is
    /// about to destroy its own session takes itself out first, so the
    /// teardown it runs is not cancelled from under it.
    pub fn take_idle_timer(&mut self) -> Option<JoinHandle<()>> {
        self.idle_timer.take()
    }

    pub fn take_alone_timer(&mut self) -> Option<JoinHandle<()>> {
        self.alone_timer.take()
    }

    pub fn cancel_timers(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
        self.cancel_alone_timer();
    }

    /// Detaches the voice channel and returns whether one was held.
    pub fn release_voice(&mut self) -> bool {
        self.voice_channel.take().is_some()
    }
}

impl Drop for GuildSession {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
