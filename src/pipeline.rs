use std::sync::Arc;

use async_trait::async_trait;
use songbird::tracks::TrackHandle;
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::models::{Completion, PlaybackOutcome};

/// Handle to one running audio stream. Exclusively owned by the session that
/// started it; torn down before the next stream starts.
#[derive(Clone)]
pub struct PipelineHandle {
    id: u64,
    track: Option<TrackHandle>,
}

impl PipelineHandle {
    /// Handle without a backing stream, for pipeline implementations that
    /// track playback elsewhere (tests, dry runs).
    pub fn detached(id: u64) -> Self {
        PipelineHandle { id, track: None }
    }

    fn from_track(id: u64, track: TrackHandle) -> Self {
        PipelineHandle {
            id,
            track: Some(track),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// The audio pipeline seam: start a stream for a resolved source URL, control
/// it, and get exactly one completion event delivered through the sink.
#[async_trait]
pub trait AudioPipeline: Send + Sync {
    async fn start(
        &self,
        guild_id: u64,
        epoch: u64,
        source_url: &str,
        volume: f32,
        completions: UnboundedSender<Completion>,
    ) -> Result<PipelineHandle, SessionError>;

    async fn pause(&self, handle: &PipelineHandle) -> Result<(), SessionError>;

    async fn resume(&self, handle: &PipelineHandle) -> Result<(), SessionError>;

    async fn set_volume(&self, handle: &PipelineHandle, volume: f32) -> Result<(), SessionError>;

    async fn stop(&self, handle: PipelineHandle);
}

/// Voice-channel membership, owned one-per-guild by the session.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn join(&self, guild_id: u64, channel_id: u64) -> Result<(), SessionError>;

    async fn leave(&self, guild_id: u64);

    async fn is_connected(&self, guild_id: u64) -> bool;
}

/// Songbird-backed pipeline. The source URL has already been resolved, so
/// `ytdl` here only sets up the stream.
pub struct SongbirdPipeline {
    manager: Arc<Songbird>,
}

impl SongbirdPipeline {
    pub fn new(manager: Arc<Songbird>) -> Self {
        SongbirdPipeline { manager }
    }
}

#[async_trait]
impl AudioPipeline for SongbirdPipeline {
    async fn start(
        &self,
        guild_id: u64,
        epoch: u64,
        source_url: &str,
        volume: f32,
        completions: UnboundedSender<Completion>,
    ) -> Result<PipelineHandle, SessionError> {
        let handler_lock = self
            .manager
            .get(guild_id)
            .ok_or(SessionError::NotConnected)?;

        let source = songbird::ytdl(source_url)
            .await
            .map_err(|why| SessionError::Pipeline(format!("{why:?}")))?;

        let mut handler = handler_lock.lock().await;
        // One stream per session: whatever was playing goes first.
        handler.stop();

        let track = handler.play_source(source);
        if let Err(why) = track.set_volume(volume) {
            warn!("Setting initial volume failed for guild {guild_id}: {why:?}");
        }
        track
            .add_event(
                Event::Track(TrackEvent::End),
                StreamEndNotifier {
                    guild_id,
                    epoch,
                    completions,
                },
            )
            .map_err(|why| SessionError::Pipeline(format!("{why:?}")))?;

        Ok(PipelineHandle::from_track(epoch, track))
    }

    async fn pause(&self, handle: &PipelineHandle) -> Result<(), SessionError> {
        match &handle.track {
            Some(track) => track
                .pause()
                .map_err(|why| SessionError::Pipeline(format!("{why:?}"))),
            None => Ok(()),
        }
    }

    async fn resume(&self, handle: &PipelineHandle) -> Result<(), SessionError> {
        match &handle.track {
            Some(track) => track
                .play()
                .map_err(|why| SessionError::Pipeline(format!("{why:?}"))),
            None => Ok(()),
        }
    }

    async fn set_volume(&self, handle: &PipelineHandle, volume: f32) -> Result<(), SessionError> {
        match &handle.track {
            Some(track) => track
                .set_volume(volume)
                .map_err(|why| SessionError::Pipeline(format!("{why:?}"))),
            None => Ok(()),
        }
    }

    async fn stop(&self, handle: PipelineHandle) {
        if let Some(track) = handle.track {
            // The End event this fires carries a stale epoch and is discarded.
            if let Err(why) = track.stop() {
                warn!("Stopping track failed: {why:?}");
            }
        }
    }
}

/// Relays songbird's track-end event into the session's completion queue.
struct StreamEndNotifier {
    guild_id: u64,
    epoch: u64,
    completions: UnboundedSender<Completion>,
}

#[async_trait]
impl VoiceEventHandler for StreamEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        info!("Stream ended in guild {}", self.guild_id);
        let _ = self.completions.send(Completion {
            guild_id: self.guild_id,
            epoch: self.epoch,
            outcome: PlaybackOutcome::Finished,
        });
        None
    }
}

/// Songbird-backed voice gateway.
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>) -> Self {
        SongbirdGateway { manager }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn join(&self, guild_id: u64, channel_id: u64) -> Result<(), SessionError> {
        let (handler_lock, join_result) = self.manager.join(guild_id, channel_id).await;
        join_result.map_err(|why| SessionError::Voice(format!("{why:?}")))?;

        let mut handler = handler_lock.lock().await;
        if !handler.is_deaf() {
            if let Err(why) = handler.deafen(true).await {
                warn!("Deafen failed for guild {guild_id}: {why:?}");
            }
        }
        Ok(())
    }

    async fn leave(&self, guild_id: u64) {
        if self.manager.get(guild_id).is_some() {
            if let Err(why) = self.manager.remove(guild_id).await {
                warn!("Leaving voice channel failed for guild {guild_id}: {why:?}");
            }
        }
    }

    async fn is_connected(&self, guild_id: u64) -> bool {
        self.manager.get(guild_id).is_some()
    }
}
