use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::MutexGuard;
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::error::SessionError;
use crate::history::HistoryStore;
use crate::models::{Completion, PlaybackOutcome, PlaybackStatus, Track, AUTOPLAY_REQUESTER};
use crate::pipeline::{AudioPipeline, VoiceGateway};
use crate::recommend::RecommendationEngine;
use crate::registry::SessionRegistry;
use crate::resolver::TrackResolver;
use crate::session::{GuildSession, Op};
use crate::stats::StatsStore;
use crate::ui::{render_player, render_queue, ControlSurface};

/// Where an operation came from; carries the reply channel and display name
/// the session should remember.
#[derive(Debug, Default, Clone)]
pub struct Origin {
    pub text_channel: Option<u64>,
    pub guild_name: Option<String>,
}

/// Ties the per-guild sessions to their collaborators: resolver, audio
/// pipeline, voice gateway, control surface, history and stats stores.
///
/// Every mutating path — commands, player buttons, dashboard remote control,
/// pipeline completions, timers — goes through here, locking the one session
/// involved for the duration of the operation.
pub struct Orchestrator {
    config: BotConfig,
    registry: SessionRegistry,
    resolver: Arc<dyn TrackResolver>,
    pipeline: Arc<dyn AudioPipeline>,
    voice: Arc<dyn VoiceGateway>,
    surface: Arc<dyn ControlSurface>,
    history: Arc<HistoryStore>,
    stats: Arc<StatsStore>,
    engine: RecommendationEngine,
    completions: UnboundedSender<Completion>,
}

/// Consecutive start failures tolerated before the playback walk gives up.
const MAX_START_FAILURES: u32 = 5;

/// Candidates fetched per autoplay trigger; the first one that resolves is
/// the single track enqueued.
const AUTOPLAY_CANDIDATES: usize = 3;

impl Orchestrator {
    pub fn new(
        config: BotConfig,
        resolver: Arc<dyn TrackResolver>,
        pipeline: Arc<dyn AudioPipeline>,
        voice: Arc<dyn VoiceGateway>,
        surface: Arc<dyn ControlSurface>,
        history: Arc<HistoryStore>,
        stats: Arc<StatsStore>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = RecommendationEngine::new(history.clone());

        let orchestrator = Arc::new(Orchestrator {
            config,
            registry: SessionRegistry::new(),
            resolver,
            pipeline,
            voice,
            surface,
            history,
            stats,
            engine,
            completions: tx,
        });
        orchestrator.spawn_completion_loop(rx);
        orchestrator
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    fn spawn_completion_loop(self: &Arc<Self>, mut rx: UnboundedReceiver<Completion>) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            while let Some(completion) = rx.recv().await {
                orchestrator.on_complete(completion).await;
            }
        });
    }

    /// Joins (or moves to) a voice channel and binds the session to it.
    pub async fn join(
        self: &Arc<Self>,
        guild_id: u64,
        voice_channel: u64,
        origin: Origin,
    ) -> Result<(), SessionError> {
        self.voice.join(guild_id, voice_channel).await?;

        let session = self
            .registry
            .get_or_create(guild_id, self.config.default_volume)
            .await;
        let mut guard = session.lock().await;
        guard.connect(voice_channel);
        if let Some(channel) = origin.text_channel {
            guard.set_text_channel(channel);
        }
        self.schedule_idle_timer(&mut guard);
        Ok(())
    }

    /// Explicit leave: full session teardown.
    pub async fn leave(self: &Arc<Self>, guild_id: u64) -> Result<(), SessionError> {
        if self.registry.get(guild_id).await.is_none() {
            return Err(SessionError::NotConnected);
        }
        self.destroy_session(guild_id, "leave requested").await;
        Ok(())
    }

    /// The single validated entry point for the closed operation set.
    /// Returns the user-facing reply; validation failures leave the session
    /// untouched.
    pub async fn dispatch(
        self: &Arc<Self>,
        guild_id: u64,
        origin: Origin,
        op: Op,
    ) -> Result<String, SessionError> {
        let session = self
            .registry
            .get_or_create(guild_id, self.config.default_volume)
            .await;
        let mut guard = session.lock().await;
        if let Some(channel) = origin.text_channel {
            guard.set_text_channel(channel);
        }
        if let Some(name) = origin.guild_name {
            guard.set_guild_name(name);
        }

        let read_only = matches!(&op, Op::ShowQueue | Op::Recommend { .. });
        let reply = self.apply(&mut guard, op).await;

        match &reply {
            Ok(_) => {
                if !read_only {
                    self.render(&mut guard).await;
                    if guard.status() == PlaybackStatus::Idle {
                        self.schedule_idle_timer(&mut guard);
                    }
                }
            }
            Err(why) if !why.is_validation() => {
                error!("Operation failed for guild {guild_id}: {why}");
            }
            Err(_) => {}
        }

        reply
    }

    async fn apply(
        self: &Arc<Self>,
        guard: &mut MutexGuard<'_, GuildSession>,
        op: Op,
    ) -> Result<String, SessionError> {
        match op {
            Op::Play { query, requester } => {
                if !guard.is_connected() {
                    return Err(SessionError::NotConnected);
                }
                let tracks = self.resolver.resolve(&query, requester).await?;
                let Some(first) = tracks.first().map(|track| track.title.clone()) else {
                    return Err(crate::resolver::ResolveError::NotFound(query).into());
                };
                let count = tracks.len();
                let position = guard.enqueue(tracks);

                let reply = if guard.begin_playback_if_idle() {
                    self.drive_playback(guard).await;
                    match guard.queue().current() {
                        Some(track) => format!("Now playing **{}**", track.title),
                        None => format!("Could not play **{first}**"),
                    }
                } else if count > 1 {
                    format!("Queued **{count}** tracks (starting at position {})", position + 1)
                } else {
                    format!("Queued **{first}** at position {}", position + 1)
                };
                Ok(reply)
            }
            Op::Pause => {
                guard.pause()?;
                if let Some(handle) = guard.pipeline().cloned() {
                    self.pipeline.pause(&handle).await?;
                }
                Ok("Paused".to_string())
            }
            Op::Resume => {
                guard.resume()?;
                if let Some(handle) = guard.pipeline().cloned() {
                    self.pipeline.resume(&handle).await?;
                }
                Ok("Resumed".to_string())
            }
            Op::TogglePlayback => match guard.status() {
                PlaybackStatus::Playing => {
                    guard.pause()?;
                    if let Some(handle) = guard.pipeline().cloned() {
                        self.pipeline.pause(&handle).await?;
                    }
                    Ok("Paused".to_string())
                }
                PlaybackStatus::Paused => {
                    guard.resume()?;
                    if let Some(handle) = guard.pipeline().cloned() {
                        self.pipeline.resume(&handle).await?;
                    }
                    Ok("Resumed".to_string())
                }
                _ => Err(SessionError::NothingPlaying),
            },
            Op::Stop => {
                if let Some(handle) = guard.stop_reset() {
                    self.pipeline.stop(handle).await;
                }
                Ok("Stopped playback and cleared the queue".to_string())
            }
            Op::Skip => {
                guard.skip()?;
                if let Some(handle) = guard.take_pipeline() {
                    self.pipeline.stop(handle).await;
                }
                self.drive_playback(guard).await;
                Ok("Skipped".to_string())
            }
            Op::Previous => {
                guard.previous()?;
                if let Some(handle) = guard.take_pipeline() {
                    self.pipeline.stop(handle).await;
                }
                self.drive_playback(guard).await;
                Ok("Went back one track".to_string())
            }
            Op::Jump { position } => {
                guard.jump(position)?;
                if let Some(handle) = guard.take_pipeline() {
                    self.pipeline.stop(handle).await;
                }
                self.drive_playback(guard).await;
                match guard.queue().current() {
                    Some(track) => Ok(format!("Jumped to position {position}: **{}**", track.title)),
                    None => Ok(format!("Jumped to position {position}")),
                }
            }
            Op::Remove { position } => {
                let outcome = guard.remove(position)?;
                if outcome.was_current {
                    if let Some(handle) = guard.take_pipeline() {
                        self.pipeline.stop(handle).await;
                    }
                    self.drive_playback(guard).await;
                    Ok(format!("Skipped the playing track **{}**", outcome.removed.title))
                } else {
                    Ok(format!("Removed **{}**", outcome.removed.title))
                }
            }
            Op::Move { from, to } => {
                guard.move_track(from, to)?;
                Ok(format!("Moved track {from} to position {to}"))
            }
            Op::Shuffle => {
                guard.shuffle();
                Ok("Queue shuffled!".to_string())
            }
            Op::ToggleRepeat => {
                let repeat = guard.toggle_repeat();
                Ok(format!("Repeat is now {}", if repeat { "on" } else { "off" }))
            }
            Op::Volume { value } => {
                let volume =
                    guard.set_volume(value, self.config.min_volume, self.config.max_volume)?;
                if let Some(handle) = guard.pipeline().cloned() {
                    self.pipeline.set_volume(&handle, volume).await?;
                }
                Ok(format!("Volume set to {volume:.1}"))
            }
            Op::Autoplay { enabled } => {
                let autoplay = guard.set_autoplay(enabled);
                Ok(format!(
                    "Autoplay is now {}",
                    if autoplay { "on" } else { "off" }
                ))
            }
            Op::Recommend { count } => {
                let queued = queued_titles(guard);
                let candidates = self.engine.suggest(guard.guild_id(), count, &queued).await;
                if candidates.is_empty() {
                    return Ok(
                        "No listening history to recommend from yet. Play something first!"
                            .to_string(),
                    );
                }
                let lines: Vec<String> = candidates
                    .iter()
                    .enumerate()
                    .map(|(index, c)| format!("{}. {}", index + 1, c.title))
                    .collect();
                Ok(format!("**Recommendations**:\n{}", lines.join("\n")))
            }
            Op::ShowQueue => Ok(render_queue(&guard.snapshot(), 20)),
            Op::ShowPlayer => Ok(String::new()),
        }
    }

    /// Starts playback of whatever the cursor names, walking over tracks
    /// that fail to resolve and falling into autoplay or idle on exhaustion.
    /// Called with the session lock held, so the whole walk is one atomic
    /// operation from the session's point of view.
    async fn drive_playback(self: &Arc<Self>, guard: &mut MutexGuard<'_, GuildSession>) {
        let guild_id = guard.guild_id();
        let mut failures: u32 = 0;

        loop {
            let current = match guard.queue().current().cloned() {
                Some(track) => track,
                None => {
                    // Queue exhausted.
                    if guard.autoplay() && guard.autoplay_chain() < self.config.autoplay_chain_limit
                    {
                        if self.enqueue_recommendation(guard).await {
                            continue;
                        }
                        // Engine came up empty; it already disabled itself.
                    }
                    self.finish_idle(guard, "Queue finished. Add more tracks or I'll leave when idle.")
                        .await;
                    return;
                }
            };

            if failures >= MAX_START_FAILURES {
                warn!("Giving up after {failures} consecutive start failures in guild {guild_id}");
                self.finish_idle(guard, "Too many tracks failed to play in a row, stopping here.")
                    .await;
                return;
            }

            // Lazy playlist entries and history candidates resolve here, on
            // the pull.
            let track = if current.is_lazy() {
                match self.resolver.resolve_track(&current).await {
                    Ok(resolved) => {
                        guard.replace_current(resolved.clone());
                        resolved
                    }
                    Err(why) => {
                        warn!("Track resolution failed in guild {guild_id}: {why}");
                        self.notify(guard, &format!("Skipping **{}**: {why}", current.title))
                            .await;
                        guard.drop_current();
                        failures += 1;
                        continue;
                    }
                }
            } else {
                current
            };

            let epoch = guard.epoch();
            match self
                .pipeline
                .start(
                    guild_id,
                    epoch,
                    &track.url,
                    guard.volume(),
                    self.completions.clone(),
                )
                .await
            {
                Ok(handle) => {
                    info!("Started `{}` in guild {guild_id}", track.title);
                    guard.mark_playing(handle);
                    self.history.record(guild_id, &track).await;
                    self.stats
                        .record_play(guild_id, guard.guild_name(), &track.title)
                        .await;
                    return;
                }
                Err(why) => {
                    warn!("Pipeline start failed in guild {guild_id}: {why}");
                    self.notify(guard, &format!("Could not play **{}**, skipping", track.title))
                        .await;
                    guard.drop_current();
                    failures += 1;
                }
            }
        }
    }

    /// Pulls recommendations and enqueues the first one that resolves.
    /// Returns false when autoplay had to disable itself.
    async fn enqueue_recommendation(
        self: &Arc<Self>,
        guard: &mut MutexGuard<'_, GuildSession>,
    ) -> bool {
        let guild_id = guard.guild_id();
        let queued = queued_titles(guard);
        let candidates = self
            .engine
            .suggest(guild_id, AUTOPLAY_CANDIDATES, &queued)
            .await;

        if candidates.is_empty() {
            guard.autoplay_self_disable("listening history is empty");
            self.notify(guard, "Autoplay is off: no listening history to pick from.")
                .await;
            return false;
        }

        for candidate in candidates {
            let lazy = Track::lazy(&candidate.title, &candidate.url, AUTOPLAY_REQUESTER);
            match self.resolver.resolve_track(&lazy).await {
                Ok(resolved) => {
                    info!("Autoplay queues `{}` in guild {guild_id}", resolved.title);
                    guard.enqueue(vec![resolved]);
                    return true;
                }
                Err(why) => {
                    warn!("Autoplay candidate `{}` failed: {why}", candidate.title);
                }
            }
        }

        guard.autoplay_self_disable("no recommendation could be resolved");
        self.notify(guard, "Autoplay is off: none of the recommendations were playable.")
            .await;
        false
    }

    async fn finish_idle(self: &Arc<Self>, guard: &mut MutexGuard<'_, GuildSession>, message: &str) {
        guard.go_idle();
        self.notify(guard, message).await;
        self.schedule_idle_timer(guard);
    }

    /// Applies one pipeline completion. Stale epochs fall out inside
    /// `handle_completion`; live ones restart the playback walk.
    async fn on_complete(self: &Arc<Self>, completion: Completion) {
        let Some(session) = self.registry.get(completion.guild_id).await else {
            return;
        };
        let mut guard = session.lock().await;

        if completion.outcome == PlaybackOutcome::Error {
            error!(
                "Stream failed mid-playback in guild {}, advancing",
                completion.guild_id
            );
        }

        let follow_up = guard.handle_completion(
            completion.epoch,
            completion.outcome,
            self.config.autoplay_chain_limit,
        );
        if follow_up.is_some() {
            self.drive_playback(&mut guard).await;
            self.render(&mut guard).await;
        }
    }

    /// Full teardown: timers, pipeline, voice connection, control surface,
    /// registry entry — in that order, so nothing can observe a half-dead
    /// session.
    pub async fn destroy_session(self: &Arc<Self>, guild_id: u64, reason: &str) {
        let Some(session) = self.registry.remove(guild_id).await else {
            return;
        };
        info!("Destroying session for guild {guild_id}: {reason}");

        let mut guard = session.lock().await;
        guard.cancel_timers();
        if let Some(handle) = guard.stop_reset() {
            self.pipeline.stop(handle).await;
        }
        if guard.release_voice() {
            self.voice.leave(guild_id).await;
        }
        self.surface.clear(guild_id).await;
    }

    /// The gateway saw the bot's own voice state drop: fatal for the
    /// session, no retry.
    pub async fn handle_voice_disconnect(self: &Arc<Self>, guild_id: u64) {
        self.destroy_session(guild_id, "voice connection lost").await;
    }

    /// Tracks whether the bot is alone in its voice channel. Alone starts
    /// the pause-then-disconnect timer; company cancels it.
    pub async fn handle_alone_state(self: &Arc<Self>, guild_id: u64, alone: bool) {
        let Some(session) = self.registry.get(guild_id).await else {
            return;
        };
        let mut guard = session.lock().await;

        if !alone {
            guard.cancel_alone_timer();
            return;
        }

        let orchestrator = self.clone();
        let alone_timeout = self.config.alone_timeout;
        let alone_grace = self.config.alone_grace;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(alone_timeout).await;

            if let Some(session) = orchestrator.registry.get(guild_id).await {
                let mut guard = session.lock().await;
                if guard.status() == PlaybackStatus::Playing {
                    if guard.pause().is_ok() {
                        if let Some(handle) = guard.pipeline().cloned() {
                            let _ = orchestrator.pipeline.pause(&handle).await;
                        }
                        orchestrator
                            .notify(&mut guard, "Paused: nobody is listening.")
                            .await;
                    }
                }
            }

            tokio::time::sleep(alone_grace).await;
            if let Some(session) = orchestrator.registry.get(guild_id).await {
                session.lock().await.take_alone_timer();
            }
            orchestrator
                .destroy_session(guild_id, "alone in voice channel")
                .await;
        });
        guard.set_alone_timer(timer);
    }

    fn schedule_idle_timer(self: &Arc<Self>, guard: &mut GuildSession) {
        let guild_id = guard.guild_id();
        let orchestrator = self.clone();
        let timeout = self.config.idle_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            orchestrator.check_idle(guild_id).await;
        });
        guard.set_idle_timer(timer);
    }

    async fn check_idle(self: &Arc<Self>, guild_id: u64) {
        let Some(session) = self.registry.get(guild_id).await else {
            return;
        };
        let expired = {
            let mut guard = session.lock().await;
            if guard.status() != PlaybackStatus::Idle {
                return;
            }
            if guard.idle_for() < self.config.idle_timeout {
                // Activity happened since scheduling; try again later.
                self.schedule_idle_timer(&mut guard);
                return;
            }
            guard.take_idle_timer();
            true
        };
        if expired {
            self.destroy_session(guild_id, "idle timeout").await;
        }
    }

    async fn render(&self, guard: &mut MutexGuard<'_, GuildSession>) {
        let Some(channel) = guard.text_channel() else {
            return;
        };
        let view = render_player(&guard.snapshot(), self.config.queue_page_size);
        self.surface.publish(guard.guild_id(), channel, view).await;
    }

    async fn notify(&self, guard: &mut MutexGuard<'_, GuildSession>, text: &str) {
        if let Some(channel) = guard.text_channel() {
            self.surface.notify(channel, text).await;
        }
    }

    /// Read path for the dashboard: a snapshot per live session.
    pub async fn snapshots(&self) -> Vec<crate::models::SessionSnapshot> {
        let mut snapshots = Vec::new();
        for guild_id in self.registry.guild_ids().await {
            if let Some(session) = self.registry.get(guild_id).await {
                snapshots.push(session.lock().await.snapshot());
            }
        }
        snapshots
    }

    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    pub fn stats_store(&self) -> &StatsStore {
        &self.stats
    }
}

fn queued_titles(guard: &GuildSession) -> HashSet<String> {
    guard
        .queue()
        .tracks()
        .iter()
        .map(|track| track.title.to_lowercase())
        .collect()
}
