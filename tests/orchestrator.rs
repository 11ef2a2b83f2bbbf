//! End-to-end properties of the playback orchestrator, driven through mock
//! collaborators: command ordering, stale-event handling, autoplay behavior
//! and session lifecycle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use cadence_bot::config::BotConfig;
use cadence_bot::error::SessionError;
use cadence_bot::history::HistoryStore;
use cadence_bot::models::{
    Completion, PlaybackOutcome, PlaybackStatus, ResolutionState, SessionSnapshot, Track,
};
use cadence_bot::pipeline::{AudioPipeline, PipelineHandle, VoiceGateway};
use cadence_bot::player::{Orchestrator, Origin};
use cadence_bot::resolver::{ResolveError, TrackResolver};
use cadence_bot::session::Op;
use cadence_bot::stats::StatsStore;
use cadence_bot::ui::{ControlSurface, PlayerView};

const GUILD: u64 = 42;
const CHANNEL: u64 = 100;
const USER: u64 = 7;

struct MockResolver {
    catalog: Mutex<HashMap<String, Vec<Track>>>,
    failing: Mutex<HashSet<String>>,
}

impl MockResolver {
    fn new() -> Self {
        MockResolver {
            catalog: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    async fn put(&self, query: &str, tracks: Vec<Track>) {
        self.catalog.lock().await.insert(query.to_string(), tracks);
    }

    async fn fail_on(&self, key: &str) {
        self.failing.lock().await.insert(key.to_string());
    }
}

#[async_trait]
impl TrackResolver for MockResolver {
    async fn resolve(&self, query: &str, requester: u64) -> Result<Vec<Track>, ResolveError> {
        if self.failing.lock().await.contains(query) {
            return Err(ResolveError::NotFound(query.to_string()));
        }
        if let Some(tracks) = self.catalog.lock().await.get(query) {
            return Ok(tracks.clone());
        }
        Ok(vec![Track::resolved(
            query,
            format!("mock://{query}"),
            requester,
        )])
    }

    async fn resolve_track(&self, track: &Track) -> Result<Track, ResolveError> {
        if self.failing.lock().await.contains(&track.title) {
            return Err(ResolveError::Upstream(format!(
                "mock failure for {}",
                track.title
            )));
        }
        let mut resolved = track.clone();
        resolved.resolution = ResolutionState::Resolved;
        if !resolved.url.starts_with("mock://") {
            resolved.url = format!("mock://{}", resolved.title);
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone)]
struct StartRecord {
    guild_id: u64,
    epoch: u64,
    url: String,
    volume: f32,
}

struct MockPipeline {
    next_id: AtomicU64,
    starts: Mutex<Vec<StartRecord>>,
    streams: Mutex<HashMap<u64, (u64, UnboundedSender<Completion>)>>,
    failing_urls: Mutex<HashSet<String>>,
    stopped: Mutex<Vec<u64>>,
}

impl MockPipeline {
    fn new() -> Self {
        MockPipeline {
            next_id: AtomicU64::new(1),
            starts: Mutex::new(Vec::new()),
            streams: Mutex::new(HashMap::new()),
            failing_urls: Mutex::new(HashSet::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }

    async fn fail_on(&self, url: &str) {
        self.failing_urls.lock().await.insert(url.to_string());
    }

    async fn starts(&self) -> Vec<StartRecord> {
        self.starts.lock().await.clone()
    }

    /// Fires the completion event for the stream most recently started in
    /// the guild.
    async fn complete(&self, guild_id: u64, outcome: PlaybackOutcome) {
        let streams = self.streams.lock().await;
        let (epoch, sender) = streams.get(&guild_id).expect("no stream started").clone();
        sender
            .send(Completion {
                guild_id,
                epoch,
                outcome,
            })
            .unwrap();
    }

    async fn complete_with_epoch(&self, guild_id: u64, epoch: u64, outcome: PlaybackOutcome) {
        let streams = self.streams.lock().await;
        let (_, sender) = streams.get(&guild_id).expect("no stream started").clone();
        sender
            .send(Completion {
                guild_id,
                epoch,
                outcome,
            })
            .unwrap();
    }
}

#[async_trait]
impl AudioPipeline for MockPipeline {
    async fn start(
        &self,
        guild_id: u64,
        epoch: u64,
        source_url: &str,
        volume: f32,
        completions: UnboundedSender<Completion>,
    ) -> Result<PipelineHandle, SessionError> {
        if self.failing_urls.lock().await.contains(source_url) {
            return Err(SessionError::Pipeline(format!(
                "mock start failure for {source_url}"
            )));
        }
        self.starts.lock().await.push(StartRecord {
            guild_id,
            epoch,
            url: source_url.to_string(),
            volume,
        });
        self.streams
            .lock()
            .await
            .insert(guild_id, (epoch, completions));
        Ok(PipelineHandle::detached(
            self.next_id.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn pause(&self, _handle: &PipelineHandle) -> Result<(), SessionError> {
        Ok(())
    }

    async fn resume(&self, _handle: &PipelineHandle) -> Result<(), SessionError> {
        Ok(())
    }

    async fn set_volume(&self, _handle: &PipelineHandle, _volume: f32) -> Result<(), SessionError> {
        Ok(())
    }

    async fn stop(&self, handle: PipelineHandle) {
        self.stopped.lock().await.push(handle.id());
    }
}

struct MockVoice {
    connected: Mutex<HashSet<u64>>,
    left: Mutex<Vec<u64>>,
}

impl MockVoice {
    fn new() -> Self {
        MockVoice {
            connected: Mutex::new(HashSet::new()),
            left: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VoiceGateway for MockVoice {
    async fn join(&self, guild_id: u64, _channel_id: u64) -> Result<(), SessionError> {
        self.connected.lock().await.insert(guild_id);
        Ok(())
    }

    async fn leave(&self, guild_id: u64) {
        self.connected.lock().await.remove(&guild_id);
        self.left.lock().await.push(guild_id);
    }

    async fn is_connected(&self, guild_id: u64) -> bool {
        self.connected.lock().await.contains(&guild_id)
    }
}

#[derive(Default)]
struct MockSurface {
    published: Mutex<Vec<(u64, PlayerView)>>,
    cleared: Mutex<Vec<u64>>,
    notices: Mutex<Vec<String>>,
}

#[async_trait]
impl ControlSurface for MockSurface {
    async fn publish(&self, guild_id: u64, _channel_id: u64, view: PlayerView) {
        self.published.lock().await.push((guild_id, view));
    }

    async fn clear(&self, guild_id: u64) {
        self.cleared.lock().await.push(guild_id);
    }

    async fn notify(&self, _channel_id: u64, text: &str) {
        self.notices.lock().await.push(text.to_string());
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    resolver: Arc<MockResolver>,
    pipeline: Arc<MockPipeline>,
    voice: Arc<MockVoice>,
    surface: Arc<MockSurface>,
    history: Arc<HistoryStore>,
    _dir: tempfile::TempDir,
}

fn harness_with(config: BotConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let resolver = Arc::new(MockResolver::new());
    let pipeline = Arc::new(MockPipeline::new());
    let voice = Arc::new(MockVoice::new());
    let surface = Arc::new(MockSurface::default());
    let history = Arc::new(HistoryStore::new(dir.path().join("history"), 50));
    let stats = Arc::new(StatsStore::new(dir.path().join("stats")));

    let orchestrator = Orchestrator::new(
        config,
        resolver.clone(),
        pipeline.clone(),
        voice.clone(),
        surface.clone(),
        history.clone(),
        stats,
    );

    Harness {
        orchestrator,
        resolver,
        pipeline,
        voice,
        surface,
        history,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(BotConfig::default())
}

impl Harness {
    async fn join(&self) {
        self.orchestrator
            .join(GUILD, 555, origin())
            .await
            .expect("join failed");
    }

    async fn dispatch(&self, op: Op) -> Result<String, SessionError> {
        self.orchestrator.dispatch(GUILD, origin(), op).await
    }

    async fn play(&self, query: &str) -> String {
        self.dispatch(Op::Play {
            query: query.to_string(),
            requester: USER,
        })
        .await
        .expect("play failed")
    }

    async fn snapshot(&self) -> SessionSnapshot {
        self.orchestrator
            .snapshots()
            .await
            .into_iter()
            .find(|snapshot| snapshot.guild_id == GUILD)
            .expect("no session for guild")
    }

    /// Polls until `predicate` holds or a second passes.
    async fn wait_until<F>(&self, mut predicate: F)
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        for _ in 0..100 {
            if let Some(snapshot) = self
                .orchestrator
                .snapshots()
                .await
                .into_iter()
                .find(|snapshot| snapshot.guild_id == GUILD)
            {
                if predicate(&snapshot) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within a second");
    }
}

fn origin() -> Origin {
    Origin {
        text_channel: Some(CHANNEL),
        guild_name: Some("Test Guild".to_string()),
    }
}

fn titles(snapshot: &SessionSnapshot) -> Vec<&str> {
    snapshot.tracks.iter().map(|t| t.title.as_str()).collect()
}

#[tokio::test]
async fn play_starts_and_completion_advances() {
    let h = harness();
    h.join().await;

    let reply = h.play("song a").await;
    assert!(reply.contains("Now playing"), "got: {reply}");

    let reply = h.play("song b").await;
    assert!(reply.contains("Queued"), "got: {reply}");

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
    assert_eq!(snapshot.current().unwrap().title, "song a");

    h.pipeline.complete(GUILD, PlaybackOutcome::Finished).await;
    h.wait_until(|s| s.current().map(|t| t.title.as_str()) == Some("song b"))
        .await;

    let starts = h.pipeline.starts().await;
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1].url, "mock://song b");
}

#[tokio::test]
async fn skip_jump_remove_keep_the_cursor_honest() {
    let h = harness();
    h.join().await;
    h.resolver
        .put(
            "abc playlist",
            vec![
                Track::resolved("A", "mock://A", USER),
                Track::resolved("B", "mock://B", USER),
                Track::resolved("C", "mock://C", USER),
            ],
        )
        .await;

    h.play("abc playlist").await;
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.current_index, 0);
    assert_eq!(snapshot.current().unwrap().title, "A");

    // skip: A stays queued, B plays.
    h.dispatch(Op::Skip).await.unwrap();
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.current_index, 1);
    assert_eq!(snapshot.current().unwrap().title, "B");
    assert_eq!(titles(&snapshot), vec!["A", "B", "C"]);

    // jump(3): C plays.
    h.dispatch(Op::Jump { position: 3 }).await.unwrap();
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.current_index, 2);
    assert_eq!(snapshot.current().unwrap().title, "C");

    // remove(1): A leaves, cursor shifts but still points at C.
    h.dispatch(Op::Remove { position: 1 }).await.unwrap();
    let snapshot = h.snapshot().await;
    assert_eq!(titles(&snapshot), vec!["B", "C"]);
    assert_eq!(snapshot.current_index, 1);
    assert_eq!(snapshot.current().unwrap().title, "C");
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
}

#[tokio::test]
async fn stale_completion_cannot_double_advance() {
    let h = harness();
    h.join().await;
    h.resolver
        .put(
            "abc playlist",
            vec![
                Track::resolved("A", "mock://A", USER),
                Track::resolved("B", "mock://B", USER),
                Track::resolved("C", "mock://C", USER),
            ],
        )
        .await;
    h.play("abc playlist").await;

    let epoch_a = h.pipeline.starts().await[0].epoch;

    // Skip tears down A's stream; its completion event arrives late.
    h.dispatch(Op::Skip).await.unwrap();
    assert_eq!(h.snapshot().await.current().unwrap().title, "B");

    h.pipeline
        .complete_with_epoch(GUILD, epoch_a, PlaybackOutcome::Stopped)
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Still on B; the stale event must not have advanced to C.
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.current().unwrap().title, "B");
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
}

#[tokio::test]
async fn volume_out_of_bounds_changes_nothing() {
    let h = harness();
    h.join().await;
    h.play("song a").await;

    let result = h.dispatch(Op::Volume { value: 3.0 }).await;
    assert!(matches!(
        result,
        Err(SessionError::VolumeOutOfRange { .. })
    ));
    assert_eq!(h.snapshot().await.volume, 0.5);

    h.dispatch(Op::Volume { value: 1.5 }).await.unwrap();
    assert_eq!(h.snapshot().await.volume, 1.5);
}

#[tokio::test]
async fn pause_and_resume_validate_state() {
    let h = harness();
    h.join().await;

    assert!(matches!(
        h.dispatch(Op::Pause).await,
        Err(SessionError::NothingPlaying)
    ));

    h.play("song a").await;
    h.dispatch(Op::Pause).await.unwrap();
    assert_eq!(h.snapshot().await.status, PlaybackStatus::Paused);
    assert!(matches!(
        h.dispatch(Op::Pause).await,
        Err(SessionError::AlreadyPaused)
    ));

    h.dispatch(Op::Resume).await.unwrap();
    assert_eq!(h.snapshot().await.status, PlaybackStatus::Playing);
}

#[tokio::test]
async fn autoplay_queues_the_most_recent_history_first() {
    let h = harness();
    h.join().await;

    // Y played before X, so X is the fresher memory.
    h.history
        .record(GUILD, &Track::resolved("Y", "mock://Y", USER))
        .await;
    h.history
        .record(GUILD, &Track::resolved("X", "mock://X", USER))
        .await;

    h.play("song a").await;
    h.dispatch(Op::Autoplay { enabled: Some(true) }).await.unwrap();

    h.pipeline.complete(GUILD, PlaybackOutcome::Finished).await;
    h.wait_until(|s| s.current().map(|t| t.title.as_str()) == Some("X"))
        .await;

    let snapshot = h.snapshot().await;
    assert!(snapshot.autoplay);
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
}

#[tokio::test]
async fn autoplay_disables_itself_without_history() {
    let h = harness();
    h.join().await;

    h.play("song a").await;
    h.dispatch(Op::Autoplay { enabled: Some(true) }).await.unwrap();

    h.pipeline.complete(GUILD, PlaybackOutcome::Finished).await;
    h.wait_until(|s| s.status == PlaybackStatus::Idle).await;

    // The self-disable is visible in session state, not silently retried.
    assert!(!h.snapshot().await.autoplay);
    let notices = h.surface.notices.lock().await;
    assert!(notices.iter().any(|n| n.contains("Autoplay is off")));
}

#[tokio::test]
async fn unresolvable_tracks_are_skipped_not_fatal() {
    let h = harness();
    h.join().await;
    h.resolver
        .put(
            "mixed playlist",
            vec![
                Track::lazy("broken", "mock://broken", USER),
                Track::lazy("working", "mock://working", USER),
            ],
        )
        .await;
    h.resolver.fail_on("broken").await;

    h.play("mixed playlist").await;

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
    assert_eq!(snapshot.current().unwrap().title, "working");
    assert_eq!(snapshot.tracks.len(), 1, "failed track left the queue");

    let notices = h.surface.notices.lock().await;
    assert!(notices.iter().any(|n| n.contains("broken")));
}

#[tokio::test]
async fn pipeline_error_completion_advances_like_normal() {
    let h = harness();
    h.join().await;
    h.resolver
        .put(
            "ab playlist",
            vec![
                Track::resolved("A", "mock://A", USER),
                Track::resolved("B", "mock://B", USER),
            ],
        )
        .await;
    h.play("ab playlist").await;

    h.pipeline.complete(GUILD, PlaybackOutcome::Error).await;
    h.wait_until(|s| s.current().map(|t| t.title.as_str()) == Some("B"))
        .await;
}

#[tokio::test]
async fn concurrent_plays_serialize_without_corruption() {
    let h = harness();
    h.join().await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let orchestrator = h.orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator
                .dispatch(
                    GUILD,
                    origin(),
                    Op::Play {
                        query: format!("track {i}"),
                        requester: USER,
                    },
                )
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.tracks.len(), 10);
    for i in 0..10 {
        let title = format!("track {i}");
        assert!(snapshot.tracks.iter().any(|t| t.title == title));
    }
    // Exactly one of them is playing.
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
    assert_eq!(h.pipeline.starts().await.len(), 1);
}

#[tokio::test]
async fn stop_clears_queue_and_disables_autoplay() {
    let h = harness();
    h.join().await;
    h.play("song a").await;
    h.dispatch(Op::Autoplay { enabled: Some(true) }).await.unwrap();

    h.dispatch(Op::Stop).await.unwrap();

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.status, PlaybackStatus::Idle);
    assert!(snapshot.tracks.is_empty());
    assert!(!snapshot.autoplay);
    assert_eq!(h.pipeline.stopped.lock().await.len(), 1);
}

#[tokio::test]
async fn alone_timeout_destroys_the_session_cleanly() {
    let config = BotConfig {
        alone_timeout: Duration::from_millis(30),
        alone_grace: Duration::from_millis(30),
        ..BotConfig::default()
    };
    let h = harness_with(config);
    h.join().await;
    h.play("song a").await;
    h.dispatch(Op::Pause).await.unwrap();

    h.orchestrator.handle_alone_state(GUILD, true).await;

    for _ in 0..100 {
        if h.orchestrator.session_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.orchestrator.session_count().await, 0);
    assert_eq!(h.voice.left.lock().await.as_slice(), &[GUILD]);
    assert_eq!(h.surface.cleared.lock().await.as_slice(), &[GUILD]);

    // The next command recreates a fresh session without complaint.
    let reply = h.dispatch(Op::ShowQueue).await.unwrap();
    assert!(reply.contains("empty"));
    assert_eq!(h.orchestrator.session_count().await, 1);
}

#[tokio::test]
async fn jump_validation_leaves_the_queue_alone() {
    let h = harness();
    h.join().await;
    h.resolver
        .put(
            "ab playlist",
            vec![
                Track::resolved("A", "mock://A", USER),
                Track::resolved("B", "mock://B", USER),
            ],
        )
        .await;
    h.play("ab playlist").await;

    let before = h.snapshot().await;
    let result = h.dispatch(Op::Jump { position: 9 }).await;
    assert!(matches!(
        result,
        Err(SessionError::PositionOutOfRange { pos: 9, len: 2 })
    ));

    let after = h.snapshot().await;
    assert_eq!(titles(&before), titles(&after));
    assert_eq!(before.current_index, after.current_index);
}

#[tokio::test]
async fn recommend_lists_ranked_history() {
    let h = harness();
    h.join().await;
    h.history
        .record(GUILD, &Track::resolved("old hit", "mock://old", USER))
        .await;
    h.history
        .record(GUILD, &Track::resolved("new hit", "mock://new", USER))
        .await;

    let reply = h.dispatch(Op::Recommend { count: 2 }).await.unwrap();
    assert!(reply.contains("1. new hit"), "got: {reply}");
    assert!(reply.contains("2. old hit"), "got: {reply}");
}

#[tokio::test]
async fn repeat_replays_the_current_track() {
    let h = harness();
    h.join().await;
    h.play("song a").await;
    h.dispatch(Op::ToggleRepeat).await.unwrap();

    h.pipeline.complete(GUILD, PlaybackOutcome::Finished).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let starts = h.pipeline.starts().await;
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0].url, starts[1].url);
    assert_eq!(h.snapshot().await.current().unwrap().title, "song a");
}

#[tokio::test]
async fn leave_requires_a_session() {
    let h = harness();
    assert!(matches!(
        h.orchestrator.leave(GUILD).await,
        Err(SessionError::NotConnected)
    ));

    h.join().await;
    h.orchestrator.leave(GUILD).await.unwrap();
    assert_eq!(h.orchestrator.session_count().await, 0);
    assert!(!h.voice.is_connected(GUILD).await);
}
