use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

/// Aggregated play counters for one guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildStats {
    pub guild_id: u64,
    pub guild_name: String,
    pub total_plays: u64,
    pub play_counts: HashMap<String, u64>,
    pub last_updated: DateTime<Utc>,
}

impl GuildStats {
    fn new(guild_id: u64) -> Self {
        GuildStats {
            guild_id,
            guild_name: "Unknown server".to_string(),
            total_plays: 0,
            play_counts: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn top_titles(&self, limit: usize) -> Vec<(String, u64)> {
        let mut titles: Vec<_> = self
            .play_counts
            .iter()
            .map(|(title, count)| (title.clone(), *count))
            .collect();
        titles.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        titles.truncate(limit);
        titles
    }
}

/// Cross-guild roll-up served to the dashboard.
#[derive(Debug, Serialize)]
pub struct GlobalStats {
    pub total_plays: u64,
    pub active_guilds: usize,
    pub most_played: Vec<(String, u64)>,
    pub servers: Vec<GuildStats>,
}

/// Play counters persisted as one JSON file, loaded once and written through
/// on every update. Volumes here are a handful of writes per song start.
pub struct StatsStore {
    file: PathBuf,
    stats: Mutex<Option<HashMap<u64, GuildStats>>>,
}

impl StatsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        StatsStore {
            file: dir.into().join("play_stats.json"),
            stats: Mutex::new(None),
        }
    }

    pub async fn record_play(&self, guild_id: u64, guild_name: Option<&str>, title: &str) {
        let mut guard = self.stats.lock().await;
        let stats = self.loaded(&mut guard).await;

        let entry = stats
            .entry(guild_id)
            .or_insert_with(|| GuildStats::new(guild_id));
        if let Some(name) = guild_name {
            entry.guild_name = name.to_string();
        }
        entry.total_plays += 1;
        *entry.play_counts.entry(title.to_string()).or_insert(0) += 1;
        entry.last_updated = Utc::now();

        if let Err(why) = self.save(stats).await {
            warn!("Writing play stats failed: {why}");
        }
    }

    pub async fn guild_stats(&self, guild_id: u64) -> GuildStats {
        let mut guard = self.stats.lock().await;
        let stats = self.loaded(&mut guard).await;
        stats
            .get(&guild_id)
            .cloned()
            .unwrap_or_else(|| GuildStats::new(guild_id))
    }

    pub async fn global_stats(&self) -> GlobalStats {
        let mut guard = self.stats.lock().await;
        let stats = self.loaded(&mut guard).await;

        let mut combined: HashMap<String, u64> = HashMap::new();
        let mut total_plays = 0;
        for guild in stats.values() {
            total_plays += guild.total_plays;
            for (title, count) in &guild.play_counts {
                *combined.entry(title.clone()).or_insert(0) += count;
            }
        }

        let mut most_played: Vec<_> = combined.into_iter().collect();
        most_played.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_played.truncate(20);

        let mut servers: Vec<_> = stats.values().cloned().collect();
        servers.sort_by(|a, b| b.total_plays.cmp(&a.total_plays));

        GlobalStats {
            total_plays,
            active_guilds: stats.len(),
            most_played,
            servers,
        }
    }

    async fn loaded<'a>(
        &self,
        guard: &'a mut Option<HashMap<u64, GuildStats>>,
    ) -> &'a mut HashMap<u64, GuildStats> {
        if guard.is_none() {
            let loaded = match fs::read(&self.file).await {
                Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|_| {
                    warn!("Corrupted stats file {}, starting over", self.file.display());
                    HashMap::new()
                }),
                Err(_) => HashMap::new(),
            };
            *guard = Some(loaded);
        }
        guard.as_mut().unwrap()
    }

    async fn save(&self, stats: &HashMap<u64, GuildStats>) -> std::io::Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(stats)?;
        fs::write(&self.file, json).await
    }
}
