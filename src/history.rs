use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::{info, warn};

use crate::models::{HistoryEntry, Track};

/// Append-mostly listening log, one JSON file per guild, newest entry first.
/// Best effort by design: a corrupted or missing file reads as empty and the
/// next write replaces it.
pub struct HistoryStore {
    dir: PathBuf,
    max_entries: usize,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize) -> Self {
        HistoryStore {
            dir: dir.into(),
            max_entries,
        }
    }

    fn guild_file(&self, guild_id: u64) -> PathBuf {
        self.dir.join(format!("{guild_id}_history.json"))
    }

    /// Records a playback start for `track`.
    pub async fn record(&self, guild_id: u64, track: &Track) {
        let entry = HistoryEntry {
            title: track.title.clone(),
            url: track.url.clone(),
            played_at: Utc::now(),
            guild_id,
            requester: track.requester,
            duration_secs: track.duration.map(|d| d.as_secs()),
        };

        let mut history = self.guild_history(guild_id).await;
        history.insert(0, entry);
        history.truncate(self.max_entries);

        if let Err(why) = self.save(guild_id, &history).await {
            warn!("Writing history for guild {guild_id} failed: {why}");
        } else {
            info!("Recorded play in guild {guild_id}: {}", track.title);
        }
    }

    pub async fn guild_history(&self, guild_id: u64) -> Vec<HistoryEntry> {
        load_entries(&self.guild_file(guild_id)).await
    }

    /// Every guild's history merged, newest first.
    pub async fn global_history(&self) -> Vec<HistoryEntry> {
        let mut all = Vec::new();

        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(_) => return all,
        };
        while let Ok(Some(file)) = dir.next_entry().await {
            let path = file.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                all.extend(load_entries(&path).await);
            }
        }

        all.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        all
    }

    pub async fn clear(&self, guild_id: u64) {
        let path = self.guild_file(guild_id);
        if fs::try_exists(&path).await.unwrap_or(false) {
            if let Err(why) = fs::remove_file(&path).await {
                warn!("Clearing history for guild {guild_id} failed: {why}");
            }
        }
    }

    async fn save(&self, guild_id: u64, history: &[HistoryEntry]) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(history)?;
        fs::write(self.guild_file(guild_id), json).await
    }
}

async fn load_entries(path: &Path) -> Vec<HistoryEntry> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_slice(&raw) {
        Ok(entries) => entries,
        Err(_) => {
            warn!("Corrupted history file {}, treating as empty", path.display());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str) -> Track {
        Track::resolved(title, format!("https://example.com/{title}"), 7)
    }

    #[tokio::test]
    async fn record_prepends_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path(), 10);

        store.record(1, &track("first")).await;
        store.record(1, &track("second")).await;

        let history = store.guild_history(1).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].title, "second");
        assert_eq!(history[1].title, "first");
    }

    #[tokio::test]
    async fn history_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path(), 3);

        for i in 0..5 {
            store.record(1, &track(&format!("t{i}"))).await;
        }

        let history = store.guild_history(1).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].title, "t4");
    }

    #[tokio::test]
    async fn corrupted_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path(), 10);

        fs::create_dir_all(dir.path()).await.unwrap();
        fs::write(dir.path().join("1_history.json"), b"{not json")
            .await
            .unwrap();

        assert!(store.guild_history(1).await.is_empty());

        // And a subsequent record replaces it cleanly.
        store.record(1, &track("fresh")).await;
        assert_eq!(store.guild_history(1).await.len(), 1);
    }

    #[tokio::test]
    async fn global_history_merges_guilds() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path(), 10);

        store.record(1, &track("one")).await;
        store.record(2, &track("two")).await;

        let all = store.global_history().await;
        assert_eq!(all.len(), 2);
        // Newest first across files.
        assert_eq!(all[0].title, "two");
    }
}
