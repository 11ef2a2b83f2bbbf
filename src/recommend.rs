use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::history::HistoryStore;
use crate::models::HistoryEntry;

/// Half-life of a play's contribution to a title's score. A play from a week
/// ago counts half as much as one from right now.
const HALF_LIFE_HOURS: f64 = 168.0;

/// How many recommendations an explicit request may ask for.
pub const MAX_RECOMMENDATIONS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub score: f64,
    pub last_played: DateTime<Utc>,
}

/// Ranks historical titles by recency-weighted play frequency.
///
/// `exclude` holds lowercased titles already in the queue; those never come
/// back as candidates. Ties break on most recent play, then title, so equal
/// inputs always rank identically.
pub fn rank_candidates(
    history: &[HistoryEntry],
    exclude: &HashSet<String>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<Candidate> {
    let mut scored: HashMap<String, Candidate> = HashMap::new();

    for entry in history {
        let key = entry.title.to_lowercase();
        if exclude.contains(&key) {
            continue;
        }

        let age_hours = (now - entry.played_at).num_seconds().max(0) as f64 / 3600.0;
        let weight = 0.5_f64.powf(age_hours / HALF_LIFE_HOURS);

        scored
            .entry(key)
            .and_modify(|candidate| {
                candidate.score += weight;
                if entry.played_at > candidate.last_played {
                    candidate.last_played = entry.played_at;
                    candidate.url = entry.url.clone();
                }
            })
            .or_insert_with(|| Candidate {
                title: entry.title.clone(),
                url: entry.url.clone(),
                score: weight,
                last_played: entry.played_at,
            });
    }

    let mut ranked: Vec<Candidate> = scored.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_played.cmp(&a.last_played))
            .then_with(|| a.title.cmp(&b.title))
    });
    ranked.truncate(limit);
    ranked
}

/// Suggests tracks from the persisted listening log: the guild's own history
/// first, the global log as filler when the guild's is sparse.
pub struct RecommendationEngine {
    history: Arc<HistoryStore>,
}

impl RecommendationEngine {
    pub fn new(history: Arc<HistoryStore>) -> Self {
        RecommendationEngine { history }
    }

    pub async fn suggest(
        &self,
        guild_id: u64,
        count: usize,
        queued_titles: &HashSet<String>,
    ) -> Vec<Candidate> {
        let count = count.clamp(1, MAX_RECOMMENDATIONS);
        let now = Utc::now();

        let guild_history = self.history.guild_history(guild_id).await;
        let mut candidates = rank_candidates(&guild_history, queued_titles, now, count);

        if candidates.len() < count {
            let mut exclude = queued_titles.clone();
            for candidate in &candidates {
                exclude.insert(candidate.title.to_lowercase());
            }
            let global = self.history.global_history().await;
            let filler = rank_candidates(&global, &exclude, now, count - candidates.len());
            candidates.extend(filler);
        }

        info!(
            "Recommending {} candidate(s) for guild {guild_id}",
            candidates.len()
        );
        candidates
    }
}
