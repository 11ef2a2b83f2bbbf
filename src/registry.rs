use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::session::GuildSession;

/// Process-wide map from guild id to its session.
///
/// `get_or_create` is the single entry point: creation happens under the
/// write lock, so two concurrent lookups for the same guild always land on
/// the same session. Each session sits behind its own `Mutex`, which is what
/// serializes mutating operations per guild.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, Arc<Mutex<GuildSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    pub async fn get_or_create(
        &self,
        guild_id: u64,
        default_volume: f32,
    ) -> Arc<Mutex<GuildSession>> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(guild_id)
            .or_insert_with(|| {
                info!("Creating session for guild {guild_id}");
                Arc::new(Mutex::new(GuildSession::new(guild_id, default_volume)))
            })
            .clone()
    }

    pub async fn get(&self, guild_id: u64) -> Option<Arc<Mutex<GuildSession>>> {
        self.sessions.read().await.get(&guild_id).cloned()
    }

    /// Detaches the session so later lookups create a fresh one. The caller
    /// still holds the Arc and runs the actual teardown.
    pub async fn remove(&self, guild_id: u64) -> Option<Arc<Mutex<GuildSession>>> {
        let removed = self.sessions.write().await.remove(&guild_id);
        if removed.is_some() {
            info!("Removed session for guild {guild_id}");
        }
        removed
    }

    pub async fn guild_ids(&self) -> Vec<u64> {
        self.sessions.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_lookups_share_one_session() {
        let registry = Arc::new(SessionRegistry::new());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_create(42, 0.5).await })
            })
            .collect();

        let mut sessions = Vec::new();
        for task in tasks {
            sessions.push(task.await.unwrap());
        }

        assert_eq!(registry.len().await, 1);
        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], session));
        }
    }

    #[tokio::test]
    async fn removal_makes_room_for_a_fresh_session() {
        let registry = SessionRegistry::new();

        let first = registry.get_or_create(1, 0.5).await;
        assert!(registry.remove(1).await.is_some());
        assert!(registry.get(1).await.is_none());

        let second = registry.get_or_create(1, 0.5).await;
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
