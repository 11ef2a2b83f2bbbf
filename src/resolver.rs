use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::models::{ResolutionState, Track};

/// Resolution failures are split so callers can decide between retrying and
/// skipping: `NotFound` is final for the given input, `Upstream` is not.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no playable results for `{0}`")]
    NotFound(String),

    #[error("upstream extraction failed: {0}")]
    Upstream(String),
}

/// Turns queries, URLs and playlist URLs into playable track descriptors.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolves user input into one or more descriptors. Playlist inputs
    /// return one lazy descriptor per entry; only the entry reached during
    /// playback pays the full extraction cost.
    async fn resolve(&self, query: &str, requester: u64) -> Result<Vec<Track>, ResolveError>;

    /// Fills in stream metadata for a lazily queued track.
    async fn resolve_track(&self, track: &Track) -> Result<Track, ResolveError>;
}

const UNKNOWN_TRACK_TITLE: &str = "Unknown track";

fn is_playlist_url(input: &str) -> bool {
    input.starts_with("http") && (input.contains("&list=") || input.contains("?list="))
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolver backed by songbird's yt-dlp integration.
pub struct YtDlpResolver;

impl YtDlpResolver {
    async fn resolve_single(&self, input: &str, requester: u64) -> Result<Track, ResolveError> {
        let source = if is_url(input) {
            songbird::ytdl(input).await
        } else {
            songbird::input::ytdl_search(input).await
        }
        .map_err(|why| ResolveError::Upstream(format!("{why:?}")))?;

        let metadata = &source.metadata;
        let url = metadata
            .source_url
            .clone()
            .ok_or_else(|| ResolveError::NotFound(input.to_string()))?;

        Ok(Track {
            title: metadata
                .title
                .clone()
                .unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
            url,
            duration: metadata.duration,
            thumbnail: metadata.thumbnail.clone(),
            requester,
            resolution: ResolutionState::Resolved,
        })
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str, requester: u64) -> Result<Vec<Track>, ResolveError> {
        if is_playlist_url(query) {
            info!("Detected playlist in {query}");
            let mut tracks = tracks_from_playlist_url(query, requester).await?;
            if tracks.is_empty() {
                return Err(ResolveError::NotFound(query.to_string()));
            }
            // Resolve the head eagerly so playback can start right away; the
            // rest stay lazy until reached.
            match self.resolve_track(&tracks[0]).await {
                Ok(resolved) => tracks[0] = resolved,
                Err(why) => warn!("Eager resolution of playlist head failed: {why}"),
            }
            Ok(tracks)
        } else {
            let track = self.resolve_single(query, requester).await?;
            Ok(vec![track])
        }
    }

    async fn resolve_track(&self, track: &Track) -> Result<Track, ResolveError> {
        if !track.is_lazy() {
            return Ok(track.clone());
        }
        let input = if is_url(&track.url) {
            track.url.as_str()
        } else {
            track.title.as_str()
        };
        let mut resolved = self.resolve_single(input, track.requester).await?;
        resolved.requester = track.requester;
        Ok(resolved)
    }
}

#[derive(Serialize, Deserialize)]
struct PlaylistEntry {
    url: String,
    title: String,
    duration: Option<f64>,
}

/// Lists playlist entries without resolving them, via `yt-dlp -j
/// --flat-playlist`. One JSON object per line on stdout.
async fn tracks_from_playlist_url(url: &str, requester: u64) -> Result<Vec<Track>, ResolveError> {
    info!("Listing playlist entries for {url}");

    let output = Command::new("yt-dlp")
        .arg("-j")
        .arg("--flat-playlist")
        .arg(url)
        .output()
        .await
        .map_err(|why| ResolveError::Upstream(format!("yt-dlp failed to start: {why}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.trim().is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ResolveError::Upstream(stderr.trim().to_string()));
    }

    let lines: Vec<&str> = stdout.lines().collect();
    let tracks: Vec<Track> = lines
        .iter()
        .filter_map(|line| {
            let entry: PlaylistEntry = serde_json::from_str(line).ok()?;
            let mut track = Track::lazy(entry.title, entry.url, requester);
            track.duration = entry
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(|d| Duration::from_secs_f64(d));
            Some(track)
        })
        .collect();

    if tracks.len() < lines.len() {
        warn!("Skipped {} unparseable playlist entries", lines.len() - tracks.len());
    }

    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_urls_are_detected() {
        assert!(is_playlist_url("https://youtube.com/watch?v=x&list=PL123"));
        assert!(is_playlist_url("https://youtube.com/playlist?list=PL123"));
        assert!(!is_playlist_url("https://youtube.com/watch?v=x"));
        assert!(!is_playlist_url("some song list"));
    }

    #[test]
    fn playlist_entries_parse_line_wise() {
        let line = r#"{"url": "https://youtube.com/watch?v=a", "title": "Song A", "duration": 215.0}"#;
        let entry: PlaylistEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.title, "Song A");
        assert_eq!(entry.duration, Some(215.0));
    }
}
