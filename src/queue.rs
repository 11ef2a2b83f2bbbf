use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::SessionError;
use crate::models::Track;

/// Ordered track list plus a cursor marking the playback target.
///
/// The cursor is kept in `0..=len`: on an empty queue it is 0 and there is no
/// current track; `cursor == len` means every queued track has been consumed.
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: Vec<Track>,
    current: usize,
}

impl TrackQueue {
    pub fn new() -> Self {
        TrackQueue::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.current)
    }

    pub fn current_mut(&mut self) -> Option<&mut Track> {
        self.tracks.get_mut(self.current)
    }

    /// The cursor walked past the last track.
    pub fn is_exhausted(&self) -> bool {
        self.current >= self.tracks.len()
    }

    pub fn has_next(&self) -> bool {
        self.current + 1 < self.tracks.len()
    }

    /// Appends one track, returning its position.
    pub fn push(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    /// Appends a batch, returning the position of the first new track.
    pub fn extend(&mut self, tracks: Vec<Track>) -> usize {
        let first = self.tracks.len();
        self.tracks.extend(tracks);
        first
    }

    /// Moves the cursor one forward. Returns true while a track remains.
    pub fn advance(&mut self) -> bool {
        if self.current < self.tracks.len() {
            self.current += 1;
        }
        self.current < self.tracks.len()
    }

    /// Sets the cursor to `position` (1-based, as users see the queue).
    pub fn jump(&mut self, position: usize) -> Result<(), SessionError> {
        if position == 0 || position > self.tracks.len() {
            return Err(SessionError::PositionOutOfRange {
                pos: position,
                len: self.tracks.len(),
            });
        }
        self.current = position - 1;
        Ok(())
    }

    /// Removes the track at `position` (1-based).
    ///
    /// Removing a track before the cursor shifts the cursor back so it keeps
    /// naming the same track. Removing the current track leaves the cursor in
    /// place, now naming the former successor (or the exhausted position).
    pub fn remove(&mut self, position: usize) -> Result<Track, SessionError> {
        if position == 0 || position > self.tracks.len() {
            return Err(SessionError::PositionOutOfRange {
                pos: position,
                len: self.tracks.len(),
            });
        }
        let index = position - 1;
        let removed = self.tracks.remove(index);
        if index < self.current {
            self.current -= 1;
        }
        Ok(removed)
    }

    /// Relocates the track at `from` to `to` (both 1-based). The cursor is
    /// adjusted so it keeps identifying the same track, including when the
    /// current track itself is the one moved.
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), SessionError> {
        let len = self.tracks.len();
        for position in [from, to] {
            if position == 0 || position > len {
                return Err(SessionError::PositionOutOfRange { pos: position, len });
            }
        }

        let from = from - 1;
        let to = to - 1;
        if from == to {
            return Ok(());
        }

        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);

        if from == self.current {
            self.current = to;
        } else if from < self.current && self.current <= to {
            self.current -= 1;
        } else if to <= self.current && self.current < from {
            self.current += 1;
        }
        Ok(())
    }

    /// Permutes every position except the current one, which stays pinned at
    /// its index so the "now playing" marker does not move.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        if self.tracks.len() <= 1 {
            return;
        }

        if self.is_exhausted() {
            self.tracks.shuffle(rng);
            return;
        }

        let pinned = self.tracks.remove(self.current);
        self.tracks.shuffle(rng);
        self.tracks.insert(self.current, pinned);
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current = 0;
    }
}
