//! Client-side track queue
//!
//! Nodes only ever hold the track that is currently playing; anything
//! beyond that is bookkeeping the client keeps for itself. [`Queue`]
//! is that bookkeeping: a FIFO of upcoming tracks with a play history,
//! optional looping, shuffling, and positional edits. It is a plain
//! value type, so hosts decide when to advance it (typically from a
//! `TrackEnd` event).

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What `advance` does once it hands a track out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopMode {
    /// Tracks leave the queue once played
    #[default]
    Off,
    /// The front track is handed out again and again without leaving
    Current,
    /// Played tracks rejoin at the back of the queue
    Queue,
}

/// An ordered queue of tracks with history and loop modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue<T> {
    items: VecDeque<T>,
    history: Vec<T>,
    loop_mode: LoopMode,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            history: Vec::new(),
            loop_mode: LoopMode::Off,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    /// The track at `position` without removing it
    pub fn get(&self, position: usize) -> Option<&T> {
        self.items.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Append a track at the back
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Insert a track at `position`, clamped to the queue length
    pub fn insert(&mut self, position: usize, item: T) {
        let position = position.min(self.items.len());
        self.items.insert(position, item);
    }

    /// Append every track of `items` in order
    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        self.items.extend(items);
    }

    /// Remove and return the track at `position`
    ///
    /// Unlike [`advance`](Self::advance) this is an edit, not playback:
    /// the track does not enter the history and loop modes are ignored.
    pub fn remove(&mut self, position: usize) -> Option<T> {
        self.items.remove(position)
    }

    /// Played tracks, most recent first
    pub fn history(&self) -> impl Iterator<Item = &T> {
        self.history.iter().rev()
    }

    /// The most recently played track
    pub fn last_played(&self) -> Option<&T> {
        self.history.last()
    }

    pub fn reverse(&mut self) {
        self.items.make_contiguous().reverse();
    }

    pub fn shuffle(&mut self) {
        use rand::seq::SliceRandom;
        self.items.make_contiguous().shuffle(&mut rand::thread_rng());
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl<T: Clone> Queue<T> {
    /// Take the next track to play, honoring the loop mode
    ///
    /// `Off` pops the front into the history. `Queue` does the same
    /// but also re-appends the track at the back. `Current` keeps the
    /// front track in place and returns a copy of it, so the same
    /// track is handed out until the mode changes.
    pub fn advance(&mut self) -> Option<T> {
        match self.loop_mode {
            LoopMode::Off => {
                let item = self.items.pop_front()?;
                self.history.push(item.clone());
                Some(item)
            }
            LoopMode::Queue => {
                let item = self.items.pop_front()?;
                self.history.push(item.clone());
                self.items.push_back(item.clone());
                Some(item)
            }
            LoopMode::Current => self.items.front().cloned(),
        }
    }
}

impl<T> IntoIterator for Queue<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<T> FromIterator<T> for Queue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}
