//! Bounded replay buffer of id-bearing frames.
use crate::message::{Frame, Message};
use std::collections::VecDeque;

/// A framed message kept for replay, addressed by its event id.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: u64,
    pub frame: Frame,
}

/// Ordered newest-first, at most one entry per id, never longer than `limit`.
#[derive(Debug)]
pub struct History {
    limit: usize,
    entries: VecDeque<HistoryEntry>,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Builds a history from `messages` given oldest to newest. Messages
    /// without a positive id are discarded and only the most recent `limit`
    /// are kept, each framed on its own.
    pub fn prepopulated(limit: usize, messages: &[Message], json_encode: bool) -> Self {
        let mut history = Self::new(limit);
        let with_ids: Vec<&Message> = messages
            .iter()
            .filter(|message| message.event_id().is_some())
            .collect();
        let skip = with_ids.len().saturating_sub(history.limit);

        for message in with_ids.into_iter().skip(skip) {
            if let Some(id) = message.event_id() {
                history.record(id, message.frame(json_encode));
            }
        }

        history
    }

    /// Inserts `frame` as the newest entry, replacing any entry with the same
    /// id and evicting the oldest entry once over the limit.
    pub fn record(&mut self, id: u64, frame: Frame) {
        if id == 0 {
            return;
        }

        self.entries.retain(|entry| entry.id != id);
        self.entries.push_front(HistoryEntry { id, frame });

        while self.entries.len() > self.limit {
            self.entries.pop_back();
        }
    }

    /// Frames newer than `last_seen_id`, oldest first.
    ///
    /// Scans from the newest entry and stops at the first id that is not
    /// greater than `last_seen_id`, so ids are expected to be non-decreasing
    /// across sends.
    pub fn entries_since(&self, last_seen_id: u64) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self
            .entries
            .iter()
            .take_while(|entry| entry.id > last_seen_id)
            .map(|entry| entry.frame.clone())
            .collect();
        frames.reverse();
        frames
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Entries newest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}
