use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use shared::{domain::TurnId, phase::Phase};
use tracing::debug;

use crate::store::ContentDigest;

/// Pages are only reusable for the exact content they were computed from;
/// a content change produces a new digest and replaces the old entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageCacheKey {
    pub turn_id: TurnId,
    pub phase: Phase,
    pub width: u32,
    pub height: u32,
    pub content: ContentDigest,
}

impl PageCacheKey {
    fn same_slot(&self, other: &PageCacheKey) -> bool {
        self.turn_id == other.turn_id
            && self.phase == other.phase
            && self.width == other.width
            && self.height == other.height
    }
}

pub type Pages = Arc<[String]>;

/// Page lists grouped by turn, evicted least-recently-used turn first.
#[derive(Debug)]
pub struct PageCache {
    entries: HashMap<PageCacheKey, Pages>,
    turn_recency: VecDeque<TurnId>,
    max_turns: usize,
}

impl PageCache {
    /// `max_turns == 0` keeps every turn.
    pub fn new(max_turns: usize) -> Self {
        Self {
            entries: HashMap::new(),
            turn_recency: VecDeque::new(),
            max_turns,
        }
    }

    pub fn get(&mut self, key: &PageCacheKey) -> Option<Pages> {
        let pages = self.entries.get(key).cloned()?;
        self.touch(key.turn_id);
        Some(pages)
    }

    /// Stores `pages` for `key`, dropping pages cached for older content in
    /// the same turn, phase and size slot. Those can never hit again.
    pub fn insert(&mut self, key: PageCacheKey, pages: Pages) {
        let before = self.entries.len();
        self.entries
            .retain(|cached, _| !(cached.same_slot(&key) && cached.content != key.content));
        let replaced = before - self.entries.len();
        if replaced > 0 {
            debug!(turn_id = %key.turn_id, phase = %key.phase, replaced, "dropped stale cached pages");
        }
        self.entries.insert(key, pages);
        self.touch(key.turn_id);
    }

    pub fn invalidate_turn(&mut self, turn_id: TurnId) -> usize {
        self.turn_recency.retain(|id| *id != turn_id);
        let before = self.entries.len();
        self.entries.retain(|key, _| key.turn_id != turn_id);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_turn(&self, turn_id: TurnId) -> bool {
        self.turn_recency.contains(&turn_id)
    }

    fn touch(&mut self, turn_id: TurnId) {
        if self.turn_recency.back() != Some(&turn_id) {
            self.turn_recency.retain(|id| *id != turn_id);
            self.turn_recency.push_back(turn_id);
        }

        while self.max_turns > 0 && self.turn_recency.len() > self.max_turns {
            let Some(evicted) = self.turn_recency.pop_front() else {
                break;
            };
            let removed = self.invalidate_turn(evicted);
            debug!(turn_id = %evicted, removed, "evicted cached pages");
        }
    }
}
