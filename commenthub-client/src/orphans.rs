use std::collections::{BTreeMap, HashMap, HashSet};

use crate::api::{Comment, CommentId};

/// Replies whose parent is not in memory yet, keyed by that parent
///
/// Holding is bounded: past `capacity`, the oldest held reply is evicted.
#[derive(Clone, Debug)]
pub struct Orphans {
    capacity: usize,
    next_seq: u64,
    by_parent: HashMap<CommentId, Vec<(u64, Comment)>>,
    // arrival sequence number -> (parent, id)
    arrival: BTreeMap<u64, (CommentId, CommentId)>,
    ids: HashSet<CommentId>,
}

impl Orphans {
    pub fn new(capacity: usize) -> Orphans {
        Orphans {
            capacity,
            next_seq: 0,
            by_parent: HashMap::new(),
            arrival: BTreeMap::new(),
            ids: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: CommentId) -> bool {
        self.ids.contains(&id)
    }

    /// Parents that at least one held reply is waiting for
    pub fn parents(&self) -> impl Iterator<Item = CommentId> + '_ {
        self.by_parent.keys().copied()
    }

    /// Holds `c` until its parent shows up, returning the reply evicted to make room
    ///
    /// `c` must have a parent and must not already be held.
    pub fn hold(&mut self, c: Comment) -> Option<Comment> {
        let Some(parent) = c.parent else {
            tracing::error!(id = ?c.id, "attempted to hold a top-level comment as orphan");
            return None;
        };
        if self.capacity == 0 {
            return Some(c);
        }
        let evicted = match self.ids.len() >= self.capacity {
            true => self.evict_oldest(),
            false => None,
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ids.insert(c.id);
        self.arrival.insert(seq, (parent, c.id));
        self.by_parent.entry(parent).or_default().push((seq, c));
        evicted
    }

    /// Removes and returns the replies waiting for `parent`, in arrival order
    pub fn take_children(&mut self, parent: CommentId) -> Vec<Comment> {
        let children = self.by_parent.remove(&parent).unwrap_or_default();
        children
            .into_iter()
            .map(|(seq, c)| {
                self.arrival.remove(&seq);
                self.ids.remove(&c.id);
                c
            })
            .collect()
    }

    /// Drops the held reply with id `id`, if any
    pub fn remove(&mut self, id: CommentId) -> Option<Comment> {
        if !self.ids.contains(&id) {
            return None;
        }
        let seq = self
            .arrival
            .iter()
            .find(|(_, (_, held))| *held == id)
            .map(|(seq, _)| *seq)?;
        self.remove_seq(seq)
    }

    /// Drops everything, returning how many replies were held
    pub fn clear(&mut self) -> usize {
        let dropped = self.ids.len();
        self.by_parent.clear();
        self.arrival.clear();
        self.ids.clear();
        dropped
    }

    fn evict_oldest(&mut self) -> Option<Comment> {
        let seq = *self.arrival.keys().next()?;
        self.remove_seq(seq)
    }

    fn remove_seq(&mut self, seq: u64) -> Option<Comment> {
        let (parent, _) = self.arrival.remove(&seq)?;
        let siblings = self.by_parent.get_mut(&parent)?;
        let pos = siblings.iter().position(|(s, _)| *s == seq)?;
        let (_, c) = siblings.remove(pos);
        if siblings.is_empty() {
            self.by_parent.remove(&parent);
        }
        self.ids.remove(&c.id);
        Some(c)
    }
}
