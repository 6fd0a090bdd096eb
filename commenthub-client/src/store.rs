use std::{collections::HashSet, mem, sync::Arc};

use crate::{
    api::{Comment, CommentId},
    comment, Orphans,
};

pub const DEFAULT_ORPHAN_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    /// Prepended to the top-level list
    TopLevel,

    /// Appended to the replies of `parent`
    Reply { parent: CommentId },

    /// Already known, nothing changed
    Duplicate,

    /// Parent not in memory, held until it arrives
    Held { parent: CommentId },

    /// Parent not in memory, and no room to hold replies at all
    Dropped { parent: CommentId },
}

/// Comment forest of the current page, plus the replies waiting for their parent
///
/// Lookups scan the forest depth-first. Pages hold at most `PAGE_SIZE` top-level
/// comments, so this stays cheap; an id -> path index would be the next step if that
/// bound were lifted.
#[derive(Clone, Debug)]
pub struct TreeStore {
    forest: Arc<Vec<Comment>>,
    orphans: Orphans,
}

impl Default for TreeStore {
    fn default() -> TreeStore {
        TreeStore::new(DEFAULT_ORPHAN_CAPACITY)
    }
}

impl TreeStore {
    pub fn new(orphan_capacity: usize) -> TreeStore {
        TreeStore {
            forest: Arc::new(Vec::new()),
            orphans: Orphans::new(orphan_capacity),
        }
    }

    /// Top-level comments of the current page, with their replies nested
    pub fn top_level(&self) -> &[Comment] {
        &self.forest
    }

    /// Cheap, immutable copy of the forest for readers
    pub fn snapshot(&self) -> Arc<Vec<Comment>> {
        self.forest.clone()
    }

    /// Whether `id` is known, either in the forest or held as orphan
    pub fn contains(&self, id: CommentId) -> bool {
        self.orphans.contains(id) || comment::contains(&self.forest, id)
    }

    /// Number of comments in the forest, replies included
    pub fn len(&self) -> usize {
        comment::count(&self.forest)
    }

    pub fn is_empty(&self) -> bool {
        self.forest.is_empty()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Installs a freshly fetched page as the new top-level list
    ///
    /// Held replies whose parent is part of the new page get attached. All other held
    /// replies belong to another page or ordering, and are dropped.
    pub fn replace_page(&mut self, page: Vec<Comment>) {
        let mut seen = HashSet::with_capacity(page.len());
        let mut top = Vec::with_capacity(page.len());
        let mut nested = Vec::new();
        for mut c in page {
            if !seen.insert(c.id) {
                tracing::warn!(id = ?c.id, "dropping duplicate entry from comment page");
                continue;
            }
            self.orphans.remove(c.id);
            if c.parent.is_some() {
                nested.push(c);
                continue;
            }
            let id = c.id;
            nested.extend(mem::take(&mut c.replies).into_iter().map(|mut r| {
                r.parent = Some(id);
                r
            }));
            top.push(c);
        }
        let top_ids = top.iter().map(|c| c.id).collect::<HashSet<_>>();
        self.forest = Arc::new(top);

        let waited_for = self
            .orphans
            .parents()
            .filter(|p| top_ids.contains(p))
            .collect::<Vec<_>>();
        for parent in waited_for {
            self.adopt_orphans(parent);
        }
        for c in nested {
            self.insert(c);
        }

        let dropped = self.orphans.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded orphan replies not belonging to the new page");
        }
    }

    /// Merges one comment, typically from the live feed, into the forest
    ///
    /// Replies nested in `c` are merged too, each on its own.
    pub fn insert(&mut self, c: Comment) -> InsertOutcome {
        let mut pending = Vec::new();
        let outcome = self.insert_flat(c, &mut pending);
        while let Some(reply) = pending.pop() {
            self.insert_flat(reply, &mut pending);
        }
        outcome
    }

    /// Tears everything down
    pub fn clear(&mut self) {
        self.forest = Arc::new(Vec::new());
        self.orphans.clear();
    }

    fn insert_flat(&mut self, mut c: Comment, pending: &mut Vec<Comment>) -> InsertOutcome {
        let id = c.id;
        pending.extend(mem::take(&mut c.replies).into_iter().rev().map(|mut r| {
            r.parent = Some(id);
            r
        }));

        if self.contains(id) {
            tracing::trace!(?id, "ignoring already-known comment");
            return InsertOutcome::Duplicate;
        }

        let outcome = match c.parent {
            None => {
                Arc::make_mut(&mut self.forest).insert(0, c);
                InsertOutcome::TopLevel
            }
            Some(parent) if comment::contains(&self.forest, parent) => {
                let forest = Arc::make_mut(&mut self.forest);
                if let Some(p) = comment::find_mut(forest, parent) {
                    p.replies.push(c);
                }
                InsertOutcome::Reply { parent }
            }
            Some(parent) => {
                match self.orphans.hold(c) {
                    Some(rejected) if rejected.id == id => {
                        tracing::warn!(?id, ?parent, "orphan holding is disabled, dropping reply");
                        return InsertOutcome::Dropped { parent };
                    }
                    Some(evicted) => tracing::warn!(
                        id = ?evicted.id,
                        parent = ?evicted.parent,
                        "orphan capacity reached, evicting oldest held reply"
                    ),
                    None => (),
                }
                tracing::debug!(?id, ?parent, "holding reply until its parent arrives");
                return InsertOutcome::Held { parent };
            }
        };
        self.adopt_orphans(id);
        outcome
    }

    /// Attaches the replies waiting for `parent`, then the ones waiting for them, etc.
    fn adopt_orphans(&mut self, parent: CommentId) {
        let mut queue = vec![parent];
        while let Some(parent) = queue.pop() {
            let children = self.orphans.take_children(parent);
            if children.is_empty() {
                continue;
            }
            let forest = Arc::make_mut(&mut self.forest);
            let Some(node) = comment::find_mut(forest, parent) else {
                tracing::error!(?parent, "adopting orphans for a parent that is not in the forest");
                continue;
            };
            for c in children {
                tracing::trace!(id = ?c.id, ?parent, "attaching previously held reply");
                queue.push(c.id);
                node.replies.push(c);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;

    fn ids(forest: &[Comment]) -> Vec<u64> {
        forest.iter().map(|c| c.id.0).collect()
    }

    fn reply_ids(store: &TreeStore, id: u64) -> Vec<u64> {
        ids(&comment::find(store.top_level(), CommentId(id))
            .expect("comment is in the forest")
            .replies)
    }

    /// Checks the forest invariants, panicking with details on violation
    fn check_invariants(store: &TreeStore) {
        let mut seen = HashSet::new();
        for c in store.top_level() {
            assert_eq!(c.parent, None, "top-level comment {:?} has a parent", c.id);
        }
        for (_, c) in comment::walk(store.top_level()) {
            assert!(seen.insert(c.id), "comment {:?} appears twice", c.id);
            assert!(!store.orphans.contains(c.id), "comment {:?} both placed and held", c.id);
            for r in &c.replies {
                assert_eq!(r.parent, Some(c.id), "reply {:?} nested under wrong parent", r.id);
            }
        }
    }

    #[test]
    fn reply_appends_in_arrival_order() {
        let mut s = TreeStore::default();
        s.replace_page(vec![Comment::stub(1, None)]);
        assert_eq!(s.insert(Comment::stub(2, Some(1))), InsertOutcome::Reply { parent: CommentId(1) });
        assert_eq!(s.insert(Comment::stub(3, Some(1))), InsertOutcome::Reply { parent: CommentId(1) });
        assert_eq!(reply_ids(&s, 1), vec![2, 3]);
        assert_eq!(s.top_level().len(), 1);
        check_invariants(&s);
    }

    #[test]
    fn orphan_waits_for_parent() {
        let mut s = TreeStore::default();
        assert_eq!(s.insert(Comment::stub(5, Some(99))), InsertOutcome::Held { parent: CommentId(99) });
        assert!(s.is_empty());
        assert_eq!(s.orphan_count(), 1);
        assert_eq!(s.insert(Comment::stub(99, None)), InsertOutcome::TopLevel);
        assert_eq!(ids(s.top_level()), vec![99]);
        assert_eq!(reply_ids(&s, 99), vec![5]);
        assert_eq!(s.orphan_count(), 0);
        check_invariants(&s);
    }

    #[test]
    fn orphan_chains_resolve_in_cascade() {
        let mut s = TreeStore::default();
        s.insert(Comment::stub(3, Some(2)));
        s.insert(Comment::stub(4, Some(3)));
        s.insert(Comment::stub(2, Some(1)));
        assert_eq!(s.orphan_count(), 3);
        s.insert(Comment::stub(1, None));
        assert_eq!(s.len(), 4);
        assert_eq!(reply_ids(&s, 1), vec![2]);
        assert_eq!(reply_ids(&s, 2), vec![3]);
        assert_eq!(reply_ids(&s, 3), vec![4]);
        check_invariants(&s);
    }

    #[test]
    fn duplicates_are_absorbed() {
        let mut s = TreeStore::default();
        s.insert(Comment::stub(1, None));
        s.insert(Comment::stub(2, Some(1)));
        let before = s.top_level().to_vec();
        assert_eq!(s.insert(Comment::stub(1, None)), InsertOutcome::Duplicate);
        assert_eq!(s.insert(Comment::stub(2, Some(1))), InsertOutcome::Duplicate);
        assert_eq!(s.top_level(), &before[..]);

        s.insert(Comment::stub(7, Some(50)));
        assert_eq!(s.insert(Comment::stub(7, Some(50))), InsertOutcome::Duplicate);
        assert_eq!(s.orphan_count(), 1);
    }

    #[test]
    fn top_level_is_prepended() {
        let mut s = TreeStore::default();
        s.replace_page(vec![Comment::stub(1, None), Comment::stub(2, None)]);
        s.insert(Comment::stub(3, None));
        assert_eq!(ids(s.top_level()), vec![3, 1, 2]);
    }

    #[test]
    fn replace_page_adopts_then_discards_orphans() {
        let mut s = TreeStore::default();
        s.insert(Comment::stub(10, Some(1)));
        s.insert(Comment::stub(11, Some(10)));
        s.insert(Comment::stub(20, Some(2)));
        assert_eq!(s.orphan_count(), 3);

        s.replace_page(vec![Comment::stub(1, None), Comment::stub(3, None)]);
        assert_eq!(ids(s.top_level()), vec![1, 3]);
        assert_eq!(reply_ids(&s, 1), vec![10]);
        assert_eq!(reply_ids(&s, 10), vec![11]);
        assert_eq!(s.orphan_count(), 0);
        assert!(!s.contains(CommentId(20)));
        check_invariants(&s);
    }

    #[test]
    fn replace_page_is_idempotent() {
        let page = vec![Comment::stub(1, None), Comment::stub(2, None)];
        let mut s = TreeStore::default();
        s.replace_page(page.clone());
        let first = s.snapshot();
        s.replace_page(page);
        assert_eq!(*first, *s.snapshot());
    }

    #[test]
    fn replace_page_flattens_server_replies() {
        let mut top = Comment::stub(1, None);
        let mut reply = Comment::stub(2, Some(1));
        reply.replies.push(Comment::stub(3, Some(2)));
        top.replies.push(reply);
        let mut s = TreeStore::default();
        s.replace_page(vec![top, Comment::stub(1, None), Comment::stub(4, Some(1))]);
        assert_eq!(ids(s.top_level()), vec![1]);
        assert_eq!(reply_ids(&s, 1), vec![2, 4]);
        assert_eq!(reply_ids(&s, 2), vec![3]);
        check_invariants(&s);
    }

    #[test]
    fn snapshots_are_not_affected_by_later_inserts() {
        let mut s = TreeStore::default();
        s.insert(Comment::stub(1, None));
        let snap = s.snapshot();
        s.insert(Comment::stub(2, Some(1)));
        assert!(snap[0].replies.is_empty());
        assert_eq!(reply_ids(&s, 1), vec![2]);
    }

    #[test]
    fn clear_drops_everything() {
        let mut s = TreeStore::default();
        s.insert(Comment::stub(1, None));
        s.insert(Comment::stub(5, Some(6)));
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.orphan_count(), 0);
        assert!(!s.contains(CommentId(5)));
    }

    #[test]
    fn orphan_capacity_bounds_memory() {
        let mut s = TreeStore::new(3);
        for id in 0..10 {
            s.insert(Comment::stub(100 + id, Some(id)));
        }
        assert_eq!(s.orphan_count(), 3);
        // only the 3 most recent are still held
        s.insert(Comment::stub(9, None));
        assert_eq!(reply_ids(&s, 9), vec![109]);
        s.insert(Comment::stub(0, None));
        assert!(reply_ids(&s, 0).is_empty());
    }

    #[test]
    fn zero_capacity_drops_orphans() {
        let mut s = TreeStore::new(0);
        s.insert(Comment::stub(1, None));
        assert_eq!(
            s.insert(Comment::stub(5, Some(99))),
            InsertOutcome::Dropped { parent: CommentId(99) }
        );
        assert_eq!(s.orphan_count(), 0);
        assert!(!s.contains(CommentId(5)));
        assert_eq!(
            s.insert(Comment::stub(2, Some(1))),
            InsertOutcome::Reply { parent: CommentId(1) }
        );
    }

    #[test]
    fn deep_chain_with_live_snapshot() {
        const DEPTH: u64 = 3_000;
        let thread = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                let mut s = TreeStore::default();
                s.insert(Comment::stub(0, None));
                let mut snapshots = Vec::new();
                for id in 1..DEPTH {
                    if id % 500 == 0 {
                        snapshots.push(s.snapshot());
                    }
                    s.insert(Comment::stub(id, Some(id - 1)));
                }
                // every insert from now on copies the whole chain
                let reader = s.snapshot();
                s.insert(Comment::stub(DEPTH, Some(DEPTH - 1)));
                assert_eq!(s.len(), DEPTH as usize + 1);
                assert_eq!(comment::count(&reader), DEPTH as usize);
                s.clear();
                assert!(s.is_empty());
                drop(reader);
                drop(snapshots);
            })
            .expect("spawning test thread");
        thread.join().expect("deep chain overflowed the stack");
    }

    #[derive(Clone, Debug, bolero::generator::TypeGenerator)]
    enum Op {
        Insert { id: u8, parent: Option<u8> },
        ReplacePage(Vec<u8>),
    }

    fn stub(id: u8, parent: Option<u8>) -> Comment {
        Comment::stub(u64::from(id), parent.map(u64::from))
    }

    #[test]
    fn fuzz_invariants_hold() {
        bolero::check!()
            .with_type::<Vec<Op>>()
            .cloned()
            .for_each(|ops: Vec<Op>| {
                let mut s = TreeStore::new(16);
                for op in ops {
                    match op {
                        Op::Insert { id, parent } => {
                            let snapshot = s.snapshot();
                            let known = s.contains(CommentId(u64::from(id)));
                            let outcome = s.insert(stub(id, parent));
                            if known {
                                assert_eq!(outcome, InsertOutcome::Duplicate);
                                assert_eq!(*snapshot, *s.snapshot());
                            }
                        }
                        Op::ReplacePage(page) => {
                            s.replace_page(page.into_iter().map(|id| stub(id, None)).collect());
                            assert_eq!(s.orphan_count(), 0);
                        }
                    }
                    check_invariants(&s);
                    assert!(s.orphan_count() <= 16);
                }
            });
    }

    #[test]
    fn fuzz_eventual_consistency() {
        // Without page replacements or evictions, a comment ends up in the forest iff its
        // whole ancestry reaches a top-level comment, whatever the arrival order
        bolero::check!()
            .with_type::<Vec<(u8, Option<u8>)>>()
            .cloned()
            .for_each(|events: Vec<(u8, Option<u8>)>| {
                let mut s = TreeStore::new(usize::MAX);
                let mut first_parent = HashMap::new();
                for (id, parent) in events {
                    first_parent.entry(id).or_insert(parent);
                    s.insert(stub(id, parent));
                }

                let mut placed = HashSet::new();
                loop {
                    let before = placed.len();
                    for (id, parent) in first_parent.iter() {
                        if parent.map_or(true, |p| placed.contains(&p)) {
                            placed.insert(*id);
                        }
                    }
                    if placed.len() == before {
                        break;
                    }
                }

                check_invariants(&s);
                let in_forest = comment::walk(s.top_level())
                    .map(|(_, c)| c.id.0 as u8)
                    .collect::<HashSet<_>>();
                assert_eq!(in_forest, placed);
                assert_eq!(s.orphan_count(), first_parent.len() - placed.len());
            });
    }
}
