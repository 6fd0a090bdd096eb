//! Walks over comment forests
//!
//! Threads can be arbitrarily deep, so every walk here uses an explicit work stack
//! rather than native recursion.

use crate::api::{Comment, CommentId};

pub fn find(forest: &[Comment], id: CommentId) -> Option<&Comment> {
    walk(forest).map(|(_, c)| c).find(|c| c.id == id)
}

pub fn find_mut(forest: &mut [Comment], id: CommentId) -> Option<&mut Comment> {
    let mut stack: Vec<&mut Comment> = forest.iter_mut().rev().collect();
    while let Some(c) = stack.pop() {
        if c.id == id {
            return Some(c);
        }
        stack.extend(c.replies.iter_mut().rev());
    }
    None
}

pub fn contains(forest: &[Comment], id: CommentId) -> bool {
    find(forest, id).is_some()
}

/// Number of comments in the forest, replies included
pub fn count(forest: &[Comment]) -> usize {
    walk(forest).count()
}

/// Depth-first, pre-order walk yielding `(depth, comment)`, top-level comments at depth 0
pub fn walk(forest: &[Comment]) -> Walk<'_> {
    Walk {
        stack: forest.iter().rev().map(|c| (0, c)).collect(),
    }
}

pub struct Walk<'a> {
    stack: Vec<(usize, &'a Comment)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a Comment);

    fn next(&mut self) -> Option<(usize, &'a Comment)> {
        let (depth, c) = self.stack.pop()?;
        self.stack
            .extend(c.replies.iter().rev().map(|r| (depth + 1, r)));
        Some((depth, c))
    }
}
