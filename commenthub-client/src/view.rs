//! Flattening of the forest into display rows

use std::collections::HashMap;

use crate::api::{Comment, CommentId, Time};

/// Indentation level past which deeper replies are drawn flush with the cap
pub const MAX_INDENT: usize = 8;

/// Local UI toggles; changing them never triggers a fetch
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ViewState {
    // missing means expanded
    expanded: HashMap<CommentId, bool>,
    reply_form: Option<CommentId>,
}

impl ViewState {
    pub fn is_expanded(&self, id: CommentId) -> bool {
        self.expanded.get(&id).copied().unwrap_or(true)
    }

    /// Flips the expanded state of `id`, returning the new one
    pub fn toggle(&mut self, id: CommentId) -> bool {
        let now = !self.is_expanded(id);
        self.set_expanded(id, now);
        now
    }

    pub fn set_expanded(&mut self, id: CommentId, expanded: bool) {
        match expanded {
            true => self.expanded.remove(&id),
            false => self.expanded.insert(id, false),
        };
    }

    pub fn reply_form(&self) -> Option<CommentId> {
        self.reply_form
    }

    /// Opens the reply form under `id`, closing any other one
    pub fn open_reply_form(&mut self, id: CommentId) {
        self.reply_form = Some(id);
    }

    pub fn close_reply_form(&mut self) {
        self.reply_form = None;
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ViewRow {
    pub id: CommentId,
    pub depth: usize,

    /// `depth`, capped at `MAX_INDENT`
    pub indent: usize,

    pub username: String,
    pub email: String,
    pub homepage: Option<String>,
    pub body: String,
    pub image: Option<String>,
    pub file: Option<String>,
    pub created_at: Time,

    /// Number of direct replies, shown even when collapsed
    pub reply_count: usize,
    pub expanded: bool,
    pub reply_form_open: bool,
}

/// Depth-first, pre-order projection of `forest`, skipping the replies of collapsed comments
pub fn project<R>(forest: &[Comment], state: &ViewState, render: R) -> Vec<ViewRow>
where
    R: Fn(&str) -> String,
{
    let mut rows = Vec::new();
    let mut stack = forest.iter().rev().map(|c| (0, c)).collect::<Vec<_>>();
    while let Some((depth, c)) = stack.pop() {
        let expanded = state.is_expanded(c.id);
        rows.push(ViewRow {
            id: c.id,
            depth,
            indent: depth.min(MAX_INDENT),
            username: c.username.clone(),
            email: c.email.clone(),
            homepage: c.homepage.clone(),
            body: render(&c.text),
            image: c.image.clone(),
            file: c.file.clone(),
            created_at: c.created_at,
            reply_count: c.replies.len(),
            expanded,
            reply_form_open: state.reply_form == Some(c.id),
        });
        if expanded {
            stack.extend(c.replies.iter().rev().map(|r| (depth + 1, r)));
        }
    }
    rows
}
