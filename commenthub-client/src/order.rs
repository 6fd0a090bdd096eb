use std::cmp::Ordering;

use crate::api::{Comment, SortField, SortKey, SortOrder};

pub trait OrderExt {
    /// Sort key after the user clicked the header of `field`
    fn clicked(&self, field: SortField) -> Self;

    /// Sorts comments the way the backend orders a page
    fn sort(&self, comments: &mut [Comment]);
}

impl OrderExt for SortKey {
    fn clicked(&self, field: SortField) -> SortKey {
        match self.field == field {
            // Same column again: flip the direction
            true => SortKey {
                field,
                order: self.order.toggled(),
            },
            // New column: always start descending, whatever the previous direction was
            false => SortKey {
                field,
                order: SortOrder::Desc,
            },
        }
    }

    fn sort(&self, comments: &mut [Comment]) {
        let field = self.field;
        comments.sort_by(|a, b| {
            let ord = match field {
                SortField::Username => cmp_text(&a.username, &b.username),
                SortField::Email => cmp_text(&a.email, &b.email),
                SortField::CreatedAt => Ordering::Equal,
            }
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id));
            match self.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
    }
}

fn cmp_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}
