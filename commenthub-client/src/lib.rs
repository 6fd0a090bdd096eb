pub mod comment;

mod order;
pub use order::OrderExt;

mod orphans;
pub use orphans::Orphans;

mod store;
pub use store::{InsertOutcome, TreeStore, DEFAULT_ORPHAN_CAPACITY};

pub mod view;
pub use view::{project, ViewRow, ViewState};

pub mod api {
    pub use commenthub_api::*;
}
