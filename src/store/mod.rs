//! Result persistence: data model, append-only document store, retention.

mod document;
mod models;
mod retention;

pub use document::*;
pub use models::*;
pub use retention::*;
