pub mod document;
pub mod search;

pub use document::{Document, DocumentNumber, Tag};
pub use search::{ScoredDocument, SearchResults};
