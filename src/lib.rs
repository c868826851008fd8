pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod query;
pub mod segment;
pub mod stemmer;
pub mod store;

pub use config::{GeometricConfig, MergeMode};
pub use error::{GeodexError, Result};
pub use index::{GeometricIndex, IndexView};
pub use models::*;
pub use query::{QueryEvaluator, QueryNode};
pub use segment::{CollectionStatistics, PartName, ScoringModel, SegmentReader};
pub use store::DocumentStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
