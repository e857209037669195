pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod metrics;
pub mod models;
pub mod query;
pub mod schema;

pub use config::{CommitPolicy, IndexConfig, PaginationType, PartitionConfig, RefreshConfig};
pub use engine::{EngineReader, IndexEngine, MemoryEngine, Sort, SortField};
pub use error::{IndexError, Result};
pub use index::{
    EntityLoader, GenerationFuture, PartitionedIndex, Partitioner, ResultSet, SearchOptions,
    SingleIndex, StatusPartitioner, Transition, WriteReceipt,
};
pub use metrics::IndexMetrics;
pub use models::*;
pub use query::{Predicate, QueryCompiler};
pub use schema::{FieldDef, FieldType, Indexable, Schema};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
