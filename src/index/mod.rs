//! Index integration layer: write generations, snapshots, refresh and the
//! entity indexes built on top of them

pub mod generation;
pub mod partitioned;
pub mod ready;
mod refresh;
pub mod searcher;
pub mod single;
pub mod source;
pub mod sub_index;
pub mod writer;

pub use generation::{GenerationFuture, GenerationTracker};
pub use partitioned::{PartitionedIndex, Partitioner, StatusPartitioner, Transition, WriteReceipt};
pub use ready::ReadyStates;
pub use searcher::{RefreshListener, RefreshOutcome, SearcherGuard, SearcherManager, Snapshot};
pub use single::SingleIndex;
pub use source::{EntityLoader, ResultSet, SearchOptions};
pub use sub_index::SubIndex;
pub use writer::{GenerationWriter, WriteTicket};
