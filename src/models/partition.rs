use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two physical sub-indexes of a partitioned entity index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Open,
    Closed,
}

impl Partition {
    /// All partitions in merge order
    pub const ALL: [Partition; 2] = [Partition::Open, Partition::Closed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Open => "open",
            Partition::Closed => "closed",
        }
    }

    pub fn other(&self) -> Partition {
        match self {
            Partition::Open => Partition::Closed,
            Partition::Closed => Partition::Open,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Partition::Open => 0,
            Partition::Closed => 1,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
