//! Operator tooling for horizontal fan-out across workers or hosts: `split`
//! partitions a master state store's pending work across sibling stores,
//! `merge` folds a worker's finished work back into the master. Neither
//! touches the network — this is pure state-store surgery, run between (or
//! instead of) engine invocations.

mod error;
mod merge;
mod split;

pub use error::OpsError;
pub use merge::{merge, MergeReport};
pub use split::{split, MasterConfig, WorkerEntry};
