//! Discovery engine: finds pages without
//! downloading their files, in either batch mode or facet mode.

pub mod batch;
pub mod error;
pub mod facet;
pub mod item_id;
pub mod split;

pub use batch::BatchDiscovery;
pub use error::DiscoveryError;
pub use facet::{FacetDiscovery, FacetOutcome};
pub use split::SplitOperation;
