//! Trellis meta validator
//!
//! Answers "is X a legal child / pointer target / set member of Y" against
//! the meta model: the set of type-definition nodes reachable from the
//! root's `MetaAspectSet` membership. Queries walk each candidate's
//! inheritance chain until a rule match or chain exhaustion, and apply the
//! optional filters in the fixed order
//!
//! > base applicability → sensitivity → multiplicity → aspect
//!
//! short-circuiting to an empty result as soon as the candidate set is
//! empty, since every later filter is monotonically non-increasing.

#![warn(missing_docs)]

mod error;
mod index;
mod query;

pub use error::MetaError;
pub use index::MetaIndex;
pub use query::{ChildQuery, MetaCache, MetaQuery};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
