//! Error types surfaced by the region provider.

use thiserror::Error;

/// Failure reported by [`crate::region::Region::request`].
///
/// The hosted region reserves its full backing store up front; a request
/// that would push the software brk past that reservation is refused and
/// the heap is left exactly as it was.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    #[error("region reservation exhausted: requested {requested} bytes, {available} available")]
    Exhausted { requested: usize, available: usize },
}
