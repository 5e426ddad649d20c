//! Scan matching: nearest-neighbour index and ICP alignment.

pub mod kdtree;

mod icp;

pub use kdtree::KdTree2D;

use thiserror::Error;

/// Failure conditions absorbed by the matcher.
///
/// None of these propagate: ICP logs the condition and returns the pose
/// its contract prescribes (initial guess for the first two, identity for
/// an empty index). The enum keeps log lines and tests naming failures
/// consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MatchFailure {
    /// A scan with fewer than two points cannot be aligned.
    #[error("scan has fewer than two points, returning initial guess")]
    DegenerateScan,
    /// Every correspondence was rejected by the outlier masks.
    #[error("no valid correspondence left, returning initial guess")]
    NoCorrespondences,
    /// The nearest-neighbour index was built over an empty reference.
    #[error("nearest-neighbour index is empty")]
    EmptyTree,
}
